//! Ticket workflows and ticket types.
//!
//! Workflow definitions are copied verbatim as `workflows/<name>.xml`. Ticket
//! types travel as opaque payloads produced and consumed by the host's
//! ticket-type subsystem; they may refer to workflows, so workflows are always
//! imported first.

use super::{CodecContext, DomainCodec, Exported, is_safe_component};
use crate::bundle::document::{self, Element};
use crate::bundle::domain::Domain;
use crate::bundle::error::BundleError;
use crate::bundle::store::ARTIFACT_SUFFIX;
use crate::models::Workflow;
use crate::project::Collection;
use std::path::PathBuf;

const WORKFLOW_DIR: &str = "workflows";
const ROOT: &str = "ticket_types";
const RECORD: &str = "ticket_type";

pub struct WorkflowCodec;

impl WorkflowCodec {
    fn dir(ctx: &CodecContext<'_>) -> PathBuf {
        ctx.bundle.join(WORKFLOW_DIR)
    }
}

#[rocket::async_trait]
impl DomainCodec for WorkflowCodec {
    fn domain(&self) -> Domain {
        Domain::Workflows
    }

    async fn export(&self, ctx: &CodecContext<'_>) -> Result<Exported, BundleError> {
        let dir = Self::dir(ctx);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| BundleError::io(&dir, e))?;

        let mut names = Vec::new();
        for workflow in ctx.project.workflows().await? {
            if !is_safe_component(&workflow.name) {
                log::warn!("skipping workflow with unsafe name `{}`", workflow.name);
                continue;
            }
            let path = dir.join(format!("{}.{}", workflow.name, ARTIFACT_SUFFIX));
            tokio::fs::write(&path, workflow.definition.as_bytes())
                .await
                .map_err(|e| BundleError::io(&path, e))?;
            names.push(workflow.name);
        }
        Ok(Exported::new(names))
    }

    async fn import(&self, ctx: &CodecContext<'_>) -> Result<usize, BundleError> {
        let dir = Self::dir(ctx);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(BundleError::io(&dir, err)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BundleError::io(&dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ARTIFACT_SUFFIX) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                files.push((stem.to_string(), path.clone()));
            }
        }
        files.sort();

        let mut workflows = Vec::with_capacity(files.len());
        for (name, path) in files {
            let artifact = format!("{WORKFLOW_DIR}/{name}.{ARTIFACT_SUFFIX}");
            let definition = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| BundleError::io(&path, e))?;
            document::parse(&definition).map_err(|e| BundleError::malformed(&artifact, e))?;
            workflows.push(Workflow { name, definition });
        }

        let mut unit = ctx.project.begin().await?;
        unit.clear(Collection::Workflows).await?;
        for workflow in &workflows {
            unit.install_workflow(workflow).await?;
        }
        unit.commit().await?;
        Ok(workflows.len())
    }
}

pub struct TicketTypeCodec;

#[rocket::async_trait]
impl DomainCodec for TicketTypeCodec {
    fn domain(&self) -> Domain {
        Domain::TicketTypes
    }

    async fn export(&self, ctx: &CodecContext<'_>) -> Result<Exported, BundleError> {
        let mut root = ctx.document(ROOT);
        let names = ctx.project.ticket_type_names().await?;
        for name in &names {
            let payload = ctx.project.serialize_ticket_type(name).await?;
            root.push(
                Element::new(RECORD)
                    .with_attr("name", name.as_str())
                    .with_text(payload),
            );
        }
        ctx.write_artifact(Domain::TicketTypes, &root).await?;
        Ok(Exported::new(names))
    }

    async fn import(&self, ctx: &CodecContext<'_>) -> Result<usize, BundleError> {
        let Some(root) = ctx.read_artifact(Domain::TicketTypes).await? else {
            return Ok(0);
        };
        let artifact = Domain::TicketTypes.manifest_entry();
        root.expect_root(ROOT)
            .map_err(|e| BundleError::malformed(artifact, e))?;

        let mut payloads = Vec::new();
        for element in root.children_named(RECORD) {
            let name = element
                .required("name")
                .map_err(|e| BundleError::malformed(artifact, e))?;
            let payload = element.text().ok_or_else(|| {
                BundleError::malformed(artifact, format!("ticket type `{name}` has no definition"))
            })?;
            payloads.push((name.to_string(), payload.to_string()));
        }

        let mut unit = ctx.project.begin().await?;
        unit.clear(Collection::TicketTypes).await?;
        for (name, payload) in &payloads {
            let applied = unit.apply_ticket_type_definition(payload).await?;
            if &applied != name {
                log::warn!("ticket type record `{}` applied as `{}`", name, applied);
            }
        }
        unit.commit().await?;
        Ok(payloads.len())
    }
}
