//! Wiki attachments: a metadata artifact plus the raw files.
//!
//! Files live under `attachments/wiki/<page>/<file>` inside the bundle. Only
//! attachments of pages present in the bundle's wiki artifact are exported.

use super::{CodecContext, DomainCodec, Exported, is_safe_component, is_safe_relative};
use crate::bundle::document::Element;
use crate::bundle::domain::Domain;
use crate::bundle::error::BundleError;
use crate::models::Attachment;
use crate::project::Collection;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const ROOT: &str = "attachments";
const RECORD: &str = "attachment";
const FILES_DIR: &str = "attachments";
const WIKI_REALM: &str = "wiki";

pub struct AttachmentCodec;

fn file_path(bundle: &Path, attachment: &Attachment) -> Result<PathBuf, String> {
    if !is_safe_relative(&attachment.parent_id) {
        return Err(format!("unsafe parent id `{}`", attachment.parent_id));
    }
    if !is_safe_component(&attachment.filename) {
        return Err(format!("unsafe filename `{}`", attachment.filename));
    }
    Ok(bundle
        .join(FILES_DIR)
        .join(WIKI_REALM)
        .join(&attachment.parent_id)
        .join(&attachment.filename))
}

fn attachment_from(element: &Element) -> Result<Attachment, String> {
    let parent_id = element.required("parent_id").map_err(|e| e.to_string())?;
    let filename = element.required("name").map_err(|e| e.to_string())?;
    Ok(Attachment {
        parent_id: parent_id.to_string(),
        filename: filename.to_string(),
        size: element
            .parsed::<i64>("size")
            .map_err(|e| e.to_string())?
            .unwrap_or(0),
        version: element
            .parsed::<i32>("version")
            .map_err(|e| e.to_string())?
            .unwrap_or(1),
        description: element.text().map(str::to_string),
    })
}

#[rocket::async_trait]
impl DomainCodec for AttachmentCodec {
    fn domain(&self) -> Domain {
        Domain::Attachments
    }

    async fn export(&self, ctx: &CodecContext<'_>) -> Result<Exported, BundleError> {
        let Some(wiki) = ctx.read_artifact(Domain::Wiki).await? else {
            return Ok(Exported::nothing(
                "no wiki artifact in bundle; attachments not exported",
            ));
        };
        let pages: BTreeSet<&str> = wiki
            .children_named("page")
            .filter_map(|page| page.attr("name"))
            .collect();

        let artifact = Domain::Attachments.manifest_entry();
        let mut root = ctx.document(ROOT);
        let mut exported = Vec::new();

        for attachment in ctx.project.attachments().await? {
            if !pages.contains(attachment.parent_id.as_str()) {
                continue;
            }
            let dest = file_path(ctx.bundle, &attachment)
                .map_err(|e| BundleError::malformed(artifact, e))?;
            let size = ctx.project.export_attachment(&attachment, &dest).await?;

            root.push(
                Element::new(RECORD)
                    .with_attr("parent_id", attachment.parent_id.as_str())
                    .with_attr("name", attachment.filename.as_str())
                    .with_attr("size", size.to_string())
                    .with_attr("version", attachment.version.to_string())
                    .with_opt_text(attachment.description.as_deref()),
            );
            exported.push(format!("{}/{}", attachment.parent_id, attachment.filename));
        }

        ctx.write_artifact(Domain::Attachments, &root).await?;
        Ok(Exported::new(exported))
    }

    async fn import(&self, ctx: &CodecContext<'_>) -> Result<usize, BundleError> {
        let Some(root) = ctx.read_artifact(Domain::Attachments).await? else {
            return Ok(0);
        };
        let artifact = Domain::Attachments.manifest_entry();
        root.expect_root(ROOT)
            .map_err(|e| BundleError::malformed(artifact, e))?;

        let mut records = Vec::new();
        for element in root.children_named(RECORD) {
            let attachment =
                attachment_from(element).map_err(|e| BundleError::malformed(artifact, e))?;
            let path = file_path(ctx.bundle, &attachment)
                .map_err(|e| BundleError::malformed(artifact, e))?;
            if !tokio::fs::try_exists(&path)
                .await
                .map_err(|e| BundleError::io(&path, e))?
            {
                return Err(BundleError::malformed(
                    artifact,
                    format!(
                        "missing file for {}/{}",
                        attachment.parent_id, attachment.filename
                    ),
                ));
            }
            records.push((attachment, path));
        }

        let mut unit = ctx.project.begin().await?;
        unit.clear(Collection::WikiAttachments).await?;
        for (attachment, path) in &records {
            unit.store_attachment(attachment, path).await?;
        }
        unit.commit().await?;
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::codecs::WikiCodec;
    use crate::bundle::codecs::test_util::Fixture;
    use crate::models::WikiPage;
    use crate::project::MemoryProject;

    fn seed(project: &MemoryProject) {
        project.seed(|state| {
            for name in ["WikiStart", "Empty"] {
                state.wiki.insert(
                    name.into(),
                    WikiPage {
                        name: name.into(),
                        readonly: false,
                        author: None,
                        text: if name == "Empty" { String::new() } else { "body".into() },
                    },
                );
            }
            for (parent, file, content) in [
                ("WikiStart", "logo.png", b"png-bytes".to_vec()),
                ("Empty", "orphan.txt", b"orphan".to_vec()),
            ] {
                state.attachments.insert(
                    (parent.into(), file.into()),
                    (
                        Attachment {
                            parent_id: parent.into(),
                            filename: file.into(),
                            size: content.len() as i64,
                            version: 3,
                            description: Some("company logo".into()),
                        },
                        content,
                    ),
                );
            }
        });
    }

    #[tokio::test]
    async fn only_attachments_of_exported_pages_travel() {
        let fixture = Fixture::new();
        let source = MemoryProject::new("alpha", "/nonexistent");
        seed(&source);

        WikiCodec.export(&fixture.ctx(&source)).await.unwrap();
        let exported = AttachmentCodec.export(&fixture.ctx(&source)).await.unwrap();
        assert_eq!(exported.identifiers, vec!["WikiStart/logo.png"]);
        assert!(fixture.bundle.join("attachments/wiki/WikiStart/logo.png").is_file());
        assert!(!fixture.bundle.join("attachments/wiki/Empty").exists());

        let target = MemoryProject::new("beta", "/nonexistent");
        let applied = AttachmentCodec.import(&fixture.ctx(&target)).await.unwrap();
        assert_eq!(applied, 1);

        let state = target.state();
        let (attachment, content) = &state.attachments[&("WikiStart".to_string(), "logo.png".to_string())];
        assert_eq!(content, b"png-bytes");
        assert_eq!(attachment.version, 3);
        assert_eq!(attachment.description.as_deref(), Some("company logo"));
    }

    #[tokio::test]
    async fn export_without_wiki_artifact_is_a_notice() {
        let fixture = Fixture::new();
        let source = MemoryProject::new("alpha", "/nonexistent");
        seed(&source);

        let exported = AttachmentCodec.export(&fixture.ctx(&source)).await.unwrap();
        assert!(exported.identifiers.is_empty());
        assert!(exported.notice.is_some());
        assert!(!fixture.bundle.join("attachment.xml").exists());
    }

    #[tokio::test]
    async fn traversal_in_artifact_is_rejected() {
        let fixture = Fixture::new();
        std::fs::write(
            fixture.bundle.join("attachment.xml"),
            r#"<attachments><attachment parent_id="../.." name="passwd" size="1"/></attachments>"#,
        )
        .unwrap();
        let target = MemoryProject::new("beta", "/nonexistent");

        let err = AttachmentCodec.import(&fixture.ctx(&target)).await.unwrap_err();
        assert!(matches!(err, BundleError::MalformedArtifact { .. }));
        assert!(target.journal().is_empty());
    }
}
