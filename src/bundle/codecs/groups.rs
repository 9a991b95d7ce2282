//! Groups and the permission grants scoped to them.
//!
//! Both domains share `group.xml`. The group codec writes one `<group>` per
//! project or domain group; the permission codec then rewrites the artifact,
//! nesting `<grant>` records under every exported group and under the virtual
//! principals. Grants held by any other principal (individual users) are not
//! exported.

use super::{CodecContext, DomainCodec, Exported};
use crate::bundle::document::Element;
use crate::bundle::domain::Domain;
use crate::bundle::error::BundleError;
use crate::models::{ANONYMOUS, AUTHENTICATED, Group, GroupKind, PermissionGrant};
use crate::project::Collection;
use std::collections::BTreeMap;

const ROOT: &str = "groups";
const GROUP: &str = "group";
const PRINCIPAL: &str = "principal";
const GRANT: &str = "grant";
/// Root attribute recording that grants were written into the artifact.
const PERMISSIONS_MARK: &str = "permissions";

fn artifact() -> &'static str {
    Domain::Groups.manifest_entry()
}

fn group_from(element: &Element) -> Result<Group, String> {
    let sid = element.required("sid").map_err(|e| e.to_string())?;
    let kind = match element.attr("kind") {
        Some(kind) => kind.parse::<GroupKind>()?,
        None => GroupKind::Project,
    };
    Ok(Group {
        sid: sid.to_string(),
        label: element.attr("label").unwrap_or(sid).to_string(),
        description: element.text().map(str::to_string),
        kind,
    })
}

pub struct GroupCodec;

#[rocket::async_trait]
impl DomainCodec for GroupCodec {
    fn domain(&self) -> Domain {
        Domain::Groups
    }

    async fn export(&self, ctx: &CodecContext<'_>) -> Result<Exported, BundleError> {
        let mut root = ctx.document(ROOT);
        let mut sids = Vec::new();
        for group in ctx.project.groups().await? {
            root.push(
                Element::new(GROUP)
                    .with_attr("sid", group.sid.as_str())
                    .with_attr("label", group.label.as_str())
                    .with_attr("kind", group.kind.as_str())
                    .with_opt_text(group.description.as_deref()),
            );
            sids.push(group.sid);
        }
        ctx.write_artifact(Domain::Groups, &root).await?;
        Ok(Exported::new(sids))
    }

    async fn import(&self, ctx: &CodecContext<'_>) -> Result<usize, BundleError> {
        let Some(root) = ctx.read_artifact(Domain::Groups).await? else {
            return Ok(0);
        };
        root.expect_root(ROOT)
            .map_err(|e| BundleError::malformed(artifact(), e))?;
        let groups = root
            .children_named(GROUP)
            .map(|element| group_from(element).map_err(|e| BundleError::malformed(artifact(), e)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut unit = ctx.project.begin().await?;
        unit.clear(Collection::Groups).await?;
        for group in &groups {
            unit.create_group(group).await?;
        }
        unit.commit().await?;
        Ok(groups.len())
    }
}

pub struct PermissionCodec;

#[rocket::async_trait]
impl DomainCodec for PermissionCodec {
    fn domain(&self) -> Domain {
        Domain::Permissions
    }

    async fn export(&self, ctx: &CodecContext<'_>) -> Result<Exported, BundleError> {
        let Some(mut root) = ctx.read_artifact(Domain::Groups).await? else {
            return Ok(Exported::nothing(
                "no group artifact in bundle; permissions not exported",
            ));
        };
        root.expect_root(ROOT)
            .map_err(|e| BundleError::malformed(artifact(), e))?;

        let mut by_principal: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for grant in ctx.project.permissions().await? {
            by_principal.entry(grant.principal).or_default().push(grant.action);
        }

        let mut exported = Vec::new();
        let mut take = |principal: &str, element: &mut Element| {
            for action in by_principal.remove(principal).unwrap_or_default() {
                exported.push(format!("{principal}:{action}"));
                element.push(Element::new(GRANT).with_attr("action", action));
            }
        };

        for group in root.children.iter_mut().filter(|child| child.name == GROUP) {
            if let Some(sid) = group.attr("sid").map(str::to_string) {
                take(&sid, group);
            }
        }
        for principal in [AUTHENTICATED, ANONYMOUS] {
            let mut element = Element::new(PRINCIPAL).with_attr("name", principal);
            take(principal, &mut element);
            root.push(element);
        }

        if !by_principal.is_empty() {
            log::debug!(
                "not exporting grants of {} unscoped principals",
                by_principal.len()
            );
        }

        root.attributes
            .push((PERMISSIONS_MARK.to_string(), "1".to_string()));
        ctx.write_artifact(Domain::Groups, &root).await?;
        Ok(Exported::new(exported))
    }

    async fn import(&self, ctx: &CodecContext<'_>) -> Result<usize, BundleError> {
        let Some(root) = ctx.read_artifact(Domain::Groups).await? else {
            return Ok(0);
        };
        root.expect_root(ROOT)
            .map_err(|e| BundleError::malformed(artifact(), e))?;
        if !root
            .flag(PERMISSIONS_MARK, false)
            .map_err(|e| BundleError::malformed(artifact(), e))?
        {
            log::info!("group artifact carries no permissions; leaving grants untouched");
            return Ok(0);
        }

        let mut grants = Vec::new();
        for element in &root.children {
            let key = match element.name.as_str() {
                GROUP => "sid",
                PRINCIPAL => "name",
                _ => continue,
            };
            let principal = element
                .required(key)
                .map_err(|e| BundleError::malformed(artifact(), e))?;
            for grant in element.children_named(GRANT) {
                let action = grant
                    .required("action")
                    .map_err(|e| BundleError::malformed(artifact(), e))?;
                grants.push(PermissionGrant::new(principal, action));
            }
        }

        let mut unit = ctx.project.begin().await?;
        unit.clear(Collection::Permissions).await?;
        for grant in &grants {
            unit.grant_permission(grant).await?;
        }
        unit.commit().await?;
        Ok(grants.len())
    }
}
