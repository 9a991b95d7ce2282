//! Milestones, including the parent links between them.
//!
//! Parents are resolved after every milestone of the artifact has been
//! inserted, inside the same unit of work, so a child may precede its parent
//! in the document. A parent that names itself or a milestone missing from the
//! artifact is dropped with a warning.

use super::{CodecContext, DomainCodec, Exported};
use crate::bundle::document::Element;
use crate::bundle::domain::Domain;
use crate::bundle::error::BundleError;
use crate::models::Milestone;
use crate::project::Collection;
use std::collections::BTreeSet;

const ROOT: &str = "milestones";
const RECORD: &str = "milestone";

pub struct MilestoneCodec;

fn milestone_from(element: &Element) -> Result<Milestone, String> {
    let date = |key: &str| element.date(key).map_err(|e| e.to_string());
    Ok(Milestone {
        name: element
            .required("name")
            .map_err(|e| e.to_string())?
            .to_string(),
        start: date("start")?,
        due: date("due")?,
        completed: date("completed")?,
        description: element.text().map(str::to_string),
        parent: element
            .attr("parent")
            .filter(|parent| !parent.is_empty())
            .map(str::to_string),
    })
}

#[rocket::async_trait]
impl DomainCodec for MilestoneCodec {
    fn domain(&self) -> Domain {
        Domain::Milestones
    }

    async fn export(&self, ctx: &CodecContext<'_>) -> Result<Exported, BundleError> {
        let mut root = ctx.document(ROOT);
        let mut names = Vec::new();
        for milestone in ctx.project.milestones().await? {
            root.push(
                Element::new(RECORD)
                    .with_attr("name", milestone.name.as_str())
                    .with_date_attr("start", milestone.start)
                    .with_date_attr("due", milestone.due)
                    .with_date_attr("completed", milestone.completed)
                    .with_opt_attr("parent", milestone.parent.as_deref())
                    .with_opt_text(milestone.description.as_deref()),
            );
            names.push(milestone.name);
        }
        ctx.write_artifact(Domain::Milestones, &root).await?;
        Ok(Exported::new(names))
    }

    async fn import(&self, ctx: &CodecContext<'_>) -> Result<usize, BundleError> {
        let Some(root) = ctx.read_artifact(Domain::Milestones).await? else {
            return Ok(0);
        };
        let artifact = Domain::Milestones.manifest_entry();
        root.expect_root(ROOT)
            .map_err(|e| BundleError::malformed(artifact, e))?;
        let milestones = root
            .children_named(RECORD)
            .map(|element| milestone_from(element).map_err(|e| BundleError::malformed(artifact, e)))
            .collect::<Result<Vec<_>, _>>()?;

        let names: BTreeSet<&str> = milestones.iter().map(|m| m.name.as_str()).collect();

        let mut unit = ctx.project.begin().await?;
        unit.clear(Collection::Milestones).await?;
        for milestone in &milestones {
            let unlinked = Milestone {
                parent: None,
                ..milestone.clone()
            };
            unit.insert_milestone(&unlinked).await?;
        }
        for milestone in &milestones {
            let Some(parent) = milestone.parent.as_deref() else {
                continue;
            };
            if parent == milestone.name || !names.contains(parent) {
                log::warn!(
                    "milestone {}: dropping unresolved parent `{}`",
                    milestone.name,
                    parent
                );
                continue;
            }
            unit.set_milestone_parent(&milestone.name, parent).await?;
        }
        unit.commit().await?;
        Ok(milestones.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::codecs::test_util::Fixture;
    use crate::project::MemoryProject;

    #[tokio::test]
    async fn children_may_precede_their_parent() {
        let fixture = Fixture::new();
        std::fs::write(
            fixture.bundle.join("milestone.xml"),
            r#"<milestones project="alpha" date="2024-01-01">
  <milestone name="m1.1" parent="m1" due="2024-06-30T00:00:00Z">first point release</milestone>
  <milestone name="m1" start="2024-01-01"/>
  <milestone name="orphan" parent="gone"/>
  <milestone name="loop" parent="loop"/>
</milestones>"#,
        )
        .unwrap();
        let target = MemoryProject::new("beta", "/nonexistent");

        assert_eq!(MilestoneCodec.import(&fixture.ctx(&target)).await.unwrap(), 4);

        let state = target.state();
        let parent_of = |name: &str| {
            state
                .milestones
                .iter()
                .find(|m| m.name == name)
                .and_then(|m| m.parent.clone())
        };
        assert_eq!(parent_of("m1.1").as_deref(), Some("m1"));
        assert_eq!(parent_of("orphan"), None);
        assert_eq!(parent_of("loop"), None);
        assert!(state.milestones.iter().any(|m| m.name == "m1" && m.start.is_some()));
    }

    #[tokio::test]
    async fn bad_date_rolls_nothing_in() {
        let fixture = Fixture::new();
        std::fs::write(
            fixture.bundle.join("milestone.xml"),
            r#"<milestones><milestone name="m1" due="someday"/></milestones>"#,
        )
        .unwrap();
        let target = MemoryProject::new("beta", "/nonexistent");
        target.seed(|state| state.milestones.push(Milestone::named("keep")));

        let err = MilestoneCodec.import(&fixture.ctx(&target)).await.unwrap_err();
        assert!(matches!(err, BundleError::MalformedArtifact { ref artifact, .. } if artifact == "milestone"));
        assert_eq!(target.state().milestones, vec![Milestone::named("keep")]);
    }
}
