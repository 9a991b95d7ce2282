//! Ticket field enumerations: priorities, versions and components.

use super::{CodecContext, DomainCodec, Exported};
use crate::bundle::document::Element;
use crate::bundle::domain::Domain;
use crate::bundle::error::BundleError;
use crate::models::{Component, Priority, Version};
use crate::project::Collection;

fn malformed(domain: Domain) -> impl Fn(String) -> BundleError {
    move |reason| BundleError::malformed(domain.manifest_entry(), reason)
}

/// Parse every `record` child of the domain artifact with `parse`.
async fn read_records<T>(
    ctx: &CodecContext<'_>,
    domain: Domain,
    root_name: &str,
    record: &str,
    parse: impl Fn(&Element) -> Result<T, String>,
) -> Result<Option<Vec<T>>, BundleError> {
    let Some(root) = ctx.read_artifact(domain).await? else {
        return Ok(None);
    };
    root.expect_root(root_name)
        .map_err(|e| malformed(domain)(e.to_string()))?;
    root.children_named(record)
        .map(|element| parse(element).map_err(malformed(domain)))
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

pub struct PriorityCodec;

#[rocket::async_trait]
impl DomainCodec for PriorityCodec {
    fn domain(&self) -> Domain {
        Domain::Priorities
    }

    async fn export(&self, ctx: &CodecContext<'_>) -> Result<Exported, BundleError> {
        let mut root = ctx.document("priorities");
        let mut names = Vec::new();
        for priority in ctx.project.priorities().await? {
            root.push(
                Element::new("priority")
                    .with_attr("name", priority.name.as_str())
                    .with_attr("value", priority.value.to_string()),
            );
            names.push(priority.name);
        }
        ctx.write_artifact(self.domain(), &root).await?;
        Ok(Exported::new(names))
    }

    async fn import(&self, ctx: &CodecContext<'_>) -> Result<usize, BundleError> {
        let parse = |element: &Element| -> Result<Priority, String> {
            let name = element.required("name").map_err(|e| e.to_string())?;
            let value = element
                .parsed::<i32>("value")
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("priority `{name}` has no value"))?;
            Ok(Priority {
                name: name.to_string(),
                value,
            })
        };
        let Some(priorities) =
            read_records(ctx, self.domain(), "priorities", "priority", parse).await?
        else {
            return Ok(0);
        };

        let mut unit = ctx.project.begin().await?;
        unit.clear(Collection::Priorities).await?;
        for priority in &priorities {
            unit.insert_priority(priority).await?;
        }
        unit.commit().await?;
        Ok(priorities.len())
    }
}

pub struct VersionCodec;

#[rocket::async_trait]
impl DomainCodec for VersionCodec {
    fn domain(&self) -> Domain {
        Domain::Versions
    }

    async fn export(&self, ctx: &CodecContext<'_>) -> Result<Exported, BundleError> {
        let mut root = ctx.document("versions");
        let mut names = Vec::new();
        for version in ctx.project.versions().await? {
            root.push(
                Element::new("version")
                    .with_attr("name", version.name.as_str())
                    .with_date_attr("time", version.time)
                    .with_opt_text(version.description.as_deref()),
            );
            names.push(version.name);
        }
        ctx.write_artifact(self.domain(), &root).await?;
        Ok(Exported::new(names))
    }

    async fn import(&self, ctx: &CodecContext<'_>) -> Result<usize, BundleError> {
        let parse = |element: &Element| -> Result<Version, String> {
            Ok(Version {
                name: element.required("name").map_err(|e| e.to_string())?.to_string(),
                time: element.date("time").map_err(|e| e.to_string())?,
                description: element.text().map(str::to_string),
            })
        };
        let Some(versions) = read_records(ctx, self.domain(), "versions", "version", parse).await?
        else {
            return Ok(0);
        };

        let mut unit = ctx.project.begin().await?;
        unit.clear(Collection::Versions).await?;
        for version in &versions {
            unit.insert_version(version).await?;
        }
        unit.commit().await?;
        Ok(versions.len())
    }
}

pub struct ComponentCodec;

#[rocket::async_trait]
impl DomainCodec for ComponentCodec {
    fn domain(&self) -> Domain {
        Domain::Components
    }

    async fn export(&self, ctx: &CodecContext<'_>) -> Result<Exported, BundleError> {
        let mut root = ctx.document("components");
        let mut names = Vec::new();
        for component in ctx.project.components().await? {
            root.push(
                Element::new("component")
                    .with_attr("name", component.name.as_str())
                    .with_opt_attr("owner", component.owner.as_deref())
                    .with_opt_text(component.description.as_deref()),
            );
            names.push(component.name);
        }
        ctx.write_artifact(self.domain(), &root).await?;
        Ok(Exported::new(names))
    }

    async fn import(&self, ctx: &CodecContext<'_>) -> Result<usize, BundleError> {
        let parse = |element: &Element| -> Result<Component, String> {
            Ok(Component {
                name: element.required("name").map_err(|e| e.to_string())?.to_string(),
                owner: element.attr("owner").map(str::to_string),
                description: element.text().map(str::to_string),
            })
        };
        let Some(components) =
            read_records(ctx, self.domain(), "components", "component", parse).await?
        else {
            return Ok(0);
        };

        let mut unit = ctx.project.begin().await?;
        unit.clear(Collection::Components).await?;
        for component in &components {
            unit.insert_component(component).await?;
        }
        unit.commit().await?;
        Ok(components.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::codecs::test_util::Fixture;
    use crate::project::MemoryProject;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn enumerations_replace_live_values() {
        let fixture = Fixture::new();
        let source = MemoryProject::new("alpha", "/nonexistent");
        source.seed(|state| {
            state.priorities = vec![
                Priority { name: "blocker".into(), value: 1 },
                Priority { name: "minor".into(), value: 4 },
            ];
            state.versions = vec![Version {
                name: "1.0".into(),
                time: Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()),
                description: Some("first release".into()),
            }];
            state.components = vec![Component {
                name: "core".into(),
                owner: Some("ada".into()),
                description: None,
            }];
        });

        for codec in [&PriorityCodec as &dyn DomainCodec, &VersionCodec, &ComponentCodec] {
            codec.export(&fixture.ctx(&source)).await.unwrap();
        }

        let target = MemoryProject::new("beta", "/nonexistent");
        target.seed(|state| {
            state.priorities = vec![Priority { name: "legacy".into(), value: 9 }];
        });
        assert_eq!(PriorityCodec.import(&fixture.ctx(&target)).await.unwrap(), 2);
        assert_eq!(VersionCodec.import(&fixture.ctx(&target)).await.unwrap(), 1);
        assert_eq!(ComponentCodec.import(&fixture.ctx(&target)).await.unwrap(), 1);

        let (source, target) = (source.state(), target.state());
        assert_eq!(target.priorities, source.priorities);
        assert_eq!(target.versions, source.versions);
        assert_eq!(target.components, source.components);
    }

    #[tokio::test]
    async fn priority_without_value_is_malformed() {
        let fixture = Fixture::new();
        std::fs::write(
            fixture.bundle.join("priority.xml"),
            r#"<priorities><priority name="urgent"/></priorities>"#,
        )
        .unwrap();
        let target = MemoryProject::new("beta", "/nonexistent");

        let err = PriorityCodec.import(&fixture.ctx(&target)).await.unwrap_err();
        assert!(matches!(err, BundleError::MalformedArtifact { ref artifact, .. } if artifact == "priority"));
    }
}
