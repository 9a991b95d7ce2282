use super::codecs::{CodecContext, DomainCodec, registry};
use super::error::BundleError;
use super::report::ImportReport;
use super::store::BundleStore;
use crate::config::BundleConfig;
use crate::project::ProjectStore;

/// Replays a bundle into the live project.
pub struct Importer<'a> {
    store: BundleStore,
    config: &'a BundleConfig,
    project: &'a dyn ProjectStore,
    codecs: Vec<Box<dyn DomainCodec>>,
}

impl<'a> Importer<'a> {
    pub fn new(config: &'a BundleConfig, project: &'a dyn ProjectStore) -> Self {
        Self {
            store: BundleStore::new(config.store_root.clone()),
            config,
            project,
            codecs: registry(),
        }
    }

    /// Replace the codec registry. The codecs must already be in run order.
    pub fn with_codecs(mut self, codecs: Vec<Box<dyn DomainCodec>>) -> Self {
        self.codecs = codecs;
        self
    }

    /// Import every domain present in the bundle's manifest, in registry order.
    ///
    /// A failing domain is recorded and the remaining domains still run. Only
    /// an unknown bundle fails the call as a whole.
    pub async fn import(&self, name: &str) -> Result<ImportReport, BundleError> {
        let bundle = self.store.resolve(name)?;
        let manifest = self.store.manifest(name)?;
        log::info!(
            "importing bundle {} into project {} (components: {})",
            name,
            self.project.project_name(),
            manifest.iter().cloned().collect::<Vec<_>>().join(", ")
        );

        let ctx = CodecContext {
            bundle: &bundle,
            bundle_name: name,
            project: self.project,
            config: self.config,
        };

        let mut report = ImportReport::new(name);
        for codec in &self.codecs {
            let domain = codec.domain();
            if !manifest.contains(domain.manifest_entry()) {
                continue;
            }
            let result = codec.import(&ctx).await;
            match &result {
                Ok(applied) => log::info!("bundle {}: applied {} {}", name, applied, domain),
                Err(err) => log::warn!("bundle {}: {} import failed: {}", name, domain, err),
            }
            report.record(domain, result);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::codecs::test_util::config;
    use crate::bundle::domain::Domain;
    use crate::models::{Group, GroupKind, Milestone};
    use crate::project::MemoryProject;
    use tempfile::TempDir;

    #[tokio::test]
    async fn malformed_milestones_do_not_block_groups() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let bundle = dir.path().join("mixed");
        std::fs::create_dir(&bundle).unwrap();
        std::fs::write(
            bundle.join("group.xml"),
            r#"<groups project="alpha" date="2024-01-01"><group sid="qa" label="QA" kind="project"/></groups>"#,
        )
        .unwrap();
        std::fs::write(bundle.join("milestone.xml"), "<milestones><milestone name=\"m1\">").unwrap();

        let target = MemoryProject::new("beta", "/nonexistent");
        target.seed(|state| state.milestones.push(Milestone::named("existing")));

        let report = Importer::new(&config, &target).import("mixed").await.unwrap();
        assert_eq!(report.applied(Domain::Groups), Some(1));
        assert_eq!(report.applied(Domain::Permissions), Some(0));
        assert!(report.failures().any(|(domain, _)| domain == Domain::Milestones));
        assert!(!report.outcomes.contains_key(&Domain::Wiki));

        let state = target.state();
        assert_eq!(
            state.groups.get("qa"),
            Some(&Group {
                sid: "qa".into(),
                label: "QA".into(),
                description: None,
                kind: GroupKind::Project,
            })
        );
        assert_eq!(state.milestones, vec![Milestone::named("existing")]);
    }

    #[tokio::test]
    async fn unknown_bundle_is_not_found() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let target = MemoryProject::new("beta", "/nonexistent");

        let err = Importer::new(&config, &target).import("ghost").await.unwrap_err();
        assert!(matches!(err, BundleError::NotFound(_)));
        assert!(target.journal().is_empty());
    }
}
