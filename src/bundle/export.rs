use super::codecs::{CodecContext, DomainCodec, registry};
use super::domain::Selection;
use super::error::BundleError;
use super::report::ExportReport;
use super::store::{BundleMetadata, BundleStore};
use crate::config::BundleConfig;
use crate::project::ProjectStore;

/// What to export and how to label the bundle.
#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    pub name: String,
    pub author: String,
    pub description: String,
    pub selection: Selection,
}

/// Writes a new bundle from the live project.
pub struct Exporter<'a> {
    store: BundleStore,
    config: &'a BundleConfig,
    project: &'a dyn ProjectStore,
    codecs: Vec<Box<dyn DomainCodec>>,
}

impl<'a> Exporter<'a> {
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

    /// Export the selected domains into a new bundle.
    ///
    /// Only creating the bundle can fail the call as a whole (invalid name or
    /// name conflict). Each domain's outcome is recorded in the report, and
    /// the metadata record is written last whatever the domains did.
    pub async fn export(&self, request: &ExportRequest) -> Result<ExportReport, BundleError> {
        let bundle = self.store.create(&request.name)?;
        log::info!(
            "exporting project {} into bundle {}",
            self.project.project_name(),
            request.name
        );

        let ctx = CodecContext {
            bundle: &bundle,
            bundle_name: &request.name,
            project: self.project,
            config: self.config,
        };

        let mut report = ExportReport::new(&request.name);
        for codec in &self.codecs {
            let domain = codec.domain();
            if !request.selection.includes(domain) {
                continue;
            }
            let result = codec.export(&ctx).await;
            match &result {
                Ok(exported) => log::info!(
                    "bundle {}: exported {} {}",
                    request.name,
                    exported.identifiers.len(),
                    domain
                ),
                Err(err) => log::warn!("bundle {}: {} export failed: {}", request.name, domain, err),
            }
            report.record(domain, result);
        }

        let metadata = BundleMetadata::new(
            &request.name,
            self.project.project_name(),
            &request.author,
            &request.description,
        );
        if let Err(err) = self.store.write_metadata(&bundle, &metadata) {
            log::error!("bundle {}: failed to write metadata: {}", request.name, err);
            report.metadata_error = Some(err);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::codecs::Exported;
    use crate::bundle::codecs::test_util::config;
    use crate::bundle::domain::Domain;
    use crate::bundle::report::ExportOutcome;
    use crate::bundle::store::METADATA_FILE;
    use crate::project::MemoryProject;
    use tempfile::TempDir;

    struct Stub {
        domain: Domain,
        fail: bool,
    }

    #[rocket::async_trait]
    impl DomainCodec for Stub {
        fn domain(&self) -> Domain {
            self.domain
        }

        async fn export(&self, _ctx: &CodecContext<'_>) -> Result<Exported, BundleError> {
            if self.fail {
                Err(BundleError::ExternalToolFailure("boom".into()))
            } else {
                Ok(Exported::new(vec![self.domain.to_string()]))
            }
        }

        async fn import(&self, _ctx: &CodecContext<'_>) -> Result<usize, BundleError> {
            Ok(0)
        }
    }

    fn request(name: &str, selection: Selection) -> ExportRequest {
        ExportRequest {
            name: name.into(),
            author: "admin".into(),
            description: "baseline".into(),
            selection,
        }
    }

    #[tokio::test]
    async fn no_flags_yields_metadata_only_bundle() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let project = MemoryProject::new("alpha", "/nonexistent");

        let report = Exporter::new(&config, &project)
            .export(&request("empty", Selection::default()))
            .await
            .unwrap();
        assert!(report.outcomes.is_empty());
        assert!(report.is_success());

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("empty"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![METADATA_FILE]);
    }

    #[tokio::test]
    async fn failing_domain_does_not_stop_later_domains() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let project = MemoryProject::new("alpha", "/nonexistent");
        let codecs: Vec<Box<dyn DomainCodec>> = vec![
            Box::new(Stub { domain: Domain::Archive, fail: true }),
            Box::new(Stub { domain: Domain::Groups, fail: false }),
            Box::new(Stub { domain: Domain::Milestones, fail: false }),
        ];

        let report = Exporter::new(&config, &project)
            .with_codecs(codecs)
            .export(&request("partial", Selection::from_flags(["archive", "group"]).unwrap()))
            .await
            .unwrap();

        assert!(matches!(report.outcomes[&Domain::Archive], ExportOutcome::Failed(_)));
        assert!(matches!(report.outcomes[&Domain::Groups], ExportOutcome::Exported(_)));
        assert!(!report.outcomes.contains_key(&Domain::Milestones));
        assert!(dir.path().join("partial").join(METADATA_FILE).is_file());
    }

    #[tokio::test]
    async fn existing_name_blocks_before_any_codec_runs() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let project = MemoryProject::new("alpha", "/nonexistent");
        let exporter = Exporter::new(&config, &project);

        exporter.export(&request("base", Selection::all())).await.unwrap();
        let err = exporter.export(&request("base", Selection::all())).await.unwrap_err();
        assert!(matches!(err, BundleError::NameConflict(_)));

        let err = exporter.export(&request("../etc", Selection::all())).await.unwrap_err();
        assert!(matches!(err, BundleError::InvalidName(_)));
        assert!(!dir.path().join("etc").exists());
    }
}
