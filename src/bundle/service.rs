//! Shared entry point used by the HTTP routes and the CLI.

use super::error::BundleError;
use super::export::{ExportRequest, Exporter};
use super::import::Importer;
use super::report::{ExportReport, ImportReport};
use super::store::{BundleInfo, BundleStore};
use crate::config::BundleConfig;
use crate::project::ProjectStore;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct BundleService {
    config: BundleConfig,
    project: Arc<dyn ProjectStore>,
    /// Imports replace live state, so only one runs at a time.
    import_lock: Mutex<()>,
}

impl BundleService {
    pub fn new(config: BundleConfig, project: Arc<dyn ProjectStore>) -> Self {
        Self {
            config,
            project,
            import_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    pub fn project(&self) -> &dyn ProjectStore {
        self.project.as_ref()
    }

    fn store(&self) -> BundleStore {
        BundleStore::new(self.config.store_root.clone())
    }

    pub fn list(&self) -> Result<Vec<String>, BundleError> {
        self.store().list()
    }

    pub fn info(&self, name: &str) -> Result<BundleInfo, BundleError> {
        self.store().read_metadata(name)
    }

    pub async fn export(&self, request: &ExportRequest) -> Result<ExportReport, BundleError> {
        Exporter::new(&self.config, self.project.as_ref())
            .export(request)
            .await
    }

    pub async fn import(&self, name: &str) -> Result<ImportReport, BundleError> {
        let _guard = self.import_lock.lock().await;
        Importer::new(&self.config, self.project.as_ref())
            .import(name)
            .await
    }
}
