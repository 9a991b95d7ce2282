//! One codec per domain, registered in a fixed order.
//!
//! A codec writes its domain's artifact on export and replaces the live
//! collection from that artifact on import. Import always happens inside a
//! single unit of work: the collection is cleared, every record is inserted,
//! and the unit is committed. Any early return drops the unit, which rolls it
//! back.

mod attachments;
mod enums;
mod groups;
mod mailing_lists;
mod milestones;
mod tickets;
mod wiki;

pub use attachments::AttachmentCodec;
pub use enums::{ComponentCodec, PriorityCodec, VersionCodec};
pub use groups::{GroupCodec, PermissionCodec};
pub use mailing_lists::MailingListCodec;
pub use milestones::MilestoneCodec;
pub use tickets::{TicketTypeCodec, WorkflowCodec};
pub use wiki::WikiCodec;

use super::archive::ArchiveCodec;
use super::document::{self, Element};
use super::domain::Domain;
use super::error::BundleError;
use super::store::ARTIFACT_SUFFIX;
use crate::config::BundleConfig;
use crate::project::ProjectStore;
use std::path::{Path, PathBuf};

/// Everything a codec needs for one run.
pub struct CodecContext<'a> {
    pub bundle: &'a Path,
    pub bundle_name: &'a str,
    pub project: &'a dyn ProjectStore,
    pub config: &'a BundleConfig,
}

impl CodecContext<'_> {
    /// Path of the structured artifact named `entry`.
    pub fn artifact_path(&self, entry: &str) -> PathBuf {
        self.bundle.join(format!("{entry}.{ARTIFACT_SUFFIX}"))
    }

    /// Read this domain's artifact, if present.
    pub async fn read_artifact(&self, domain: Domain) -> Result<Option<Element>, BundleError> {
        let entry = domain.manifest_entry();
        document::read_document(&self.artifact_path(entry), entry).await
    }

    pub async fn write_artifact(&self, domain: Domain, root: &Element) -> Result<(), BundleError> {
        document::write_document(&self.artifact_path(domain.manifest_entry()), root).await
    }

    /// Fresh document root for a domain artifact.
    pub fn document(&self, root: &str) -> Element {
        Element::document(root, self.project.project_name())
    }
}

/// Result of a successful export of one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exported {
    pub identifiers: Vec<String>,
    /// Informational message, e.g. why nothing was exported.
    pub notice: Option<String>,
}

impl Exported {
    pub fn new(identifiers: Vec<String>) -> Self {
        Self {
            identifiers,
            notice: None,
        }
    }

    pub fn nothing(notice: impl Into<String>) -> Self {
        Self {
            identifiers: Vec::new(),
            notice: Some(notice.into()),
        }
    }
}

#[rocket::async_trait]
pub trait DomainCodec: Send + Sync {
    fn domain(&self) -> Domain;

    /// Serialize the live domain into the bundle.
    async fn export(&self, ctx: &CodecContext<'_>) -> Result<Exported, BundleError>;

    /// Replace the live domain with the bundle's artifact, returning how many
    /// entities were applied. An absent artifact applies nothing.
    async fn import(&self, ctx: &CodecContext<'_>) -> Result<usize, BundleError>;
}

/// All codecs, in export and import order.
pub fn registry() -> Vec<Box<dyn DomainCodec>> {
    let codecs: Vec<Box<dyn DomainCodec>> = vec![
        Box::new(WikiCodec),
        Box::new(AttachmentCodec),
        Box::new(WorkflowCodec),
        Box::new(TicketTypeCodec),
        Box::new(PriorityCodec),
        Box::new(VersionCodec),
        Box::new(ComponentCodec),
        Box::new(ArchiveCodec),
        Box::new(GroupCodec),
        Box::new(PermissionCodec),
        Box::new(MailingListCodec),
        Box::new(MilestoneCodec),
    ];
    debug_assert!(codecs.iter().map(|c| c.domain()).eq(Domain::ALL));
    codecs
}

/// Whether `value` can be used as a single path component inside a bundle.
pub(crate) fn is_safe_component(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', '\0'])
}

/// Whether `value` is a relative path of safe components, such as a
/// hierarchical wiki page name.
pub(crate) fn is_safe_relative(value: &str) -> bool {
    !value.is_empty() && value.split('/').all(is_safe_component)
}
