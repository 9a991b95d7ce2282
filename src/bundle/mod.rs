//! The bundle engine.
//!
//! A bundle is a named directory holding one artifact per exported domain and
//! a metadata record. [`Exporter`] writes bundles from a live project,
//! [`Importer`] replays them, and [`BundleStore`] lists and describes them.

pub mod archive;
pub mod codecs;
pub mod document;
pub mod domain;
pub mod error;
pub mod export;
pub mod import;
pub mod report;
pub mod service;
pub mod store;

pub use archive::ArchivePipeline;
pub use codecs::{CodecContext, DomainCodec, Exported, registry};
pub use domain::{Domain, Flag, Selection};
pub use error::BundleError;
pub use export::{ExportRequest, Exporter};
pub use import::Importer;
pub use report::{
    DomainStatus, DomainSummary, ExportOutcome, ExportReport, ExportSummary, ImportOutcome,
    ImportReport, ImportSummary,
};
pub use service::BundleService;
pub use store::{BundleInfo, BundleMetadata, BundleStore};
