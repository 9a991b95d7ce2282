use crate::project::StoreError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by the bundle engine.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("invalid bundle name `{0}`: use letters, digits and hyphens (at most 64)")]
    InvalidName(String),
    #[error("bundle `{0}` already exists")]
    NameConflict(String),
    #[error("bundle `{0}` not found")]
    NotFound(String),
    #[error("malformed artifact {artifact}: {reason}")]
    MalformedArtifact { artifact: String, reason: String },
    #[error("external tool failed: {0}")]
    ExternalToolFailure(String),
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BundleError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        BundleError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn malformed(artifact: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        BundleError::MalformedArtifact {
            artifact: artifact.into(),
            reason: reason.to_string(),
        }
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            BundleError::InvalidName(_) => "InvalidName",
            BundleError::NameConflict(_) => "NameConflict",
            BundleError::NotFound(_) => "NotFound",
            BundleError::MalformedArtifact { .. } => "MalformedArtifact",
            BundleError::ExternalToolFailure(_) => "ExternalToolFailure",
            BundleError::Io { .. } => "IOFailure",
            BundleError::Store(_) => "StoreFailure",
        }
    }
}
