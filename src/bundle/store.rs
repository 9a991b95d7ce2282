//! Filesystem registry of bundles.
//!
//! Each bundle is one directory under the store root. The directory is created
//! exclusively, which is also the only exclusion between concurrent exports.

use super::error::BundleError;
use chrono::Utc;
use regex::Regex;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Name of the metadata record inside a bundle directory.
pub const METADATA_FILE: &str = "info.json";
/// Suffix of structured domain artifacts.
pub const ARTIFACT_SUFFIX: &str = "xml";
/// Suffix of the compressed repository archive.
pub const ARCHIVE_SUFFIX: &str = "archive";
/// Manifest entry reported for the archive file.
pub const ARCHIVE_ENTRY: &str = "archive";

/// Timestamp layout of the `created` field.
pub const CREATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static NAME_REGEX: OnceLock<Regex> = OnceLock::new();

fn name_regex() -> &'static Regex {
    NAME_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]{0,63}$").expect("Invalid bundle name regex")
    })
}

/// Whether `name` is acceptable as a bundle name.
pub fn is_valid_name(name: &str) -> bool {
    name_regex().is_match(name)
}

fn validate_name(name: &str) -> Result<(), BundleError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(BundleError::InvalidName(name.to_string()))
    }
}

/// The metadata record written at the end of every export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BundleMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
}

impl BundleMetadata {
    /// Build a record stamped with the current time.
    pub fn new(
        name: impl Into<String>,
        project: impl Into<String>,
        author: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            project: project.into(),
            created: Utc::now().format(CREATED_FORMAT).to_string(),
            author: author.into(),
            description: description.into(),
        }
    }
}

/// Metadata plus the component manifest computed when it was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BundleInfo {
    #[serde(flatten)]
    pub metadata: BundleMetadata,
    pub components: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BundleStore {
    root: Option<PathBuf>,
}

impl BundleStore {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn require_root(&self) -> Result<&Path, BundleError> {
        self.root.as_deref().ok_or_else(|| {
            BundleError::io(
                "",
                io::Error::new(io::ErrorKind::NotFound, "bundle store root is not configured"),
            )
        })
    }

    /// Create the directory for a new bundle.
    ///
    /// The name is validated before anything touches the filesystem, and the
    /// final directory creation is exclusive: an existing bundle of the same
    /// name yields [`BundleError::NameConflict`].
    pub fn create(&self, name: &str) -> Result<PathBuf, BundleError> {
        validate_name(name)?;
        let root = self.require_root()?;
        fs::create_dir_all(root).map_err(|e| BundleError::io(root, e))?;

        let path = root.join(name);
        match fs::create_dir(&path) {
            Ok(()) => {
                log::info!("created bundle directory {}", path.display());
                Ok(path)
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Err(BundleError::NameConflict(name.to_string()))
            }
            Err(err) => Err(BundleError::io(&path, err)),
        }
    }

    /// Names of every bundle in the store, sorted.
    pub fn list(&self) -> Result<Vec<String>, BundleError> {
        let Some(root) = self.root.as_deref() else {
            return Ok(Vec::new());
        };
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(BundleError::io(root, err)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BundleError::io(root, e))?;
            let file_type = entry.file_type().map_err(|e| BundleError::io(entry.path(), e))?;
            if !file_type.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if is_valid_name(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Path of an existing bundle.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, BundleError> {
        validate_name(name)?;
        let Some(root) = self.root.as_deref() else {
            return Err(BundleError::NotFound(name.to_string()));
        };
        let path = root.join(name);
        if path.is_dir() {
            Ok(path)
        } else {
            Err(BundleError::NotFound(name.to_string()))
        }
    }

    /// Domain identifiers present in a bundle, derived from its directory listing.
    pub fn manifest(&self, name: &str) -> Result<BTreeSet<String>, BundleError> {
        let path = self.resolve(name)?;
        manifest_of(&path)
    }

    /// Read a bundle's metadata record and compute its manifest.
    ///
    /// A missing or unparsable record yields empty fields rather than an error.
    pub fn read_metadata(&self, name: &str) -> Result<BundleInfo, BundleError> {
        let path = self.resolve(name)?;
        let record_path = path.join(METADATA_FILE);

        let metadata = match fs::read(&record_path) {
            Ok(bytes) => serde_json::from_slice::<BundleMetadata>(&bytes).unwrap_or_else(|err| {
                log::warn!("unparsable metadata in {}: {}", record_path.display(), err);
                BundleMetadata::default()
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::warn!("bundle {} has no metadata record", name);
                BundleMetadata::default()
            }
            Err(err) => return Err(BundleError::io(&record_path, err)),
        };

        let components = manifest_of(&path)?.into_iter().collect();
        Ok(BundleInfo {
            metadata,
            components,
        })
    }

    /// Write the metadata record into a bundle directory.
    pub fn write_metadata(&self, bundle: &Path, metadata: &BundleMetadata) -> Result<(), BundleError> {
        let record_path = bundle.join(METADATA_FILE);
        let json = serde_json::to_vec_pretty(metadata)
            .map_err(|e| BundleError::io(&record_path, io::Error::other(e)))?;
        fs::write(&record_path, json).map_err(|e| BundleError::io(&record_path, e))
    }
}

fn manifest_of(path: &Path) -> Result<BTreeSet<String>, BundleError> {
    let entries = fs::read_dir(path).map_err(|e| BundleError::io(path, e))?;

    let mut components = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|e| BundleError::io(path, e))?;
        let entry_path = entry.path();
        let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if file_name.starts_with('.') {
            continue;
        }

        if entry_path.is_dir() {
            components.insert(file_name);
            continue;
        }

        let extension = entry_path.extension().and_then(|ext| ext.to_str());
        let stem = entry_path.file_stem().and_then(|stem| stem.to_str());
        match (extension, stem) {
            (Some(ARTIFACT_SUFFIX), Some(stem)) => {
                components.insert(stem.to_string());
            }
            (Some(ARCHIVE_SUFFIX), Some(_)) => {
                components.insert(ARCHIVE_ENTRY.to_string());
            }
            _ => {}
        }
    }
    Ok(components)
}
