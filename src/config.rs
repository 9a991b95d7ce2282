//! Runtime configuration for the bundle engine.
//!
//! Values are read once from the environment and handed to the export and
//! import orchestrators at construction time.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Placeholder replaced by the repository path in archive tool arguments.
pub const REPO_PLACEHOLDER: &str = "{repo}";

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

fn env_args(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => {
            value.split_whitespace().map(str::to_string).collect()
        }
        _ => default.iter().map(|arg| arg.to_string()).collect(),
    }
}

/// How the external archive tool is invoked.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub program: PathBuf,
    pub dump_args: Vec<String>,
    pub load_args: Vec<String>,
    /// Size of each chunk moved between the tool and the compressor.
    pub chunk_size: usize,
    pub timeout: Duration,
}

impl ArchiveConfig {
    pub fn from_env() -> Self {
        Self {
            program: PathBuf::from(env_string("ARCHIVE_TOOL", "svnadmin")),
            dump_args: env_args("ARCHIVE_DUMP_ARGS", &["dump", "-r", "HEAD", REPO_PLACEHOLDER]),
            load_args: env_args("ARCHIVE_LOAD_ARGS", &["load", REPO_PLACEHOLDER]),
            chunk_size: env_usize("ARCHIVE_CHUNK_SIZE", 64 * 1024),
            timeout: env_duration_secs("ARCHIVE_TIMEOUT_SECS", 30 * 60),
        }
    }

    /// Expand the repository placeholder in an argument template.
    pub fn expand_args(template: &[String], repo: &Path) -> Vec<String> {
        let repo = repo.to_string_lossy();
        template
            .iter()
            .map(|arg| arg.replace(REPO_PLACEHOLDER, &repo))
            .collect()
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Configuration shared by the bundle store and both orchestrators.
#[derive(Debug, Clone)]
pub struct BundleConfig {
    /// Directory holding one subdirectory per bundle. `None` when unset.
    pub store_root: Option<PathBuf>,
    /// Name of the project this process exports from and imports into.
    pub project_name: String,
    /// Project environment directory (attachment files live below it).
    pub project_env: PathBuf,
    /// Directory containing one version-control repository per project.
    pub repository_root: PathBuf,
    pub archive: ArchiveConfig,
}

impl BundleConfig {
    pub fn from_env() -> Self {
        let store_root = match env::var("BUNDLE_STORE_PATH") {
            Ok(value) if value.trim().is_empty() => None,
            Ok(value) => Some(PathBuf::from(value)),
            Err(_) => Some(PathBuf::from("/var/define/templates")),
        };
        let project_name = env_string("PROJECT_NAME", "project");
        let project_env = env::var("PROJECT_ENV_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("projects").join(&project_name));

        Self {
            store_root,
            project_name,
            project_env,
            repository_root: PathBuf::from(env_string("REPOSITORY_ROOT", "vc-repos/svn")),
            archive: ArchiveConfig::from_env(),
        }
    }

    /// Location of the repository belonging to `project`.
    pub fn repository_path(&self, project: &str) -> PathBuf {
        self.repository_root.join(project)
    }
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_args_substitutes_repository_path() {
        let template = vec![
            "dump".to_string(),
            "-r".to_string(),
            "HEAD".to_string(),
            REPO_PLACEHOLDER.to_string(),
        ];
        let args = ArchiveConfig::expand_args(&template, Path::new("/srv/repos/alpha"));
        assert_eq!(args, vec!["dump", "-r", "HEAD", "/srv/repos/alpha"]);
    }

    #[test]
    fn repository_path_joins_project_name() {
        let config = BundleConfig {
            store_root: None,
            project_name: "alpha".into(),
            project_env: PathBuf::from("projects/alpha"),
            repository_root: PathBuf::from("vc-repos/svn"),
            archive: ArchiveConfig {
                program: PathBuf::from("svnadmin"),
                dump_args: Vec::new(),
                load_args: Vec::new(),
                chunk_size: 1024,
                timeout: Duration::from_secs(1),
            },
        };
        assert_eq!(
            config.repository_path("alpha"),
            PathBuf::from("vc-repos/svn/alpha")
        );
    }
}
