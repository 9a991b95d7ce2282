#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use project_bundles::config::{ArchiveConfig, BundleConfig};

/// Archive tool that is never expected to run.
pub fn inert_archive() -> ArchiveConfig {
    ArchiveConfig {
        program: PathBuf::from("false"),
        dump_args: Vec::new(),
        load_args: Vec::new(),
        chunk_size: 4096,
        timeout: Duration::from_secs(5),
    }
}

/// Archive tool built from `sh -c` scripts. The repository placeholder in a
/// script is replaced by the repository path before it runs.
pub fn shell_archive(dump: &str, load: &str, timeout: Duration) -> ArchiveConfig {
    let script = |body: &str| vec!["-c".to_string(), body.to_string()];
    ArchiveConfig {
        program: PathBuf::from("sh"),
        dump_args: script(dump),
        load_args: script(load),
        chunk_size: 1024,
        timeout,
    }
}

pub fn bundle_config(store: &Path, project: &str, archive: ArchiveConfig) -> BundleConfig {
    BundleConfig {
        store_root: Some(store.to_path_buf()),
        project_name: project.to_string(),
        project_env: store.join("env").join(project),
        repository_root: store.join("repos"),
        archive,
    }
}
