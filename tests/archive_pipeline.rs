#![cfg(unix)]

mod common;

use std::io::Read;
use std::time::{Duration, Instant};

use flate2::read::GzDecoder;
use project_bundles::bundle::{ArchivePipeline, BundleError};
use tempfile::TempDir;

fn repo_with_dump(dir: &TempDir, content: &[u8]) -> std::path::PathBuf {
    let repo = dir.path().join("repo");
    std::fs::create_dir(&repo).unwrap();
    std::fs::write(repo.join("dump"), content).unwrap();
    repo
}

#[tokio::test]
async fn dump_and_load_round_trip_through_the_tool() {
    let dir = TempDir::new().unwrap();
    let payload: Vec<u8> = (0..50_000u32).flat_map(|i| i.to_be_bytes()).collect();
    let repo = repo_with_dump(&dir, &payload);
    let config = common::shell_archive(
        "cat '{repo}/dump'",
        "cat > '{repo}/restored'",
        Duration::from_secs(10),
    );
    let pipeline = ArchivePipeline::new(&config);
    let archive = dir.path().join("base.archive");

    let dumped = pipeline.dump(&repo, &archive).await.unwrap();
    assert_eq!(dumped, Some(payload.len() as u64));

    let mut decoded = Vec::new();
    GzDecoder::new(std::fs::File::open(&archive).unwrap())
        .read_to_end(&mut decoded)
        .unwrap();
    assert_eq!(decoded, payload);

    let loaded = pipeline.load(&archive, &repo).await.unwrap();
    assert_eq!(loaded, Some(payload.len() as u64));
    assert_eq!(std::fs::read(repo.join("restored")).unwrap(), payload);
}

#[tokio::test]
async fn failing_dump_reports_diagnostics_and_leaves_no_archive() {
    let dir = TempDir::new().unwrap();
    let repo = repo_with_dump(&dir, b"partial");
    let config = common::shell_archive(
        "cat '{repo}/dump'; echo 'repository is locked' >&2; exit 3",
        "cat > /dev/null",
        Duration::from_secs(10),
    );
    let archive = dir.path().join("base.archive");

    let err = ArchivePipeline::new(&config)
        .dump(&repo, &archive)
        .await
        .unwrap_err();
    match err {
        BundleError::ExternalToolFailure(message) => {
            assert!(message.contains("repository is locked"), "{message}")
        }
        other => panic!("expected tool failure, got {other:?}"),
    }
    assert!(!archive.exists());
}

#[tokio::test]
async fn hung_tool_times_out() {
    let dir = TempDir::new().unwrap();
    let repo = repo_with_dump(&dir, b"");
    let config = common::shell_archive("exec sleep 30", "exec sleep 30", Duration::from_secs(1));
    let archive = dir.path().join("base.archive");

    let started = Instant::now();
    let err = ArchivePipeline::new(&config)
        .dump(&repo, &archive)
        .await
        .unwrap_err();
    assert!(matches!(err, BundleError::ExternalToolFailure(ref m) if m.contains("timed out")));
    assert!(started.elapsed() < Duration::from_secs(20));
    assert!(!archive.exists());
}

#[tokio::test]
async fn corrupt_archive_is_malformed_not_a_tool_failure() {
    let dir = TempDir::new().unwrap();
    let repo = repo_with_dump(&dir, b"");
    let config = common::shell_archive("true", "cat > /dev/null", Duration::from_secs(10));
    let archive = dir.path().join("base.archive");
    std::fs::write(&archive, b"definitely not gzip data").unwrap();

    let err = ArchivePipeline::new(&config)
        .load(&archive, &repo)
        .await
        .unwrap_err();
    assert!(
        matches!(err, BundleError::MalformedArtifact { .. }),
        "unexpected error: {err:?}"
    );
}
