//! Repository archive pipeline.
//!
//! The version-control dump is produced and consumed by an external tool. On
//! export its stdout is compressed into `<bundle>.archive` in fixed-size
//! chunks; on import the archive is decompressed the same way into the tool's
//! stdin. The compression runs on a blocking thread bridged to the child's
//! pipes, so the payload is never held in memory. Diagnostics on stderr are
//! drained concurrently and logged.

use super::codecs::{CodecContext, DomainCodec, Exported};
use super::domain::Domain;
use super::error::BundleError;
use super::store::ARCHIVE_SUFFIX;
use crate::config::ArchiveConfig;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::io::SyncIoBridge;

/// Diagnostics kept for error messages; everything is still logged.
const MAX_DIAGNOSTICS: usize = 8 * 1024;

/// Which end of a copy loop failed.
#[derive(Debug)]
enum CopyError {
    Read(io::Error),
    Write(io::Error),
}

/// Copy `reader` into `writer` through a buffer of `chunk_size` bytes.
fn copy_chunked(
    reader: &mut impl Read,
    writer: &mut impl Write,
    chunk_size: usize,
) -> Result<u64, CopyError> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(CopyError::Read(err)),
        };
        writer.write_all(&buf[..n]).map_err(CopyError::Write)?;
        total += n as u64;
    }
    writer.flush().map_err(CopyError::Write)?;
    Ok(total)
}

/// Compress everything `source` yields into a new file at `dest`.
fn compress_into(mut source: impl Read, dest: &Path, chunk_size: usize) -> Result<u64, CopyError> {
    let file = File::create(dest).map_err(CopyError::Write)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let total = copy_chunked(&mut source, &mut encoder, chunk_size)?;
    let writer = encoder.finish().map_err(CopyError::Write)?;
    let file = writer
        .into_inner()
        .map_err(|e| CopyError::Write(e.into_error()))?;
    file.sync_all().map_err(CopyError::Write)?;
    Ok(total)
}

/// Decompress `archive` into `sink`, which is closed on return.
fn decompress_into(archive: &Path, mut sink: impl Write, chunk_size: usize) -> Result<u64, CopyError> {
    let file = File::open(archive).map_err(CopyError::Read)?;
    let mut decoder = GzDecoder::new(BufReader::new(file));
    copy_chunked(&mut decoder, &mut sink, chunk_size)
}

fn is_corrupt(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof
    )
}

/// Log every stderr line of the tool, keeping the first few KiB.
fn drain_diagnostics<R>(stderr: R, tool: String) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(stderr).lines();
        let mut kept = String::new();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    log::warn!("{}: {}", tool, line);
                    if kept.len() < MAX_DIAGNOSTICS {
                        kept.push_str(&line);
                        kept.push('\n');
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    log::debug!("{}: stopped reading diagnostics: {}", tool, err);
                    break;
                }
            }
        }
        kept
    })
}

/// Discard the tool's stdout so it can never block on a full pipe.
fn drain_output<R>(mut stdout: R, tool: String) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 8 * 1024];
        let mut total = 0usize;
        while let Ok(n) = stdout.read(&mut buf).await {
            if n == 0 {
                break;
            }
            total += n;
        }
        log::debug!("{}: {} bytes of output discarded", tool, total);
    })
}

/// Runs the external archive tool in either direction.
pub struct ArchivePipeline<'a> {
    config: &'a ArchiveConfig,
}

impl<'a> ArchivePipeline<'a> {
    pub fn new(config: &'a ArchiveConfig) -> Self {
        Self { config }
    }

    fn tool_name(&self) -> String {
        self.config.program.display().to_string()
    }

    fn spawn(&self, template: &[String], repo: &Path, stdin: Stdio) -> Result<Child, BundleError> {
        let args = ArchiveConfig::expand_args(template, repo);
        log::debug!("running {} {}", self.tool_name(), args.join(" "));
        Command::new(&self.config.program)
            .args(&args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BundleError::ExternalToolFailure(format!("failed to start {}: {}", self.tool_name(), e))
            })
    }

    fn missing_pipe(&self, pipe: &str) -> BundleError {
        BundleError::ExternalToolFailure(format!("{} has no {} pipe", self.tool_name(), pipe))
    }

    fn tool_failed(&self, status: ExitStatus, diagnostics: &str) -> BundleError {
        let diagnostics = diagnostics.trim();
        if diagnostics.is_empty() {
            BundleError::ExternalToolFailure(format!("{} exited with {}", self.tool_name(), status))
        } else {
            BundleError::ExternalToolFailure(format!(
                "{} exited with {}: {}",
                self.tool_name(),
                status,
                diagnostics
            ))
        }
    }

    fn timed_out(&self) -> BundleError {
        BundleError::ExternalToolFailure(format!(
            "{} timed out after {}s",
            self.tool_name(),
            self.config.timeout.as_secs()
        ))
    }

    /// Dump `repo` into a compressed archive at `dest`.
    ///
    /// Returns `None` without running anything when the repository does not
    /// exist, otherwise the number of uncompressed bytes archived. A failed
    /// dump leaves no archive file behind.
    pub async fn dump(&self, repo: &Path, dest: &Path) -> Result<Option<u64>, BundleError> {
        if !tokio::fs::try_exists(repo)
            .await
            .map_err(|e| BundleError::io(repo, e))?
        {
            log::info!("no repository at {}; skipping archive dump", repo.display());
            return Ok(None);
        }

        let result = self.run_dump(repo, dest).await;
        if result.is_err() {
            if let Err(err) = tokio::fs::remove_file(dest).await {
                if err.kind() != io::ErrorKind::NotFound {
                    log::warn!("failed to remove partial archive {}: {}", dest.display(), err);
                }
            }
        }
        result.map(Some)
    }

    async fn run_dump(&self, repo: &Path, dest: &Path) -> Result<u64, BundleError> {
        let mut child = self.spawn(&self.config.dump_args, repo, Stdio::null())?;
        let stdout = child.stdout.take().ok_or_else(|| self.missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| self.missing_pipe("stderr"))?;
        let diagnostics = drain_diagnostics(stderr, self.tool_name());

        let source = SyncIoBridge::new(stdout);
        let dest_path = dest.to_path_buf();
        let chunk_size = self.config.chunk_size;
        let compress =
            tokio::task::spawn_blocking(move || compress_into(source, &dest_path, chunk_size));

        let run = async {
            let copied = compress
                .await
                .map_err(|e| BundleError::io(dest, io::Error::other(e)))?;
            let status = child.wait().await.map_err(|e| BundleError::io(dest, e))?;
            Ok::<_, BundleError>((copied, status))
        };

        let (copied, status) = match tokio::time::timeout(self.config.timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                diagnostics.abort();
                return Err(self.timed_out());
            }
        };
        let diagnostics = diagnostics.await.unwrap_or_default();

        if !status.success() {
            return Err(self.tool_failed(status, &diagnostics));
        }
        match copied {
            Ok(bytes) => {
                log::info!("archived {} bytes from {}", bytes, repo.display());
                Ok(bytes)
            }
            Err(CopyError::Read(err)) => Err(BundleError::ExternalToolFailure(format!(
                "reading {} output: {}",
                self.tool_name(),
                err
            ))),
            Err(CopyError::Write(err)) => Err(BundleError::io(dest, err)),
        }
    }

    /// Load the compressed archive at `archive` into `repo`.
    ///
    /// Returns `None` without running anything when either the archive or the
    /// target repository is absent, otherwise the number of bytes loaded.
    pub async fn load(&self, archive: &Path, repo: &Path) -> Result<Option<u64>, BundleError> {
        if !tokio::fs::try_exists(archive)
            .await
            .map_err(|e| BundleError::io(archive, e))?
        {
            return Ok(None);
        }
        if !tokio::fs::try_exists(repo)
            .await
            .map_err(|e| BundleError::io(repo, e))?
        {
            log::info!("no repository at {}; skipping archive load", repo.display());
            return Ok(None);
        }

        let mut child = self.spawn(&self.config.load_args, repo, Stdio::piped())?;
        let stdin = child.stdin.take().ok_or_else(|| self.missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| self.missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| self.missing_pipe("stderr"))?;
        let diagnostics = drain_diagnostics(stderr, self.tool_name());
        let output = drain_output(stdout, self.tool_name());

        let sink = SyncIoBridge::new(stdin);
        let archive_path = archive.to_path_buf();
        let chunk_size = self.config.chunk_size;
        let decompress =
            tokio::task::spawn_blocking(move || decompress_into(&archive_path, sink, chunk_size));

        let run = async {
            let copied = decompress
                .await
                .map_err(|e| BundleError::io(archive, io::Error::other(e)))?;
            let status = child.wait().await.map_err(|e| BundleError::io(archive, e))?;
            Ok::<_, BundleError>((copied, status))
        };

        let (copied, status) = match tokio::time::timeout(self.config.timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                diagnostics.abort();
                output.abort();
                return Err(self.timed_out());
            }
        };
        let diagnostics = diagnostics.await.unwrap_or_default();
        let _ = output.await;

        match copied {
            Err(CopyError::Read(err)) if is_corrupt(&err) => {
                Err(BundleError::malformed(ARCHIVE_SUFFIX, err))
            }
            Err(CopyError::Read(err)) => Err(BundleError::io(archive, err)),
            _ if !status.success() => Err(self.tool_failed(status, &diagnostics)),
            Err(CopyError::Write(err)) => Err(BundleError::ExternalToolFailure(format!(
                "writing to {}: {}",
                self.tool_name(),
                err
            ))),
            Ok(bytes) => {
                log::info!("loaded {} bytes into {}", bytes, repo.display());
                Ok(Some(bytes))
            }
        }
    }
}

/// Locate the archive file of a bundle, whatever its stem.
async fn find_archive(bundle: &Path) -> Result<Option<PathBuf>, BundleError> {
    let mut entries = match tokio::fs::read_dir(bundle).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(BundleError::io(bundle, err)),
    };
    let mut found = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| BundleError::io(bundle, e))?
    {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some(ARCHIVE_SUFFIX) && path.is_file() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found.into_iter().next())
}

pub struct ArchiveCodec;

#[rocket::async_trait]
impl DomainCodec for ArchiveCodec {
    fn domain(&self) -> Domain {
        Domain::Archive
    }

    async fn export(&self, ctx: &CodecContext<'_>) -> Result<Exported, BundleError> {
        let repo = ctx.project.repository_path();
        let file_name = format!("{}.{}", ctx.bundle_name, ARCHIVE_SUFFIX);
        let dest = ctx.bundle.join(&file_name);

        match ArchivePipeline::new(&ctx.config.archive).dump(&repo, &dest).await? {
            Some(_) => Ok(Exported::new(vec![file_name])),
            None => Ok(Exported::nothing(format!(
                "no repository at {}; archive not exported",
                repo.display()
            ))),
        }
    }

    async fn import(&self, ctx: &CodecContext<'_>) -> Result<usize, BundleError> {
        let Some(archive) = find_archive(ctx.bundle).await? else {
            return Ok(0);
        };
        let repo = ctx.project.repository_path();
        let loaded = ArchivePipeline::new(&ctx.config.archive)
            .load(&archive, &repo)
            .await?;
        Ok(usize::from(loaded.is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config() -> ArchiveConfig {
        ArchiveConfig {
            program: PathBuf::from("/nonexistent/archive-tool"),
            dump_args: vec!["dump".into()],
            load_args: vec!["load".into()],
            chunk_size: 7,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn compression_round_trips_in_small_chunks() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("base.archive");
        let payload: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();

        let copied = compress_into(Cursor::new(payload.clone()), &archive, 7).unwrap();
        assert_eq!(copied, payload.len() as u64);

        let mut restored = Vec::new();
        decompress_into(&archive, &mut restored, 7).unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn garbage_archive_reads_as_corrupt() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("base.archive");
        std::fs::write(&archive, b"this is not gzip").unwrap();

        match decompress_into(&archive, io::sink(), 16) {
            Err(CopyError::Read(err)) => assert!(is_corrupt(&err)),
            other => panic!("expected read error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dump_without_repository_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let config = config();
        let dest = dir.path().join("base.archive");

        let result = ArchivePipeline::new(&config)
            .dump(&dir.path().join("missing-repo"), &dest)
            .await
            .unwrap();
        assert_eq!(result, None);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn load_without_archive_or_repository_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let config = config();
        let pipeline = ArchivePipeline::new(&config);
        let archive = dir.path().join("base.archive");
        let repo = dir.path().join("repo");

        assert_eq!(pipeline.load(&archive, &repo).await.unwrap(), None);

        compress_into(Cursor::new(b"dump".to_vec()), &archive, 4).unwrap();
        assert_eq!(pipeline.load(&archive, &repo).await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_tool_is_an_external_failure() {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir(&repo).unwrap();
        let dest = dir.path().join("base.archive");
        let config = config();

        let err = ArchivePipeline::new(&config).dump(&repo, &dest).await.unwrap_err();
        assert!(matches!(err, BundleError::ExternalToolFailure(_)));
        assert!(!dest.exists());
    }
}
