//! Decompression stage — validates and decompresses collected gzip files,
//! quarantining corrupt input, and performs the terminal moves into the
//! processed and share areas.

pub mod error;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;

use error::ExtractError;

use crate::config::Config;
use crate::fsops;
use crate::retry::{self, RetryAction};
use crate::state::{FailureKind, FileStatus, StateStore, StateUpdate};

/// Streamed read size for gzip validation and decompression.
const IO_CHUNK: usize = 8192;

/// Decompresses one file at a time, with retry for transient failures and a
/// no-retry quarantine path for corrupt input.
#[derive(Clone)]
pub struct Extractor {
    config: Arc<Config>,
    state: Arc<StateStore>,
}

impl Extractor {
    pub fn new(config: Arc<Config>, state: Arc<StateStore>) -> Self {
        Self { config, state }
    }

    /// Decompress `gz_path` into `extracted/<server>`, or return `None`
    /// after a terminal failure (source then sits in the quarantine or
    /// error/extract area with a matching state record).
    pub async fn extract_file(&self, gz_path: &Path, server: &str) -> Option<PathBuf> {
        if !gz_path.exists() {
            tracing::error!(file = %gz_path.display(), "gzip file does not exist");
            return None;
        }
        let filename = gz_path.file_name()?.to_string_lossy().into_owned();
        let output = self
            .config
            .extracted_dir(server)
            .join(Path::new(&filename).file_stem()?);

        let state = self.state.get(&filename, server).await;
        if let Some(ref st) = state {
            if st.status == FileStatus::Extracted && output.exists() {
                tracing::debug!(server, file = %filename, "already extracted");
                return Some(output);
            }
        }

        // Counter is incremented before the attempt cycle and reset only on
        // success; status drops back to `copied` until extraction confirms.
        let retry_count = state.map(|s| s.extract_retry_count).unwrap_or(0) + 1;
        if let Err(e) = self
            .state
            .update(
                &filename,
                server,
                StateUpdate {
                    status: Some(FileStatus::Copied),
                    extract_retry_count: Some(retry_count),
                    ..StateUpdate::default()
                },
            )
            .await
        {
            tracing::error!(server, file = %filename, error = %e, "state write failed");
        }

        let validate = self.config.extract.validate_gzip;
        let result = retry::retry_with_backoff(
            &self.config.retry.backoff,
            self.config.retry.max_retry_extract,
            |e: &ExtractError| {
                if e.is_corruption() {
                    RetryAction::Abort
                } else {
                    RetryAction::Retry
                }
            },
            || {
                let gz = gz_path.to_path_buf();
                let out = output.clone();
                async move {
                    tokio::task::spawn_blocking(move || extract_blocking(&gz, &out, validate))
                        .await?
                }
            },
        )
        .await;

        match result {
            Ok(output) => {
                if let Err(e) = self.finish_extract(&output, &filename, server).await {
                    tracing::error!(server, file = %filename, error = %e, "post-extract verification failed");
                    // a failed record must not leave a live output behind;
                    // the next run re-extracts from the relocated source
                    if let Err(e) = tokio::fs::remove_file(&output).await {
                        tracing::warn!(file = %output.display(), error = %e, "failed to remove output after failed commit");
                    }
                    self.fail_extract(gz_path, &filename, server, FailureKind::Extract)
                        .await;
                    return None;
                }
                if self.config.extract.delete_source {
                    // Best effort: a leftover source does not affect
                    // downstream state.
                    if let Err(e) = tokio::fs::remove_file(gz_path).await {
                        tracing::warn!(file = %gz_path.display(), error = %e, "failed to delete source after extraction");
                    }
                }
                tracing::info!(server, file = %filename, output = %output.display(), "file extracted");
                Some(output)
            }
            Err(failure) => {
                let kind = if failure.error.is_corruption() {
                    FailureKind::Corruption
                } else {
                    FailureKind::Extract
                };
                tracing::error!(
                    server,
                    file = %filename,
                    attempts = failure.attempts,
                    error = %failure.error,
                    error_type = kind.as_str(),
                    "extraction failed"
                );
                self.fail_extract(gz_path, &filename, server, kind).await;
                None
            }
        }
    }

    /// Relocate the compressed source into the terminal processed area and
    /// record status `processed`.
    pub async fn move_to_processed(
        &self,
        gz_path: &Path,
        server: &str,
    ) -> Result<PathBuf, ExtractError> {
        let filename = filename_of(gz_path)?;
        let dest = self.config.processed_dir(server).join(&filename);
        fsops::move_replacing(gz_path, &dest).await?;

        if let Err(e) = self
            .state
            .update(
                &filename,
                server,
                StateUpdate {
                    status: Some(FileStatus::Processed),
                    ..StateUpdate::default()
                },
            )
            .await
        {
            tracing::error!(server, file = %filename, error = %e, "state write failed");
        }
        tracing::info!(server, file = %filename, "file moved to processed");
        Ok(dest)
    }

    /// Relocate a decompressed file to the external share location.
    ///
    /// Returns `Ok(None)` when no share directory is configured. Failure
    /// here never reverts `extracted` status: the extraction is still
    /// valid and the publish step can be redone independently.
    pub async fn move_to_share(
        &self,
        extracted: &Path,
        server: &str,
    ) -> Result<Option<PathBuf>, ExtractError> {
        let Some(share_root) = self.config.share_dir.as_ref() else {
            return Ok(None);
        };
        let filename = filename_of(extracted)?;
        let dest = share_root.join(server).join(&filename);
        fsops::move_replacing(extracted, &dest).await?;
        tracing::info!(server, file = %filename, dest = %dest.display(), "extracted file published to share");
        Ok(Some(dest))
    }

    /// Commit a successful extraction: fresh checksum and size of the
    /// decompressed output, status `extracted`, retry counter reset.
    async fn finish_extract(
        &self,
        output: &Path,
        filename: &str,
        server: &str,
    ) -> Result<(), crate::state::StateError> {
        let checksum = self.state.checksum(output).await?;
        let size = tokio::fs::metadata(output)
            .await
            .map_err(|source| crate::state::StateError::Io {
                path: output.to_path_buf(),
                source,
            })?
            .len();
        self.state
            .update(
                filename,
                server,
                StateUpdate {
                    status: Some(FileStatus::Extracted),
                    checksum: Some(checksum),
                    size: Some(size),
                    extract_retry_count: Some(0),
                    ..StateUpdate::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Terminal extraction failure: relocate the source into the quarantine
    /// (corruption) or error/extract area and record the failure kind.
    async fn fail_extract(&self, gz_path: &Path, filename: &str, server: &str, kind: FailureKind) {
        let dir = match kind {
            FailureKind::Corruption => self.config.quarantine_dir(server),
            _ => self.config.error_extract_dir(server),
        };
        let dest = dir.join(filename);
        if gz_path.exists() {
            match fsops::move_replacing(gz_path, &dest).await {
                Ok(()) => {
                    tracing::warn!(server, file = %filename, dest = %dest.display(), "source moved aside after failed extraction");
                }
                Err(e) => {
                    tracing::error!(server, file = %filename, error = %e, "failed to move source after failed extraction");
                }
            }
        }
        if let Err(e) = self
            .state
            .update(filename, server, StateUpdate::failed(kind))
            .await
        {
            tracing::error!(server, file = %filename, error = %e, "state write failed");
        }
    }
}

fn filename_of(path: &Path) -> Result<String, ExtractError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            ExtractError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("path {} has no filename", path.display()),
            ))
        })
}

/// Validate (optionally) and decompress one gzip file. Runs on the
/// blocking pool; gzip work is CPU-bound.
fn extract_blocking(
    gz_path: &Path,
    output: &Path,
    validate: bool,
) -> Result<PathBuf, ExtractError> {
    if validate {
        validate_gzip(gz_path)?;
    }
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // A stale output from an interrupted run is replaced wholesale.
    match std::fs::remove_file(output) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    let file = std::fs::File::open(gz_path)?;
    let mut decoder = GzDecoder::new(std::io::BufReader::new(file));
    let mut out = std::fs::File::create(output)?;
    std::io::copy(&mut decoder, &mut out)?;
    Ok(output.to_path_buf())
}

/// Full streamed read of the container. Any decode failure (bad magic,
/// truncation, CRC mismatch) counts as corruption.
fn validate_gzip(gz_path: &Path) -> Result<(), ExtractError> {
    let file = std::fs::File::open(gz_path)?;
    let mut decoder = GzDecoder::new(std::io::BufReader::new(file));
    let mut buf = [0u8; IO_CHUNK];
    loop {
        match decoder.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(ExtractError::Corrupt(e.to_string())),
        }
    }
}
