//! Transfer stage — lists remote files and copies them into the per-server
//! incoming area, consulting the state store so completed files are never
//! re-fetched.

pub mod error;
pub mod remote;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use error::TransferError;
use remote::RemoteSource;

use crate::config::{Config, ServerConfig};
use crate::fsops;
use crate::retry::{self, RetryAction};
use crate::state::{FailureKind, FileStatus, StateStore, StateUpdate};

/// Result of one copy operation, from the orchestrator's point of view.
#[derive(Debug)]
pub enum CollectOutcome {
    /// The file is present locally and ready for decompression: freshly
    /// copied, verified-equal, or left over from an interrupted run.
    Ready(PathBuf),
    /// The file already moved past this stage and nothing remains locally.
    Skipped,
    /// Terminal failure after retries; any artifact sits in error/copy.
    Failed,
}

impl CollectOutcome {
    /// The local path when the file is ready for the next stage.
    pub fn ready(self) -> Option<PathBuf> {
        match self {
            CollectOutcome::Ready(path) => Some(path),
            _ => None,
        }
    }
}

/// Copies remote files through a pluggable [`RemoteSource`], with retry and
/// idempotent short-circuits backed by the state store.
#[derive(Clone)]
pub struct Collector {
    config: Arc<Config>,
    state: Arc<StateStore>,
    remote: Arc<dyn RemoteSource>,
}

impl Collector {
    pub fn new(config: Arc<Config>, state: Arc<StateStore>, remote: Arc<dyn RemoteSource>) -> Self {
        Self {
            config,
            state,
            remote,
        }
    }

    /// List remote files matching the server's pattern.
    ///
    /// A listing failure is logged and yields an empty list: one
    /// unreachable server must not abort the caller.
    pub async fn list_remote(&self, server: &ServerConfig) -> Vec<String> {
        match self.remote.list(server).await {
            Ok(files) => {
                tracing::info!(
                    server = %server.name,
                    count = files.len(),
                    "remote listing complete"
                );
                files
            }
            Err(e) => {
                tracing::error!(server = %server.name, error = %e, "remote listing failed");
                Vec::new()
            }
        }
    }

    /// Copy one remote file into `incoming/<server>`. On exhausted retries
    /// the artifact lands in `error/copy/<server>` and the record is marked
    /// error/copy, so the next run retries it.
    ///
    /// Idempotency ladder, checked before any transfer:
    /// - status `processed`/`extracted`: the file moved past this stage,
    ///   never re-fetch (a lingering local copy is handed on so an
    ///   interrupted run can finish its moves)
    /// - status `copied` with a matching fresh checksum: verified
    ///   short-circuit, no transfer
    pub async fn collect_file(
        &self,
        server: &ServerConfig,
        remote_path: &str,
    ) -> CollectOutcome {
        let filename = match Path::new(remote_path).file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => {
                tracing::error!(server = %server.name, remote_path, "remote path has no filename");
                return CollectOutcome::Failed;
            }
        };
        let dest_dir = self.config.incoming_dir(&server.name);
        let local = dest_dir.join(&filename);

        let state = self.state.get(&filename, &server.name).await;

        if let Some(ref st) = state {
            if matches!(st.status, FileStatus::Processed | FileStatus::Extracted) {
                tracing::debug!(server = %server.name, file = %filename, status = st.status.as_str(), "already handled, skipping copy");
                return if local.exists() {
                    CollectOutcome::Ready(local)
                } else {
                    CollectOutcome::Skipped
                };
            }
            if st.status == FileStatus::Copied && local.exists() {
                if let Some(recorded) = st.checksum.as_deref() {
                    match self.state.checksum(&local).await {
                        Ok(current) if current == recorded => {
                            tracing::debug!(server = %server.name, file = %filename, "already copied and verified");
                            return CollectOutcome::Ready(local);
                        }
                        Ok(_) => {
                            tracing::warn!(server = %server.name, file = %filename, "local copy fails checksum, re-copying");
                        }
                        Err(e) => {
                            tracing::warn!(server = %server.name, file = %filename, error = %e, "cannot verify local copy, re-copying");
                        }
                    }
                }
            }
        }

        // Counter is incremented before the attempt cycle and reset only on
        // success, matching the recorded-state semantics of prior runs.
        let retry_count = state.map(|s| s.copy_retry_count).unwrap_or(0) + 1;
        if let Err(e) = self
            .state
            .update(
                &filename,
                &server.name,
                StateUpdate {
                    status: Some(FileStatus::Pending),
                    copy_retry_count: Some(retry_count),
                    ..StateUpdate::default()
                },
            )
            .await
        {
            tracing::error!(server = %server.name, file = %filename, error = %e, "state write failed");
        }

        let result = retry::retry_with_backoff(
            &self.config.retry.backoff,
            self.config.retry.max_retry_copy,
            |e: &TransferError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || self.remote.fetch(server, remote_path, &dest_dir),
        )
        .await;

        match result {
            Ok(local) => match self.finish_copy(&local, &filename, server).await {
                Ok(()) => {
                    tracing::info!(server = %server.name, file = %filename, "file collected");
                    CollectOutcome::Ready(local)
                }
                Err(e) => {
                    tracing::error!(server = %server.name, file = %filename, error = %e, "post-copy verification failed");
                    self.fail_copy(&local, &filename, server).await;
                    CollectOutcome::Failed
                }
            },
            Err(failure) => {
                tracing::error!(
                    server = %server.name,
                    file = %filename,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "copy failed, moving artifact to error/copy"
                );
                self.fail_copy(&local, &filename, server).await;
                CollectOutcome::Failed
            }
        }
    }

    /// Commit a successful copy: fresh checksum and size, status `copied`,
    /// retry counter reset.
    async fn finish_copy(
        &self,
        local: &Path,
        filename: &str,
        server: &ServerConfig,
    ) -> Result<(), crate::state::StateError> {
        let checksum = self.state.checksum(local).await?;
        let size = tokio::fs::metadata(local)
            .await
            .map_err(|source| crate::state::StateError::Io {
                path: local.to_path_buf(),
                source,
            })?
            .len();
        self.state
            .update(
                filename,
                &server.name,
                StateUpdate {
                    status: Some(FileStatus::Copied),
                    checksum: Some(checksum),
                    size: Some(size),
                    copy_retry_count: Some(0),
                    ..StateUpdate::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Terminal copy failure: relocate any partial artifact to
    /// `error/copy/<server>` and record error/copy. Relocation and record
    /// update are committed together so placement and status agree.
    async fn fail_copy(&self, local: &Path, filename: &str, server: &ServerConfig) {
        if local.exists() {
            let error_file = self.config.error_copy_dir(&server.name).join(filename);
            match fsops::move_replacing(local, &error_file).await {
                Ok(()) => {
                    tracing::warn!(server = %server.name, file = %filename, dest = %error_file.display(), "partial artifact moved to error/copy");
                }
                Err(e) => {
                    tracing::error!(server = %server.name, file = %filename, error = %e, "failed to move artifact to error/copy");
                }
            }
        }
        if let Err(e) = self
            .state
            .update(filename, &server.name, StateUpdate::failed(FailureKind::Copy))
            .await
        {
            tracing::error!(server = %server.name, file = %filename, error = %e, "state write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::remote::testing::LocalRemote;
    use super::*;
    use crate::config::Config;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: Arc<Config>,
        state: Arc<StateStore>,
        remote_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let remote_dir = dir.path().join("remote");
        std::fs::create_dir_all(&remote_dir).unwrap();
        let config = Arc::new(Config::for_tests(dir.path(), &remote_dir));
        config.ensure_layout().unwrap();
        let state = Arc::new(StateStore::open(&config.state_dir).unwrap());
        Fixture {
            _dir: dir,
            config,
            state,
            remote_dir,
        }
    }

    fn server(config: &Config) -> ServerConfig {
        config.servers[0].clone()
    }

    fn place_remote(fixture: &Fixture, name: &str, content: &[u8]) -> String {
        let path = fixture.remote_dir.join(name);
        std::fs::write(&path, content).unwrap();
        path.display().to_string()
    }

    fn collector(fixture: &Fixture, remote: Arc<LocalRemote>) -> Collector {
        Collector::new(fixture.config.clone(), fixture.state.clone(), remote)
    }

    #[tokio::test]
    async fn test_collect_and_checksum_short_circuit() {
        let fixture = fixture();
        let remote_path = place_remote(&fixture, "a.gz", b"payload");
        let remote = Arc::new(LocalRemote::default());
        let collector = collector(&fixture, remote.clone());
        let srv = server(&fixture.config);

        let first = collector
            .collect_file(&srv, &remote_path)
            .await
            .ready()
            .unwrap();
        assert!(first.exists());
        let st = fixture.state.get("a.gz", "alpha").await.unwrap();
        assert_eq!(st.status, FileStatus::Copied);
        assert_eq!(st.copy_retry_count, 0);
        assert!(st.checksum.is_some());
        assert_eq!(st.size, Some(7));

        // second call short-circuits on the verified checksum
        let second = collector
            .collect_file(&srv, &remote_path)
            .await
            .ready()
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(remote.fetch_count(&remote_path), 1);
    }

    #[tokio::test]
    async fn test_corrupted_local_copy_is_refetched() {
        let fixture = fixture();
        let remote_path = place_remote(&fixture, "a.gz", b"payload");
        let remote = Arc::new(LocalRemote::default());
        let collector = collector(&fixture, remote.clone());
        let srv = server(&fixture.config);

        let local = collector
            .collect_file(&srv, &remote_path)
            .await
            .ready()
            .unwrap();
        std::fs::write(&local, b"truncated").unwrap();

        let again = collector
            .collect_file(&srv, &remote_path)
            .await
            .ready()
            .unwrap();
        assert_eq!(remote.fetch_count(&remote_path), 2);
        let checksum = fixture.state.checksum(&again).await.unwrap();
        let st = fixture.state.get("a.gz", "alpha").await.unwrap();
        assert_eq!(st.checksum.as_deref(), Some(checksum.as_str()));
    }

    #[tokio::test]
    async fn test_processed_file_never_refetched() {
        let fixture = fixture();
        let remote_path = place_remote(&fixture, "a.gz", b"payload");
        let remote = Arc::new(LocalRemote::default());
        let collector = collector(&fixture, remote.clone());
        let srv = server(&fixture.config);

        fixture
            .state
            .update(
                "a.gz",
                "alpha",
                StateUpdate {
                    status: Some(FileStatus::Processed),
                    ..StateUpdate::default()
                },
            )
            .await
            .unwrap();

        // no local copy left in incoming, so there is nothing to hand on
        assert!(matches!(
            collector.collect_file(&srv, &remote_path).await,
            CollectOutcome::Skipped
        ));
        assert_eq!(remote.fetch_count(&remote_path), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_marks_error_and_consumes_budget() {
        let fixture = fixture();
        let remote_path = place_remote(&fixture, "a.gz", b"payload");
        let remote = Arc::new(LocalRemote {
            fail_fetch: vec![remote_path.clone()],
            ..LocalRemote::default()
        });
        let collector = collector(&fixture, remote.clone());
        let srv = server(&fixture.config);

        assert!(matches!(
            collector.collect_file(&srv, &remote_path).await,
            CollectOutcome::Failed
        ));
        assert_eq!(
            remote.fetch_count(&remote_path),
            fixture.config.retry.max_retry_copy
        );
        let st = fixture.state.get("a.gz", "alpha").await.unwrap();
        assert_eq!(st.status, FileStatus::Error);
        assert_eq!(st.error_type, Some(FailureKind::Copy));
        assert_eq!(st.copy_retry_count, 1);
    }

    #[tokio::test]
    async fn test_partial_artifact_moved_to_error_copy() {
        let fixture = fixture();
        let remote_path = place_remote(&fixture, "a.gz", b"payload");
        let remote = Arc::new(LocalRemote {
            fail_fetch: vec![remote_path.clone()],
            ..LocalRemote::default()
        });
        let collector = collector(&fixture, remote);
        let srv = server(&fixture.config);

        // simulate a partial file left by an interrupted transfer
        let incoming = fixture.config.incoming_dir("alpha");
        std::fs::create_dir_all(&incoming).unwrap();
        std::fs::write(incoming.join("a.gz"), b"part").unwrap();

        collector.collect_file(&srv, &remote_path).await;
        assert!(!incoming.join("a.gz").exists());
        assert!(fixture.config.error_copy_dir("alpha").join("a.gz").exists());
    }

    #[tokio::test]
    async fn test_listing_failure_yields_empty() {
        let fixture = fixture();
        let remote = Arc::new(LocalRemote {
            fail_list: true,
            ..LocalRemote::default()
        });
        let collector = collector(&fixture, remote);
        let srv = server(&fixture.config);
        assert!(collector.list_remote(&srv).await.is_empty());
    }

    #[tokio::test]
    async fn test_listing_passes_through_matches() {
        let fixture = fixture();
        place_remote(&fixture, "a.gz", b"1");
        place_remote(&fixture, "b.gz", b"2");
        place_remote(&fixture, "notes.txt", b"3");
        let collector = collector(&fixture, Arc::new(LocalRemote::default()));
        let srv = server(&fixture.config);

        let listed = collector.list_remote(&srv).await;
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|p| p.ends_with(".gz")));
    }
}
