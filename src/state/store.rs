//! Filesystem-backed state store: one JSON record per (server, filename).

use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;

use super::error::StateError;
use super::types::{FileState, FileStatus, StateUpdate};

/// Streaming chunk size for checksum computation.
const CHECKSUM_CHUNK: usize = 8192;

/// Durable mapping from (server, filename) to a [`FileState`] record.
///
/// Each record is an independent JSON file addressed by a stable derived key,
/// so lookups never need a directory listing and one corrupt record can never
/// block unrelated files. No locking is provided: the orchestrator guarantees
/// a single owner per (server, filename) pair at any time.
#[derive(Debug)]
pub struct StateStore {
    state_dir: PathBuf,
}

impl StateStore {
    /// Open (and create if needed) the store rooted at `state_dir`.
    pub fn open(state_dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let state_dir = state_dir.into();
        std::fs::create_dir_all(&state_dir).map_err(|source| StateError::CreateDir {
            path: state_dir.clone(),
            source,
        })?;
        Ok(Self { state_dir })
    }

    /// Path of the record for a (server, filename) pair.
    ///
    /// The key is a hash of `server:filename` so filesystem-unsafe characters
    /// in either component never leak into the state directory.
    fn record_path(&self, filename: &str, server: &str) -> PathBuf {
        let key = hex::encode(Sha256::digest(format!("{server}:{filename}")));
        self.state_dir.join(format!("{key}.json"))
    }

    /// Fetch the record for a pair, or `None` if absent.
    ///
    /// An unreadable or corrupt record is logged and treated as absent
    /// rather than failing the caller.
    pub async fn get(&self, filename: &str, server: &str) -> Option<FileState> {
        let path = self.record_path(filename, server);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable state record, treating as absent");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt state record, treating as absent");
                None
            }
        }
    }

    /// Read-modify-write: load the existing record (or create a default),
    /// apply the provided fields, stamp `last_updated`, and persist.
    ///
    /// `error_type` is kept consistent with `status`: transitioning to any
    /// non-error status clears it.
    pub async fn update(
        &self,
        filename: &str,
        server: &str,
        update: StateUpdate,
    ) -> Result<FileState, StateError> {
        let mut state = self
            .get(filename, server)
            .await
            .unwrap_or_else(|| FileState::new(filename, server));

        if let Some(status) = update.status {
            state.status = status;
        }
        if let Some(checksum) = update.checksum {
            state.checksum = Some(checksum);
        }
        if let Some(size) = update.size {
            state.size = Some(size);
        }
        if let Some(count) = update.copy_retry_count {
            state.copy_retry_count = count;
        }
        if let Some(count) = update.extract_retry_count {
            state.extract_retry_count = count;
        }
        if let Some(kind) = update.error_type {
            state.error_type = Some(kind);
        }
        if state.status != FileStatus::Error {
            state.error_type = None;
        }
        state.last_updated = Utc::now();

        self.persist(&state).await?;
        Ok(state)
    }

    /// Remove the record for a pair. Missing records are not an error.
    pub async fn delete(&self, filename: &str, server: &str) -> Result<(), StateError> {
        let path = self.record_path(filename, server);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StateError::Io { path, source }),
        }
    }

    /// SHA-256 of a file's content, streamed in fixed-size chunks so large
    /// logs never get pulled into memory wholesale.
    pub async fn checksum(&self, path: &Path) -> Result<String, StateError> {
        let mut file = fs::File::open(path).await.map_err(|source| StateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; CHECKSUM_CHUNK];
        loop {
            let n = file.read(&mut buf).await.map_err(|source| StateError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Write a record via temp-file + rename so a crash mid-write leaves
    /// either the old record or the new one, never a torn file.
    async fn persist(&self, state: &FileState) -> Result<(), StateError> {
        let path = self.record_path(&state.filename, &state.server);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(state)?;
        fs::write(&tmp, &bytes).await.map_err(|source| StateError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).await.map_err(|source| StateError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::types::FailureKind;
    use super::*;

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_get_absent() {
        let (_dir, store) = store();
        assert!(store.get("a.gz", "alpha").await.is_none());
    }

    #[tokio::test]
    async fn test_update_creates_default_then_applies() {
        let (_dir, store) = store();
        let state = store
            .update(
                "a.gz",
                "alpha",
                StateUpdate {
                    status: Some(FileStatus::Copied),
                    checksum: Some("abc".into()),
                    size: Some(10),
                    ..StateUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(state.status, FileStatus::Copied);
        assert_eq!(state.checksum.as_deref(), Some("abc"));

        let loaded = store.get("a.gz", "alpha").await.unwrap();
        assert_eq!(loaded.status, FileStatus::Copied);
        assert_eq!(loaded.size, Some(10));
        // untouched fields keep defaults
        assert_eq!(loaded.copy_retry_count, 0);
    }

    #[tokio::test]
    async fn test_partial_update_preserves_other_fields() {
        let (_dir, store) = store();
        store
            .update(
                "a.gz",
                "alpha",
                StateUpdate {
                    checksum: Some("abc".into()),
                    ..StateUpdate::default()
                },
            )
            .await
            .unwrap();
        let state = store
            .update(
                "a.gz",
                "alpha",
                StateUpdate {
                    status: Some(FileStatus::Extracted),
                    ..StateUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(state.checksum.as_deref(), Some("abc"));
        assert_eq!(state.status, FileStatus::Extracted);
    }

    #[tokio::test]
    async fn test_error_type_set_iff_error_status() {
        let (_dir, store) = store();
        let state = store
            .update("a.gz", "alpha", StateUpdate::failed(FailureKind::Copy))
            .await
            .unwrap();
        assert_eq!(state.status, FileStatus::Error);
        assert_eq!(state.error_type, Some(FailureKind::Copy));

        // moving back out of error clears the stale kind
        let state = store
            .update(
                "a.gz",
                "alpha",
                StateUpdate {
                    status: Some(FileStatus::Copied),
                    ..StateUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(state.status, FileStatus::Copied);
        assert!(state.error_type.is_none());
    }

    #[tokio::test]
    async fn test_same_filename_different_servers_are_distinct() {
        let (_dir, store) = store();
        store
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
        assert!(store.get("a.gz", "beta").await.is_none());
        assert_eq!(
            store.get("a.gz", "alpha").await.unwrap().status,
            FileStatus::Processed
        );
    }

    #[tokio::test]
    async fn test_corrupt_record_treated_as_absent() {
        let (_dir, store) = store();
        store
            .update("a.gz", "alpha", StateUpdate::default())
            .await
            .unwrap();
        let path = store.record_path("a.gz", "alpha");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(store.get("a.gz", "alpha").await.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, store) = store();
        store
            .update("a.gz", "alpha", StateUpdate::default())
            .await
            .unwrap();
        store.delete("a.gz", "alpha").await.unwrap();
        assert!(store.get("a.gz", "alpha").await.is_none());
        // deleting again is a no-op
        store.delete("a.gz", "alpha").await.unwrap();
    }

    #[tokio::test]
    async fn test_checksum_known_value() {
        let (dir, store) = store();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, b"hello world").unwrap();
        assert_eq!(
            store.checksum(&path).await.unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn test_last_updated_refreshed_on_write() {
        let (_dir, store) = store();
        let first = store
            .update("a.gz", "alpha", StateUpdate::default())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store
            .update("a.gz", "alpha", StateUpdate::default())
            .await
            .unwrap();
        assert!(second.last_updated > first.last_updated);
    }
}
