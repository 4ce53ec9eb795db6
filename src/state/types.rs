//! Types for the file lifecycle state module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline stage a file has reached.
///
/// Happy path is `Pending -> Copied -> Extracted -> Processed`; `Error` is
/// reachable from any non-terminal stage. The stages never regress from a
/// terminal success state; the transfer and extract short-circuits enforce
/// that before any write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Copied,
    Extracted,
    Processed,
    Error,
}

impl FileStatus {
    /// String form used in log fields and the persisted record.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Copied => "copied",
            Self::Extracted => "extracted",
            Self::Processed => "processed",
            Self::Error => "error",
        }
    }
}

/// Which stage produced a terminal failure. Only meaningful while
/// `status == Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Copy,
    Extract,
    Corruption,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Extract => "extract",
            Self::Corruption => "corruption",
        }
    }
}

/// Durable record for one (server, filename) pair.
///
/// The pair is the sole identity: physical files are re-located within
/// server-scoped stage directories, so only the final path segment matters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileState {
    pub filename: String,
    pub server: String,
    /// SHA-256 of the file content, recomputed after every stage that
    /// produces new bytes. Absent until the first successful stage.
    pub checksum: Option<String>,
    pub size: Option<u64>,
    pub copy_retry_count: u32,
    pub extract_retry_count: u32,
    pub status: FileStatus,
    pub error_type: Option<FailureKind>,
    pub last_updated: DateTime<Utc>,
}

impl FileState {
    /// Create a fresh pending record; used lazily on first contact with a
    /// (server, filename) pair.
    pub fn new(filename: &str, server: &str) -> Self {
        Self {
            filename: filename.to_string(),
            server: server.to_string(),
            checksum: None,
            size: None,
            copy_retry_count: 0,
            extract_retry_count: 0,
            status: FileStatus::Pending,
            error_type: None,
            last_updated: Utc::now(),
        }
    }
}

/// Partial update applied through `StateStore::update`. Unset fields keep
/// their current value.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub status: Option<FileStatus>,
    pub checksum: Option<String>,
    pub size: Option<u64>,
    pub copy_retry_count: Option<u32>,
    pub extract_retry_count: Option<u32>,
    pub error_type: Option<FailureKind>,
}

impl StateUpdate {
    /// Shorthand for the common "stage failed terminally" transition.
    pub fn failed(kind: FailureKind) -> Self {
        Self {
            status: Some(FileStatus::Error),
            error_type: Some(kind),
            ..Self::default()
        }
    }
}
