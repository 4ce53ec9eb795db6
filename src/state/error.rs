//! Error types for the state store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from durable state record operations.
///
/// Read-side failures on individual records are absorbed by the store
/// (treated as absent, logged); these surface only from writes and
/// checksum computation.
#[derive(Debug, Error)]
pub enum StateError {
    /// Failed to create the state directory.
    #[error("failed to create state directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to read or write a file.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A record could not be serialized.
    #[error("failed to encode state record: {0}")]
    Encode(#[from] serde_json::Error),
}
