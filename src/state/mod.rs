//! Persistent per-file lifecycle state.
//!
//! One JSON record per (server, filename) pair in a dedicated state
//! directory, keyed by a stable hash. This is what makes every stage
//! idempotent: re-running a stage consults the record (plus a fresh
//! checksum where it matters) instead of redoing work.

pub mod error;
pub mod store;
pub mod types;

pub use error::StateError;
pub use store::StateStore;
pub use types::{FailureKind, FileState, FileStatus, StateUpdate};
