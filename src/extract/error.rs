use thiserror::Error;

/// Typed decompression errors.
///
/// Corruption is split from generic I/O because it is never retried: a
/// payload that fails integrity validation will fail it again, so the
/// stage aborts the retry cycle and quarantines the source instead.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The gzip container failed integrity validation.
    #[error("corrupt gzip file: {0}")]
    Corrupt(String),

    /// I/O failure while decompressing or writing the output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking decompression task could not be joined.
    #[error("decompression task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ExtractError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, ExtractError::Corrupt(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corruption_classification() {
        assert!(ExtractError::Corrupt("bad crc".into()).is_corruption());
        assert!(!ExtractError::Io(std::io::Error::other("disk full")).is_corruption());
    }
}
