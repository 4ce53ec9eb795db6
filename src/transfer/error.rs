use thiserror::Error;

/// Typed transfer errors enabling retry classification.
///
/// `is_retryable()` separates transient failures (network, timeout, remote
/// tool exit) from ones that cannot succeed on retry (transfer tool not
/// installed locally).
#[derive(Debug, Error)]
pub enum TransferError {
    /// rsync/ssh (or sshpass) is not installed on this host.
    #[error("transfer tool not available: {0}")]
    ToolMissing(String),

    /// The remote operation exceeded its deadline.
    #[error("remote operation timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The transfer command exited non-zero.
    #[error("transfer command failed: {0}")]
    Command(String),

    /// The listing command exited non-zero.
    #[error("remote listing failed: {0}")]
    Listing(String),

    /// The tool reported success but the destination file is absent.
    #[error("destination file {0} was not created by the transfer")]
    DestinationMissing(String),

    /// Local I/O while preparing or verifying the transfer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::ToolMissing(_) => false,
            TransferError::Timeout { .. } => true,
            TransferError::Command(_) => true,
            TransferError::Listing(_) => true,
            TransferError::DestinationMissing(_) => true,
            TransferError::Io(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_missing_not_retryable() {
        assert!(!TransferError::ToolMissing("rsync".into()).is_retryable());
    }

    #[test]
    fn test_timeout_retryable() {
        assert!(TransferError::Timeout { secs: 300 }.is_retryable());
    }

    #[test]
    fn test_command_failure_retryable() {
        assert!(TransferError::Command("connection reset".into()).is_retryable());
    }
}
