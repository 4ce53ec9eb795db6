//! Remote listing and transfer capabilities.
//!
//! The pipeline consumes these through the [`RemoteSource`] trait so the
//! stages can be exercised without a network; production uses
//! [`RsyncRemote`], which shells out to `ssh` for listing and `rsync` for
//! the copy, optionally wrapped in `sshpass` when `SSH_PASSWORD` is set.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::error::TransferError;
use crate::config::{RsyncConfig, ServerConfig};

/// Extra headroom over the tool's own timeout before we kill the process.
const TIMEOUT_BUFFER_SECS: u64 = 10;

/// Abstract remote capability: list matching files, fetch one file.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// List fully-qualified remote paths matching the server's
    /// `remote_path` pattern. Listing order is passed through as-is.
    async fn list(&self, server: &ServerConfig) -> Result<Vec<String>, TransferError>;

    /// Copy one remote file into `dest_dir`, preserving its base name.
    /// Returns the local path on success.
    async fn fetch(
        &self,
        server: &ServerConfig,
        remote_path: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, TransferError>;
}

/// rsync/ssh-backed implementation.
#[derive(Debug, Clone)]
pub struct RsyncRemote {
    config: RsyncConfig,
}

impl RsyncRemote {
    pub fn new(config: RsyncConfig) -> Self {
        Self { config }
    }

    fn deadline(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs + TIMEOUT_BUFFER_SECS)
    }

    /// Build a command, prefixed with `sshpass -p` when `SSH_PASSWORD` is
    /// set. Key-based auth is the expected production setup; the password
    /// path exists for parity with older deployments.
    fn base_command(program: &str) -> Command {
        match std::env::var("SSH_PASSWORD") {
            Ok(password) if !password.is_empty() => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-p").arg(password).arg(program);
                cmd
            }
            _ => Command::new(program),
        }
    }

    async fn run(
        &self,
        mut cmd: Command,
        deadline: Duration,
    ) -> Result<std::process::Output, TransferError> {
        cmd.stdin(Stdio::null());
        // The timeout drops the in-flight future; without this the ssh or
        // rsync child would keep running and each retry would stack another
        // live remote connection.
        cmd.kill_on_drop(true);
        let child = cmd.output();
        match tokio::time::timeout(deadline, child).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TransferError::ToolMissing(e.to_string()))
            }
            Ok(Err(e)) => Err(TransferError::Io(e)),
            Err(_) => Err(TransferError::Timeout {
                secs: self.config.timeout_secs,
            }),
        }
    }
}

#[async_trait]
impl RemoteSource for RsyncRemote {
    async fn list(&self, server: &ServerConfig) -> Result<Vec<String>, TransferError> {
        // The glob is expanded by the remote shell; `ls -1` yields one
        // fully-qualified path per line.
        let mut cmd = Self::base_command("ssh");
        cmd.arg(format!("{}@{}", server.user, server.host))
            .arg(format!("ls -1 {}", server.remote_path));

        let output = self.run(cmd, self.deadline()).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // An unmatched glob is an empty source directory, not a failure.
            if stderr.contains("No such file or directory") {
                return Ok(Vec::new());
            }
            return Err(TransferError::Listing(
                stderr.trim().to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn fetch(
        &self,
        server: &ServerConfig,
        remote_path: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, TransferError> {
        tokio::fs::create_dir_all(dest_dir).await?;

        let mut cmd = Self::base_command("rsync");
        cmd.args(self.config.options.split_whitespace())
            .arg("--timeout")
            .arg(self.config.timeout_secs.to_string())
            .arg(format!("{}@{}:{}", server.user, server.host, remote_path))
            .arg(dest_dir);

        let output = self.run(cmd, self.deadline()).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let message = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(TransferError::Command(message));
        }

        // rsync keeps the source's base name
        let filename = Path::new(remote_path)
            .file_name()
            .ok_or_else(|| TransferError::Command(format!("no filename in {remote_path}")))?;
        let local = dest_dir.join(filename);
        if !local.exists() {
            return Err(TransferError::DestinationMissing(
                local.display().to_string(),
            ));
        }
        Ok(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_child_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let remote = RsyncRemote::new(RsyncConfig {
            timeout_secs: 1,
            options: String::new(),
        });

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(format!("sleep 2 && touch {}", marker.display()));
        let result = remote.run(cmd, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(TransferError::Timeout { .. })));

        // the child must not outlive the timeout and complete its work
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_missing_tool_reported() {
        let remote = RsyncRemote::new(RsyncConfig::default());
        let cmd = Command::new("definitely-not-a-real-transfer-tool");
        let result = remote.run(cmd, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(TransferError::ToolMissing(_))));
    }
}
