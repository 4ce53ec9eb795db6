//! Pipeline configuration: environment variables for paths and tuning,
//! JSON `.conf` files (with `#` comment lines) for pipeline knobs and the
//! server inventory.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

use crate::retry::RetryConfig;

/// One remote source host.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub host: String,
    pub user: String,
    /// Remote directory plus filename glob, e.g. `/var/log/app/*.gz`.
    pub remote_path: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Retry budgets per stage plus the shared backoff curve.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_retry_copy: u32,
    pub max_retry_extract: u32,
    pub backoff: RetryConfig,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retry_copy: 3,
            max_retry_extract: 3,
            backoff: RetryConfig::default(),
        }
    }
}

/// Remote transfer tool settings.
#[derive(Debug, Clone)]
pub struct RsyncConfig {
    pub timeout_secs: u64,
    pub options: String,
}

impl Default for RsyncConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            options: "-avz --partial".to_string(),
        }
    }
}

/// Decompression stage settings.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub validate_gzip: bool,
    pub delete_source: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            validate_gzip: true,
            delete_source: false,
        }
    }
}

/// Orchestrator settings, loaded from `pipeline.conf`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub parallel_workers: usize,
    pub file_check_interval: u64,
    pub disk_space_threshold_gb: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallel_workers: 2,
            file_check_interval: 60,
            disk_space_threshold_gb: 10,
        }
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_root: PathBuf,
    pub state_dir: PathBuf,
    /// External publish location; extracted files are relocated here when set.
    pub share_dir: Option<PathBuf>,
    pub retry: RetrySettings,
    pub rsync: RsyncConfig,
    pub extract: ExtractConfig,
    pub pipeline: PipelineConfig,
    pub servers: Vec<ServerConfig>,
}

impl Config {
    /// Load configuration from the environment and `config_dir`
    /// (`pipeline.conf`, `sources.conf`, with `.example` fallbacks).
    pub fn load(config_dir: &Path) -> anyhow::Result<Self> {
        let data_root = env_path("DATA_ROOT", "/opt/logpipe-relay/data");
        let state_dir = env_path("STATE_DIR", "/opt/logpipe-relay/state");
        let share_dir = std::env::var("SHARE_DIR").ok().map(|s| expand_tilde(&s));

        let retry = RetrySettings {
            max_retry_copy: env_parse("MAX_RETRY_COPY", 3)?,
            max_retry_extract: env_parse("MAX_RETRY_EXTRACT", 3)?,
            backoff: RetryConfig {
                base_delay_secs: env_parse("RETRY_DELAY_BASE", 60)?,
                max_delay_secs: env_parse("RETRY_DELAY_MAX", 3600)?,
                multiplier: env_parse("RETRY_BACKOFF_MULTIPLIER", 2.0)?,
            },
        };

        let rsync = RsyncConfig {
            timeout_secs: env_parse("RSYNC_TIMEOUT", 300)?,
            options: std::env::var("RSYNC_OPTIONS")
                .unwrap_or_else(|_| RsyncConfig::default().options),
        };

        let extract = ExtractConfig {
            validate_gzip: env_bool("GZIP_VALIDATE", true),
            delete_source: env_bool("EXTRACT_DELETE_SOURCE", false),
        };

        let pipeline = match read_conf(config_dir, "pipeline.conf")? {
            Some(text) => serde_json::from_str(&text)
                .with_context(|| format!("invalid pipeline.conf in {}", config_dir.display()))?,
            None => PipelineConfig::default(),
        };

        let servers = match read_conf(config_dir, "sources.conf")? {
            Some(text) => {
                #[derive(Deserialize)]
                struct Sources {
                    #[serde(default)]
                    servers: Vec<ServerConfig>,
                }
                let sources: Sources = serde_json::from_str(&text)
                    .with_context(|| format!("invalid sources.conf in {}", config_dir.display()))?;
                sources.servers
            }
            None => Vec::new(),
        };

        Ok(Self {
            data_root,
            state_dir,
            share_dir,
            retry,
            rsync,
            extract,
            pipeline,
            servers,
        })
    }

    /// Create the full staging tree: per-stage, per-server directories plus
    /// the error branches. Directory placement is a second encoding of file
    /// status, so the tree must exist before any stage runs.
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.state_dir)?;
        for stage in ["incoming", "extracted", "processed"] {
            std::fs::create_dir_all(self.data_root.join(stage))?;
        }
        for kind in ["copy", "extract", "quarantine"] {
            std::fs::create_dir_all(self.data_root.join("error").join(kind))?;
        }
        for server in &self.servers {
            std::fs::create_dir_all(self.incoming_dir(&server.name))?;
            std::fs::create_dir_all(self.extracted_dir(&server.name))?;
            std::fs::create_dir_all(self.processed_dir(&server.name))?;
            std::fs::create_dir_all(self.error_copy_dir(&server.name))?;
            std::fs::create_dir_all(self.error_extract_dir(&server.name))?;
            std::fs::create_dir_all(self.quarantine_dir(&server.name))?;
        }
        Ok(())
    }

    pub fn incoming_dir(&self, server: &str) -> PathBuf {
        self.data_root.join("incoming").join(server)
    }

    pub fn extracted_dir(&self, server: &str) -> PathBuf {
        self.data_root.join("extracted").join(server)
    }

    pub fn processed_dir(&self, server: &str) -> PathBuf {
        self.data_root.join("processed").join(server)
    }

    pub fn error_copy_dir(&self, server: &str) -> PathBuf {
        self.data_root.join("error").join("copy").join(server)
    }

    pub fn error_extract_dir(&self, server: &str) -> PathBuf {
        self.data_root.join("error").join("extract").join(server)
    }

    pub fn quarantine_dir(&self, server: &str) -> PathBuf {
        self.data_root.join("error").join("quarantine").join(server)
    }
}

/// Read a `.conf` file, falling back to its `.example` sibling, with `#`
/// comment lines and blank lines stripped. Returns `None` when neither
/// file exists.
fn read_conf(config_dir: &Path, name: &str) -> anyhow::Result<Option<String>> {
    let mut path = config_dir.join(name);
    if !path.exists() {
        path = config_dir.join(format!("{name}.example"));
        if !path.exists() {
            return Ok(None);
        }
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let stripped: String = raw
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .collect::<Vec<_>>()
        .join("\n");
    if stripped.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(stripped))
}

/// Expand `~` to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn env_path(key: &str, default: &str) -> PathBuf {
    match std::env::var(key) {
        Ok(value) => expand_tilde(&value),
        Err(_) => PathBuf::from(default),
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("invalid value for {key}: {value:?}")),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => value.eq_ignore_ascii_case("true") || value == "1",
        Err(_) => default,
    }
}

#[cfg(test)]
impl Config {
    /// Fixture used across stage and pipeline tests: one enabled server
    /// "alpha" whose remote pattern points at a local directory, zero
    /// backoff delays so retries run instantly.
    pub(crate) fn for_tests(root: &Path, remote_dir: &Path) -> Self {
        Self {
            data_root: root.join("data"),
            state_dir: root.join("state"),
            share_dir: None,
            retry: RetrySettings {
                max_retry_copy: 3,
                max_retry_extract: 3,
                backoff: RetryConfig {
                    base_delay_secs: 0,
                    max_delay_secs: 0,
                    multiplier: 2.0,
                },
            },
            rsync: RsyncConfig::default(),
            extract: ExtractConfig::default(),
            pipeline: PipelineConfig {
                parallel_workers: 2,
                file_check_interval: 60,
                disk_space_threshold_gb: 0,
            },
            servers: vec![ServerConfig {
                name: "alpha".into(),
                host: "localhost".into(),
                user: "tester".into(),
                remote_path: format!("{}/*.gz", remote_dir.display()),
                enabled: true,
            }],
        }
    }
}
