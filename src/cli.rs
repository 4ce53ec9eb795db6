use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "logpipe-relay",
    about = "Pull compressed log files from remote hosts, decompress them, and track each file's lifecycle"
)]
pub struct Cli {
    /// Directory holding pipeline.conf and sources.conf
    #[arg(short = 'c', long, env = "CONFIG_DIR", default_value = "/opt/logpipe-relay/config")]
    pub config_dir: String,

    /// Override the configured worker count
    #[arg(long)]
    pub workers: Option<usize>,

    /// Skip the recovery pass over files already staged in incoming/
    #[arg(long)]
    pub skip_incoming: bool,

    /// Run continuously, waiting file_check_interval seconds between passes
    #[arg(long)]
    pub watch: bool,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["logpipe-relay"]);
        assert_eq!(cli.config_dir, "/opt/logpipe-relay/config");
        assert!(!cli.watch);
        assert!(!cli.skip_incoming);
        assert!(cli.workers.is_none());
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::parse_from([
            "logpipe-relay",
            "--config-dir",
            "/etc/relay",
            "--workers",
            "8",
            "--watch",
            "--log-format",
            "json",
        ]);
        assert_eq!(cli.config_dir, "/etc/relay");
        assert_eq!(cli.workers, Some(8));
        assert!(cli.watch);
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
