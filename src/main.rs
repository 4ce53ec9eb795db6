//! logpipe-relay — log file relay pipeline.
//!
//! Copies compressed log files from remote servers over rsync/ssh,
//! decompresses them locally, and moves each file through a staging tree
//! (incoming, extracted, processed, error) with a durable JSON state record
//! per file. Transient failures are retried with exponential backoff;
//! corrupt archives are quarantined and never retried.

#![warn(clippy::all)]

mod cli;
mod config;
mod extract;
mod fsops;
mod pipeline;
mod retry;
mod shutdown;
mod state;
mod transfer;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use fs4::fs_std::FileExt;
use tracing_subscriber::EnvFilter;

use cli::LogFormat;
use pipeline::Pipeline;
use state::StateStore;
use transfer::remote::RsyncRemote;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter()));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    let config_dir = config::expand_tilde(&cli.config_dir);
    let mut config = config::Config::load(&config_dir)?;
    if let Some(workers) = cli.workers {
        config.pipeline.parallel_workers = workers;
    }
    if config.servers.is_empty() {
        tracing::warn!(
            config_dir = %config_dir.display(),
            "no servers configured, nothing to do"
        );
    }
    config.ensure_layout()?;

    // The state store assumes a single owner per record; hold an exclusive
    // lock for the whole process lifetime so a second instance fails fast.
    let lock_path = config.state_dir.join(".lock");
    let lock_file = std::fs::File::create(&lock_path)
        .with_context(|| format!("failed to create lock file: {}", lock_path.display()))?;
    lock_file.try_lock_exclusive().map_err(|_| {
        anyhow::anyhow!(
            "another logpipe-relay instance is running for this state directory (lock: {})",
            lock_path.display()
        )
    })?;

    tracing::info!(
        servers = config.servers.len(),
        workers = config.pipeline.parallel_workers,
        data_root = %config.data_root.display(),
        "starting logpipe-relay"
    );

    let config = Arc::new(config);
    let state = Arc::new(StateStore::open(&config.state_dir)?);
    let remote = Arc::new(RsyncRemote::new(config.rsync.clone()));
    let pipeline = Arc::new(Pipeline::new(config.clone(), state, remote));

    let shutdown = shutdown::Shutdown::listen();

    let process_incoming = !cli.skip_incoming;
    loop {
        let summary = pipeline.run(process_incoming).await;
        print_summary(&summary);

        if !cli.watch {
            break;
        }
        if shutdown.requested() {
            tracing::info!("shutdown requested, exiting...");
            break;
        }
        let interval = config.pipeline.file_check_interval;
        tracing::info!("waiting {} seconds until next pass...", interval);
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(interval)) => {}
            _ = shutdown.wait() => {
                tracing::info!("shutdown during wait, exiting...");
                break;
            }
        }
    }

    Ok(())
}

/// Write the run summary to stdout so operators and cron wrappers can
/// consume it regardless of the log sink.
fn print_summary(summary: &pipeline::RunSummary) {
    match serde_json::to_string_pretty(summary) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "could not serialize run summary"),
    }
}
