//! Orchestrator — drives the transfer and decompression stages across all
//! enabled servers with bounded parallelism, and produces the run summary.
//!
//! Per-server tasks run concurrently up to the configured worker count;
//! files within one server are processed strictly sequentially, which is
//! what guarantees a single owner per (server, filename) pair and lets the
//! state store go lock-free.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;

use crate::config::{Config, ServerConfig};
use crate::extract::Extractor;
use crate::state::StateStore;
use crate::transfer::remote::RemoteSource;
use crate::transfer::{CollectOutcome, Collector};

/// Per-server counts for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerReport {
    pub processed: u64,
    pub failed: u64,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Counts for the crash-recovery pass over already-staged files.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IncomingReport {
    pub processed: u64,
    pub failed: u64,
}

/// Aggregate result of one pipeline run, keyed by server name.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub servers: BTreeMap<String, ServerReport>,
    pub incoming: IncomingReport,
}

pub struct Pipeline {
    config: Arc<Config>,
    collector: Collector,
    extractor: Extractor,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        state: Arc<StateStore>,
        remote: Arc<dyn RemoteSource>,
    ) -> Self {
        let collector = Collector::new(config.clone(), state.clone(), remote);
        let extractor = Extractor::new(config.clone(), state);
        Self {
            config,
            collector,
            extractor,
        }
    }

    /// Execute a full run: disk space check (warn-only), incoming backlog,
    /// then all servers through the bounded worker pool.
    ///
    /// The run always completes; files needing attention are discoverable
    /// via the error subtrees and their state records, never via a run-wide
    /// failure.
    pub async fn run(self: &Arc<Self>, process_incoming: bool) -> RunSummary {
        tracing::info!("starting pipeline run");
        self.check_disk_space();

        let incoming = if process_incoming {
            self.process_incoming().await
        } else {
            IncomingReport::default()
        };

        let workers = self.config.pipeline.parallel_workers.max(1);
        let reports: Vec<(String, ServerReport)> =
            stream::iter(self.config.servers.clone().into_iter().map(|server| {
                let pipeline = Arc::clone(self);
                async move {
                    let name = server.name.clone();
                    // Spawned so a panicking server task is recorded as that
                    // server's failure instead of tearing down siblings.
                    let handle =
                        tokio::spawn(async move { pipeline.process_server(&server).await });
                    match handle.await {
                        Ok(report) => (name, report),
                        Err(e) => {
                            tracing::error!(server = %name, error = %e, "server task failed");
                            (
                                name,
                                ServerReport {
                                    error: Some(e.to_string()),
                                    ..ServerReport::default()
                                },
                            )
                        }
                    }
                }
            }))
            .buffer_unordered(workers)
            .collect()
            .await;

        let summary = RunSummary {
            servers: reports.into_iter().collect(),
            incoming,
        };
        tracing::info!(
            servers = summary.servers.len(),
            incoming_processed = summary.incoming.processed,
            incoming_failed = summary.incoming.failed,
            "pipeline run complete"
        );
        summary
    }

    /// Process one server: list, copy each file, then run each collected
    /// file through decompression and its terminal moves. Files are strictly
    /// sequential within the server; one file's failure never stops the next.
    pub async fn process_server(&self, server: &ServerConfig) -> ServerReport {
        if !server.enabled {
            tracing::info!(server = %server.name, "server disabled, skipping");
            return ServerReport {
                skipped: true,
                ..ServerReport::default()
            };
        }
        tracing::info!(server = %server.name, "processing server");

        let remote_files = self.collector.list_remote(server).await;

        let mut collected = Vec::new();
        let mut report = ServerReport::default();
        for remote_path in remote_files {
            match self.collector.collect_file(server, &remote_path).await {
                CollectOutcome::Ready(local) => collected.push(local),
                CollectOutcome::Skipped => {}
                CollectOutcome::Failed => report.failed += 1,
            }
        }

        for local in collected {
            if self.finish_file(&local, &server.name).await {
                report.processed += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }

    /// Crash-recovery pass: feed compressed files already sitting in each
    /// server's incoming area through decompression, without touching the
    /// network.
    pub async fn process_incoming(&self) -> IncomingReport {
        tracing::info!("processing incoming backlog");
        let mut report = IncomingReport::default();

        for server in self.config.servers.iter().filter(|s| s.enabled) {
            let dir = self.config.incoming_dir(&server.name);
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "cannot scan incoming directory");
                    continue;
                }
            };
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(dir = %dir.display(), error = %e, "error scanning incoming directory");
                        break;
                    }
                };
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("gz") {
                    continue;
                }
                if self.finish_file(&path, &server.name).await {
                    report.processed += 1;
                } else {
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            processed = report.processed,
            failed = report.failed,
            "incoming backlog done"
        );
        report
    }

    /// Take one collected file through extraction, the processed move, and
    /// the share publish. Returns whether the file completed.
    async fn finish_file(&self, gz_path: &Path, server: &str) -> bool {
        let Some(extracted) = self.extractor.extract_file(gz_path, server).await else {
            return false;
        };
        if !self.config.extract.delete_source {
            if let Err(e) = self.extractor.move_to_processed(gz_path, server).await {
                tracing::error!(server, file = %gz_path.display(), error = %e, "move to processed failed");
                return false;
            }
        }
        // Publish failure is independent of pipeline status: the extraction
        // stands and the file still counts as processed.
        if let Err(e) = self.extractor.move_to_share(&extracted, server).await {
            tracing::error!(server, file = %extracted.display(), error = %e, "share publish failed, extracted file kept in place");
        }
        true
    }

    /// Warn-only admission check: low disk space degrades gracefully
    /// rather than halting ingestion.
    fn check_disk_space(&self) {
        let threshold_gb = self.config.pipeline.disk_space_threshold_gb;
        match fs4::available_space(&self.config.data_root) {
            Ok(bytes) => {
                let available_gb = bytes as f64 / (1024u64.pow(3)) as f64;
                if available_gb < threshold_gb as f64 {
                    tracing::warn!(
                        available_gb = format!("{available_gb:.2}"),
                        threshold_gb,
                        "low disk space, continuing anyway"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not check disk space");
            }
        }
    }
}
