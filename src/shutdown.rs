//! Stop handling for watch mode.
//!
//! A pipeline pass is never interrupted mid-file; the first signal only
//! marks the run loop to stop once the pass in flight finishes.

use tokio_util::sync::CancellationToken;

/// Handle the run loop polls between passes. The first SIGINT or SIGTERM
/// requests a stop after the current pass; a second signal exits the
/// process immediately.
#[derive(Clone)]
pub(crate) struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Spawn the signal listener and return the handle.
    pub(crate) fn listen() -> Self {
        let token = CancellationToken::new();
        let signal_token = token.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("shutdown requested, stopping after the current pass");
            signal_token.cancel();
            wait_for_signal().await;
            tracing::warn!("second signal, exiting immediately");
            std::process::exit(130);
        });
        Self { token }
    }

    /// Whether a stop has been requested.
    pub(crate) fn requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once a stop is requested; used to cut the inter-pass sleep
    /// short instead of waiting out the full interval.
    pub(crate) async fn wait(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM, handling Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
