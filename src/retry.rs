use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Pure backoff curve: `min(base * multiplier^(attempt-1), max)`.
///
/// `attempt` starts at 1. Jitter is applied separately so this stays
/// deterministic and testable.
pub fn backoff_delay(attempt: u32, base_secs: f64, max_secs: f64, multiplier: f64) -> f64 {
    let exp = multiplier.powi(attempt.saturating_sub(1) as i32);
    (base_secs * exp).min(max_secs)
}

/// Exponential backoff configuration with jitter to prevent thundering herd
/// when several files hit the same transient failure at once.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 60,
            max_delay_secs: 3600,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Compute the delay after a failed `attempt` (1-indexed), adding a
    /// uniformly-random jitter of up to 25% of the capped delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = backoff_delay(
            attempt,
            self.base_delay_secs as f64,
            self.max_delay_secs as f64,
            self.multiplier,
        );
        let jitter = delay * 0.25 * rand::thread_rng().gen_range(0.0..1.0);
        Duration::from_secs_f64(delay + jitter)
    }
}

/// Terminal failure of a retried operation, tagged with how many attempts
/// were actually made.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub error: E,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryFailure<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "failed after {} attempt(s): {}",
            self.attempts, self.error
        )
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryFailure<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Retry an async operation with exponential backoff and jitter.
///
/// - `max_attempts`: total invocation budget (first try included)
/// - `classifier`: inspects an error and returns `Retry` or `Abort`
/// - `operation`: the async closure to retry
///
/// Returns the first `Ok` result, or the last error once the budget is
/// exhausted or the classifier aborts. An `Abort` stops immediately, so the
/// attempt count on the failure reflects the real number of invocations.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    max_attempts: u32,
    classifier: C,
    operation: F,
) -> Result<T, RetryFailure<E>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut last_err: Option<E> = None;

    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(val) => {
                if attempt > 1 {
                    tracing::info!(attempt, "operation succeeded after retry");
                }
                return Ok(val);
            }
            Err(e) => {
                if classifier(&e) == RetryAction::Abort {
                    tracing::warn!(attempt, error = %e, "non-retryable error, aborting");
                    return Err(RetryFailure {
                        attempts: attempt,
                        error: e,
                    });
                }
                if attempt >= max_attempts {
                    last_err = Some(e);
                    break;
                }
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_secs = delay.as_secs_f64(),
                    error = %e,
                    "retryable error, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(RetryFailure {
        attempts: max_attempts,
        error: last_err.expect("loop must have run at least once"),
    })
}
