//! Time-bounded waiting primitives.
//!
//! Every call site that waits on a remote job shares the same two pieces:
//! a `TimeBudget` bounding the wait by the invocation's remaining time,
//! and `poll_until`, which re-runs a probe on a fixed interval until it
//! yields a value or the budget runs out. `RetryPolicy` adds backoff for
//! transient transport errors.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Retry policy for transient failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Run `op`, retrying with backoff while `is_transient` approves the
    /// error and attempts remain. The final error is returned unchanged.
    pub async fn retry<T, E, F, Fut, P>(&self, mut op: F, is_transient: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) && self.should_retry(attempt) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e,
                        "transient error, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Remaining-time budget for one invocation.
///
/// Stage handlers run inside an execution environment with a hard
/// deadline; waiting past it would have the environment kill the handler
/// mid-poll. The budget lets the wait loop give up cleanly first.
#[derive(Debug, Clone, Copy)]
pub struct TimeBudget {
    started: Instant,
    deadline: Instant,
}

impl TimeBudget {
    pub fn new(total: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + total,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether another sleep of `interval` is safe. Requires two intervals
    /// of headroom so the post-sleep probe also fits.
    pub fn covers(&self, interval: Duration) -> bool {
        self.remaining() > interval * 2
    }
}

/// Why a wait ended without producing a value
#[derive(Debug, thiserror::Error)]
pub enum WaitError<E> {
    /// The time budget could no longer cover another poll cycle
    #[error("wait timed out after {elapsed:?}")]
    TimedOut { elapsed: Duration },

    /// The probe itself failed
    #[error(transparent)]
    Inner(E),
}

/// Re-run `probe` every `interval` until it yields `Some(value)` or the
/// budget is exhausted. The probe runs once immediately; probe errors end
/// the wait at once.
pub async fn poll_until<T, E, F, Fut>(
    interval: Duration,
    budget: TimeBudget,
    mut probe: F,
) -> Result<T, WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    loop {
        if let Some(value) = probe().await.map_err(WaitError::Inner)? {
            return Ok(value);
        }

        if !budget.covers(interval) {
            return Err(WaitError::TimedOut {
                elapsed: budget.elapsed(),
            });
        }

        tokio::time::sleep(interval).await;
    }
}
