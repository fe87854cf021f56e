//! Deadline + retry execution of a single upstream operation.

use super::policy::{Decision, ResiliencePolicy};
use crate::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Aggregate counters across every execution run by one executor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub attempts: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Default)]
struct AtomicStats {
    attempts: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> ExecutorStats {
        ExecutorStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Runs attempts under a [`ResiliencePolicy`].
///
/// The attempt closure must perform exactly one upstream call; all retry logic
/// lives here. Cloning is cheap and clones share counters.
#[derive(Clone, Default)]
pub struct ResilienceExecutor {
    stats: Arc<AtomicStats>,
}

impl ResilienceExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats.to_stats()
    }

    /// Execute `attempt` until it succeeds, fails non-retryably, or the retry
    /// budget is spent. The last error is returned on failure.
    pub async fn execute<T, F, Fut, P>(&self, policy: &P, attempt: F) -> Result<T>
    where
        P: ResiliencePolicy + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_observed(policy, attempt, |_, _| {}).await
    }

    /// Like [`execute`](Self::execute), but calls `on_failure(attempt_index,
    /// error)` after every failed attempt (1-indexed), before the retry decision.
    pub async fn execute_observed<T, F, Fut, P, O>(
        &self,
        policy: &P,
        mut attempt: F,
        mut on_failure: O,
    ) -> Result<T>
    where
        P: ResiliencePolicy + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        O: FnMut(u32, &Error),
    {
        let operation = policy.operation();
        let deadline = policy.deadline();
        let mut retries_so_far = 0u32;

        loop {
            let index = retries_so_far + 1;
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);
            let start = Instant::now();

            // Dropping the attempt future abandons it; the upstream may still finish.
            let outcome = match tokio::time::timeout(deadline, attempt()).await {
                Ok(res) => res,
                Err(_) => {
                    self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                    Err(Error::Timeout {
                        operation: operation.to_string(),
                        deadline,
                    })
                }
            };

            let err = match outcome {
                Ok(value) => {
                    self.stats.successes.fetch_add(1, Ordering::Relaxed);
                    info!(
                        operation,
                        attempt = index,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "upstream attempt succeeded"
                    );
                    return Ok(value);
                }
                Err(err) => err,
            };

            info!(
                operation,
                attempt = index,
                duration_ms = start.elapsed().as_millis() as u64,
                error_class = err.class().name(),
                error = %err,
                "upstream attempt failed"
            );
            on_failure(index, &err);

            match policy.decide(&err, retries_so_far) {
                Decision::Retry { delay } => {
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        operation,
                        attempt = index,
                        delay_ms = delay.as_millis() as u64,
                        error_class = err.class().name(),
                        "retrying upstream operation"
                    );
                    tokio::time::sleep(delay).await;
                    retries_so_far += 1;
                }
                Decision::Fail => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    debug!(operation, attempts = index, "giving up");
                    return Err(err);
                }
            }
        }
    }
}
