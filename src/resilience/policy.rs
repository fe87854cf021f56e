use crate::Error;
use rand::Rng;
use std::time::Duration;

/// Decision for how to proceed after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    Fail,
}

/// Pluggable retry decision.
///
/// `retries_so_far` is 0 after the first failed attempt.
pub trait ResiliencePolicy: Send + Sync {
    fn decide(&self, error: &Error, retries_so_far: u32) -> Decision;

    /// Upper bound for a single attempt.
    fn deadline(&self) -> Duration;

    /// Name used in log events.
    fn operation(&self) -> &str;
}

/// Deadline and exponential backoff configuration for one kind of upstream call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub operation: String,
    pub deadline: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the uniform random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            operation: "upstream".to_string(),
            deadline: Duration::from_secs(30),
            max_retries: 2,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Self::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_base_delay(mut self, d: Duration) -> Self {
        self.base_delay = d;
        self
    }

    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    pub fn with_max_jitter(mut self, d: Duration) -> Self {
        self.max_jitter = d;
        self
    }

    /// Disable jitter. Mostly useful for deterministic tests.
    pub fn without_jitter(self) -> Self {
        self.with_max_jitter(Duration::ZERO)
    }

    /// Delay before retry `n` (1-indexed):
    /// `min(base * 2^(n-1) + uniform(0, max_jitter), max_delay)`.
    ///
    /// A provider retry-after hint replaces the exponential term.
    pub fn backoff_delay(&self, n: u32, retry_after: Option<Duration>) -> Duration {
        let cap = self.max_delay.as_millis() as u64;
        if let Some(hint) = retry_after {
            return Duration::from_millis((hint.as_millis() as u64).min(cap));
        }
        let base = self.base_delay.as_millis() as u64;
        let factor = 1u64.checked_shl(n.saturating_sub(1)).unwrap_or(u64::MAX);
        let exp = base.saturating_mul(factor);
        let jitter_cap = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap)
        };
        Duration::from_millis(exp.saturating_add(jitter).min(cap))
    }
}

impl ResiliencePolicy for RetryPolicy {
    fn decide(&self, error: &Error, retries_so_far: u32) -> Decision {
        if error.class().retryable() && retries_so_far < self.max_retries {
            Decision::Retry {
                delay: self.backoff_delay(retries_so_far + 1, error.retry_after()),
            }
        } else {
            Decision::Fail
        }
    }

    fn deadline(&self) -> Duration {
        self.deadline
    }

    fn operation(&self) -> &str {
        &self.operation
    }
}
