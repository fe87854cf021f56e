//! Job processors and the attempt loop shared by both queue modes.

use super::store::{update_job, JobLedger};
use super::types::{Job, JobId, WorkUnit};
use crate::resilience::{Decision, ErrorClass, ResilienceExecutor, ResiliencePolicy, RetryPolicy};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Performs one attempt of a work unit.
///
/// Retries are the runner's business; a processor should make exactly one
/// upstream call per invocation and return its error unchanged so it can be
/// classified.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, ctx: &JobContext, unit: &WorkUnit) -> Result<Value>;
}

/// Handle given to a processor for the duration of one attempt.
#[derive(Clone)]
pub struct JobContext {
    id: JobId,
    attempt: u32,
    ledger: Arc<dyn JobLedger>,
}

impl JobContext {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// 1-indexed.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record progress (clamped to 100). Visible to `status` immediately.
    pub async fn set_progress(&self, progress: u8) -> Result<()> {
        let progress = progress.min(100);
        update_job(self.ledger.as_ref(), &self.id, move |job| {
            job.progress = progress
        })
        .await
        .map(|_| ())
    }
}

/// Routes work units to processors by [`WorkUnit::kind`].
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn JobProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: impl Into<String>, processor: Arc<dyn JobProcessor>) -> Self {
        self.processors.insert(kind.into(), processor);
        self
    }

    pub fn register(&mut self, kind: impl Into<String>, processor: Arc<dyn JobProcessor>) {
        self.processors.insert(kind.into(), processor);
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.processors.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }
}

#[async_trait]
impl JobProcessor for ProcessorRegistry {
    async fn process(&self, ctx: &JobContext, unit: &WorkUnit) -> Result<Value> {
        match self.processors.get(&unit.kind) {
            Some(processor) => processor.process(ctx, unit).await,
            // Configuration errors classify as Fatal, so this is never retried.
            None => Err(Error::configuration_with_context(
                format!("no processor registered for job kind '{}'", unit.kind),
                ErrorContext::new()
                    .with_field_path("kind")
                    .with_details(format!("registered: {}", self.kinds().join(", ")))
                    .with_source("processor_registry"),
            )),
        }
    }
}

/// Retry rule for job attempts.
///
/// A processor failure is retried whatever its class, with the backoff and
/// budget of the wrapped policy. Only failures that another attempt cannot fix
/// are final: malformed output, cancellation and misconfiguration (such as an
/// unregistered kind).
struct JobRetry<'a>(&'a RetryPolicy);

impl JobRetry<'_> {
    fn is_final(error: &Error) -> bool {
        matches!(error, Error::Cancelled | Error::Configuration { .. })
            || error.class() == ErrorClass::ParseFailure
    }
}

impl ResiliencePolicy for JobRetry<'_> {
    fn decide(&self, error: &Error, retries_so_far: u32) -> Decision {
        if Self::is_final(error) || retries_so_far >= self.0.max_retries {
            return Decision::Fail;
        }
        Decision::Retry {
            delay: self.0.backoff_delay(retries_so_far + 1, error.retry_after()),
        }
    }

    fn deadline(&self) -> Duration {
        self.0.deadline
    }

    fn operation(&self) -> &str {
        &self.0.operation
    }
}

/// Runs a stored job to a terminal status, writing every transition to the ledger.
#[derive(Clone)]
pub(crate) struct JobDriver {
    pub(crate) ledger: Arc<dyn JobLedger>,
    pub(crate) processor: Arc<dyn JobProcessor>,
    pub(crate) executor: ResilienceExecutor,
    pub(crate) policy: RetryPolicy,
}

impl JobDriver {
    pub(crate) async fn drive(&self, id: JobId) -> Result<Option<Job>> {
        let Some(job) = self.ledger.load(&id).await? else {
            warn!(job_id = %id, "job vanished before it could run");
            return Ok(None);
        };
        let unit = job.work_unit();
        let attempts = AtomicU32::new(0);

        let outcome = self
            .executor
            .execute_observed(
                &JobRetry(&self.policy),
                || {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let ledger = Arc::clone(&self.ledger);
                    let processor = Arc::clone(&self.processor);
                    let unit = &unit;
                    async move {
                        update_job(ledger.as_ref(), &id, move |j| j.begin_attempt(attempt))
                            .await?;
                        let ctx = JobContext {
                            id,
                            attempt,
                            ledger: Arc::clone(&ledger),
                        };
                        let res = processor.process(&ctx, unit).await;
                        if let Err(e) = &res {
                            let (class, message) = (e.class(), e.to_string());
                            if let Err(le) = update_job(ledger.as_ref(), &id, move |j| {
                                j.record_failure(class, message)
                            })
                            .await
                            {
                                warn!(job_id = %id, error = %le, "could not record failed attempt");
                            }
                        }
                        res
                    }
                },
                |attempt, err| {
                    debug!(
                        job_id = %id,
                        kind = %unit.kind,
                        attempt,
                        error_class = err.class().name(),
                        "job attempt failed"
                    );
                },
            )
            .await;

        let attempts = attempts.load(Ordering::SeqCst);
        let finished = match outcome {
            Ok(result) => {
                info!(job_id = %id, kind = %unit.kind, attempts, "job completed");
                update_job(self.ledger.as_ref(), &id, move |j| j.complete(result)).await?
            }
            Err(err) => {
                warn!(
                    job_id = %id,
                    kind = %unit.kind,
                    attempts,
                    error_class = err.class().name(),
                    error = %err,
                    "job failed"
                );
                let (class, message) = (err.class(), err.to_string());
                update_job(self.ledger.as_ref(), &id, move |j| {
                    // Timeouts never reach the attempt body, so the count is fixed up here.
                    j.attempts = j.attempts.max(attempts);
                    j.fail(class, message)
                })
                .await?
            }
        };
        Ok(finished)
    }
}
