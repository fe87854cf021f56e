//! Job runner facade.

use super::processor::JobProcessor;
use super::queue::{DurableQueue, InProcessQueue, JobQueue, JobWorker, QueueBackend};
use super::store::HistoryPolicy;
use super::types::{Job, JobHandle, JobId, QueueMode, QueueStats, WorkUnit};
use crate::resilience::{ResilienceExecutor, RetryPolicy};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    #[serde(rename = "attempt_deadline_ms", with = "crate::config::duration_ms")]
    pub attempt_deadline: Duration,
    #[serde(rename = "base_delay_ms", with = "crate::config::duration_ms")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "crate::config::duration_ms")]
    pub max_delay: Duration,
    #[serde(rename = "max_jitter_ms", with = "crate::config::duration_ms")]
    pub max_jitter: Duration,
    pub history_limit: usize,
    #[serde(rename = "history_ttl_ms", with = "crate::config::duration_ms")]
    pub history_ttl: Duration,
    /// Local workers spawned in durable mode; 0 means workers run elsewhere.
    pub workers: usize,
    #[serde(rename = "poll_interval_ms", with = "crate::config::duration_ms")]
    pub poll_interval: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            attempt_deadline: Duration::from_secs(120),
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(1000),
            history_limit: 1000,
            history_ttl: Duration::from_secs(24 * 3600),
            workers: 1,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl JobConfig {
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_attempt_deadline(mut self, d: Duration) -> Self {
        self.attempt_deadline = d;
        self
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    pub fn with_history(mut self, limit: usize, ttl: Duration) -> Self {
        self.history_limit = limit;
        self.history_ttl = ttl;
        self
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.max_jitter = Duration::ZERO;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new("background_job")
            .with_max_retries(self.max_retries)
            .with_deadline(self.attempt_deadline)
            .with_base_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_max_jitter(self.max_jitter)
    }

    pub fn history(&self) -> HistoryPolicy {
        HistoryPolicy {
            limit: self.history_limit,
            ttl: self.history_ttl,
        }
    }
}

/// Accepts deferred work and reports on it, in either queue mode.
///
/// The mode is fixed at construction; callers see the same interface.
pub struct JobRunner {
    queue: Arc<dyn JobQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl JobRunner {
    /// Fallback mode: each submitted job runs as a task of this process.
    pub fn in_process(
        processor: Arc<dyn JobProcessor>,
        config: &JobConfig,
        executor: ResilienceExecutor,
    ) -> Self {
        info!(mode = "in_process", max_retries = config.max_retries, "job runner ready");
        Self::from_queue(Arc::new(InProcessQueue::new(
            processor,
            executor,
            config.policy(),
            config.history(),
        )))
    }

    /// Durable mode. With a processor, `config.workers` local workers are
    /// spawned (requires a Tokio runtime); without one, jobs wait for external workers.
    pub fn durable(
        backend: Arc<dyn QueueBackend>,
        processor: Option<Arc<dyn JobProcessor>>,
        config: &JobConfig,
        executor: ResilienceExecutor,
    ) -> Self {
        let mut workers = Vec::new();
        if let Some(processor) = processor {
            for i in 0..config.workers {
                let worker = JobWorker::new(
                    format!("worker-{}", i + 1),
                    Arc::clone(&backend),
                    Arc::clone(&processor),
                    executor.clone(),
                    config.policy(),
                )
                .with_poll_interval(config.poll_interval);
                workers.push(worker.spawn());
            }
        }
        info!(
            mode = "durable",
            backend = backend.name(),
            workers = workers.len(),
            "job runner ready"
        );
        Self {
            queue: Arc::new(DurableQueue::new(backend)),
            workers,
        }
    }

    pub fn from_queue(queue: Arc<dyn JobQueue>) -> Self {
        Self {
            queue,
            workers: Vec::new(),
        }
    }

    pub fn mode(&self) -> QueueMode {
        self.queue.mode()
    }

    pub async fn submit(&self, unit: WorkUnit) -> Result<JobHandle> {
        self.queue.submit(unit).await
    }

    pub async fn status(&self, id: &JobId) -> Result<Option<Job>> {
        self.queue.status(id).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    pub async fn purge_history(&self) -> Result<usize> {
        self.queue.purge_history().await
    }

    /// Poll until the job is terminal or `timeout` elapses.
    pub async fn wait(&self, id: &JobId, timeout: Duration) -> Result<Job> {
        let deadline = Instant::now() + timeout;
        let mut every = Duration::from_millis(5);
        loop {
            match self.queue.status(id).await? {
                Some(job) if job.status.is_terminal() => return Ok(job),
                Some(_) => {}
                None => {
                    return Err(Error::validation_with_context(
                        format!("unknown job {}", id),
                        ErrorContext::new()
                            .with_field_path("job_id")
                            .with_source("job_runner"),
                    ))
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    operation: "job_wait".to_string(),
                    deadline: timeout,
                });
            }
            tokio::time::sleep(every.min(deadline.saturating_duration_since(Instant::now()))).await;
            every = (every * 2).min(Duration::from_millis(200));
        }
    }
}

impl Drop for JobRunner {
    fn drop(&mut self) {
        for worker in self.workers.drain(..) {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobContext, JobStatus, MemoryQueueBackend};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Slow;

    #[async_trait]
    impl JobProcessor for Slow {
        async fn process(&self, ctx: &JobContext, _unit: &WorkUnit) -> Result<Value> {
            ctx.set_progress(30).await?;
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(json!("done"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_does_not_wait_for_work() {
        let runner = JobRunner::in_process(
            Arc::new(Slow),
            &JobConfig::default(),
            ResilienceExecutor::new(),
        );
        let handle = runner.submit(WorkUnit::new("slow", json!({}))).await.unwrap();
        assert_eq!(handle.status, JobStatus::Pending);
        assert_eq!(runner.mode(), QueueMode::InProcess);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let running = runner.status(&handle.id).await.unwrap().unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.progress, 30);

        let done = runner
            .wait(&handle.id, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let runner = JobRunner::in_process(
            Arc::new(Slow),
            &JobConfig::default(),
            ResilienceExecutor::new(),
        );
        let handle = runner.submit(WorkUnit::new("slow", json!({}))).await.unwrap();
        let err = runner
            .wait(&handle.id, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_wait_unknown_job() {
        let backend = Arc::new(MemoryQueueBackend::default());
        let runner = JobRunner::durable(backend, None, &JobConfig::default(), ResilienceExecutor::new());
        let err = runner
            .wait(&JobId::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
