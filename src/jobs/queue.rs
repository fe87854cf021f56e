//! The two queue strategies behind one interface.

use super::processor::{JobDriver, JobProcessor};
use super::store::{HistoryPolicy, JobLedger, JobStore};
use super::types::{Job, JobHandle, JobId, QueueMode, QueueStats};
use super::WorkUnit;
use crate::resilience::{ResilienceExecutor, RetryPolicy};
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Caller-facing queue interface shared by both modes.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Record the job and schedule it. Never waits for the work itself.
    async fn submit(&self, unit: WorkUnit) -> Result<JobHandle>;
    async fn status(&self, id: &JobId) -> Result<Option<Job>>;
    async fn stats(&self) -> Result<QueueStats>;
    async fn purge_history(&self) -> Result<usize>;
    fn mode(&self) -> QueueMode;
}

/// Fallback mode: jobs run as Tokio tasks of this process.
pub struct InProcessQueue {
    store: Arc<JobStore>,
    driver: JobDriver,
}

impl InProcessQueue {
    pub fn new(
        processor: Arc<dyn JobProcessor>,
        executor: ResilienceExecutor,
        policy: RetryPolicy,
        history: HistoryPolicy,
    ) -> Self {
        let store = Arc::new(JobStore::new(history));
        let ledger: Arc<dyn JobLedger> = store.clone();
        Self {
            store,
            driver: JobDriver {
                ledger,
                processor,
                executor,
                policy,
            },
        }
    }
}

#[async_trait]
impl JobQueue for InProcessQueue {
    async fn submit(&self, unit: WorkUnit) -> Result<JobHandle> {
        self.store.purge_history().await;
        let job = Job::new(unit);
        let handle = job.handle();
        self.store.insert(job).await;

        let driver = self.driver.clone();
        let id = handle.id;
        tokio::spawn(async move {
            if let Err(e) = driver.drive(id).await {
                error!(job_id = %id, error = %e, "job bookkeeping failed");
            }
        });
        debug!(job_id = %handle.id, kind = %handle.kind, "job scheduled in-process");
        Ok(handle)
    }

    async fn status(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(self.store.get(id).await)
    }

    async fn stats(&self) -> Result<QueueStats> {
        self.store.purge_history().await;
        Ok(self.store.stats().await)
    }

    async fn purge_history(&self) -> Result<usize> {
        Ok(self.store.purge_history().await)
    }

    fn mode(&self) -> QueueMode {
        QueueMode::InProcess
    }
}

/// Storage and hand-off for durable mode; implement it over an external queue.
///
/// `claim` must hand each job to exactly one worker.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<()>;
    /// Take the next pending job, if any.
    async fn claim(&self) -> Result<Option<Job>>;
    async fn load(&self, id: &JobId) -> Result<Option<Job>>;
    async fn save(&self, job: Job) -> Result<()>;
    async fn stats(&self) -> Result<QueueStats>;
    async fn purge_history(&self) -> Result<usize>;

    /// Block until work may be available or `max_wait` passes.
    async fn wait_for_work(&self, max_wait: Duration) {
        tokio::time::sleep(max_wait).await;
    }

    fn name(&self) -> &'static str;
}

/// Exposes a backend's bookkeeping to the job driver.
struct BackendLedger(Arc<dyn QueueBackend>);

#[async_trait]
impl JobLedger for BackendLedger {
    async fn load(&self, id: &JobId) -> Result<Option<Job>> {
        self.0.load(id).await
    }

    async fn save(&self, job: Job) -> Result<()> {
        self.0.save(job).await
    }
}

/// Local [`QueueBackend`] with worker semantics.
pub struct MemoryQueueBackend {
    store: JobStore,
    ready: Mutex<VecDeque<JobId>>,
    notify: Notify,
}

impl MemoryQueueBackend {
    pub fn new(history: HistoryPolicy) -> Self {
        Self {
            store: JobStore::new(history),
            ready: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }
}

impl Default for MemoryQueueBackend {
    fn default() -> Self {
        Self::new(HistoryPolicy::default())
    }
}

#[async_trait]
impl QueueBackend for MemoryQueueBackend {
    async fn enqueue(&self, job: Job) -> Result<()> {
        let id = job.id;
        self.store.insert(job).await;
        self.ready.lock().await.push_back(id);
        self.notify.notify_one();
        Ok(())
    }

    async fn claim(&self) -> Result<Option<Job>> {
        loop {
            let Some(id) = self.ready.lock().await.pop_front() else {
                return Ok(None);
            };
            // Skip ids purged while still queued.
            if let Some(job) = self.store.get(&id).await {
                return Ok(Some(job));
            }
        }
    }

    async fn load(&self, id: &JobId) -> Result<Option<Job>> {
        self.store.load(id).await
    }

    async fn save(&self, job: Job) -> Result<()> {
        self.store.save(job).await
    }

    async fn stats(&self) -> Result<QueueStats> {
        self.store.purge_history().await;
        Ok(self.store.stats().await)
    }

    async fn purge_history(&self) -> Result<usize> {
        Ok(self.store.purge_history().await)
    }

    async fn wait_for_work(&self, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.notify.notified()).await;
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Durable mode front: enqueue and query only; [`JobWorker`]s do the work.
pub struct DurableQueue {
    backend: Arc<dyn QueueBackend>,
}

impl DurableQueue {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }
}

#[async_trait]
impl JobQueue for DurableQueue {
    async fn submit(&self, unit: WorkUnit) -> Result<JobHandle> {
        self.backend.purge_history().await?;
        let job = Job::new(unit);
        let handle = job.handle();
        self.backend.enqueue(job).await?;
        debug!(job_id = %handle.id, kind = %handle.kind, backend = self.backend.name(), "job enqueued");
        Ok(handle)
    }

    async fn status(&self, id: &JobId) -> Result<Option<Job>> {
        self.backend.load(id).await
    }

    async fn stats(&self) -> Result<QueueStats> {
        self.backend.stats().await
    }

    async fn purge_history(&self) -> Result<usize> {
        self.backend.purge_history().await
    }

    fn mode(&self) -> QueueMode {
        QueueMode::Durable
    }
}

/// Pulls jobs from a [`QueueBackend`] and runs them one at a time.
pub struct JobWorker {
    name: String,
    backend: Arc<dyn QueueBackend>,
    driver: JobDriver,
    poll_interval: Duration,
}

impl JobWorker {
    pub fn new(
        name: impl Into<String>,
        backend: Arc<dyn QueueBackend>,
        processor: Arc<dyn JobProcessor>,
        executor: ResilienceExecutor,
        policy: RetryPolicy,
    ) -> Self {
        let ledger: Arc<dyn JobLedger> = Arc::new(BackendLedger(Arc::clone(&backend)));
        Self {
            name: name.into(),
            backend,
            driver: JobDriver {
                ledger,
                processor,
                executor,
                policy,
            },
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_poll_interval(mut self, every: Duration) -> Self {
        self.poll_interval = every;
        self
    }

    /// Claim and run one job. Returns `false` when the queue was empty.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(job) = self.backend.claim().await? else {
            return Ok(false);
        };
        debug!(worker = %self.name, job_id = %job.id, "job claimed");
        self.driver.drive(job.id).await?;
        Ok(true)
    }

    /// Run until the returned task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(worker = %self.name, backend = self.backend.name(), "job worker started");
            loop {
                match self.run_once().await {
                    Ok(true) => {}
                    Ok(false) => self.backend.wait_for_work(self.poll_interval).await,
                    Err(e) => {
                        error!(worker = %self.name, error = %e, "job worker error");
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobContext, JobStatus};
    use serde_json::{json, Value};

    struct Echo;

    #[async_trait]
    impl JobProcessor for Echo {
        async fn process(&self, _ctx: &JobContext, unit: &WorkUnit) -> Result<Value> {
            Ok(unit.payload.clone())
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new("job").with_max_retries(0).without_jitter()
    }

    #[tokio::test]
    async fn test_durable_submit_only_enqueues() {
        let backend: Arc<dyn QueueBackend> = Arc::new(MemoryQueueBackend::default());
        let queue = DurableQueue::new(Arc::clone(&backend));
        let handle = queue.submit(WorkUnit::new("echo", json!(1))).await.unwrap();
        assert_eq!(handle.status, JobStatus::Pending);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(queue.mode(), QueueMode::Durable);

        let worker = JobWorker::new(
            "w1",
            Arc::clone(&backend),
            Arc::new(Echo),
            ResilienceExecutor::new(),
            policy(),
        );
        assert!(worker.run_once().await.unwrap());
        assert!(!worker.run_once().await.unwrap());

        let job = queue.status(&handle.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_claim_hands_out_each_job_once() {
        let backend = MemoryQueueBackend::default();
        for i in 0..3 {
            backend
                .enqueue(Job::new(WorkUnit::new("echo", json!(i))))
                .await
                .unwrap();
        }
        let mut seen = Vec::new();
        while let Some(job) = backend.claim().await.unwrap() {
            seen.push(job.payload);
        }
        assert_eq!(seen, vec![json!(0), json!(1), json!(2)]);
    }
}
