//! Background job lifecycle in both queue modes.

use async_trait::async_trait;
use genai_core::jobs::{
    JobConfig, JobContext, JobProcessor, JobRunner, JobStatus, MemoryQueueBackend, QueueMode,
    WorkUnit,
};
use genai_core::resilience::{ErrorClass, ResilienceExecutor};
use genai_core::{Error, Result};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn overloaded(n: u32) -> Error {
    Error::upstream(
        ErrorClass::ServerUnavailable,
        format!("image backend overloaded (call {})", n),
    )
}

fn storage_failure(n: u32) -> Error {
    Error::runtime(format!("storage write failed (call {})", n))
}

fn store_refused(n: u32) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::PermissionDenied,
        format!("image store refused write (call {})", n),
    ))
}

/// Fails `failures` times with the given error, then renders an image URL.
struct FlakyImageGenerator {
    failures: u32,
    calls: AtomicU32,
    error: fn(u32) -> Error,
}

impl FlakyImageGenerator {
    fn new(failures: u32) -> Arc<Self> {
        Self::failing_with(failures, overloaded)
    }

    fn failing_with(failures: u32, error: fn(u32) -> Error) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
            error,
        })
    }
}

#[async_trait]
impl JobProcessor for FlakyImageGenerator {
    async fn process(&self, ctx: &JobContext, unit: &WorkUnit) -> Result<Value> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.set_progress(10).await?;
        if n <= self.failures {
            return Err((self.error)(n));
        }
        ctx.set_progress(90).await?;
        Ok(json!({
            "recipe": unit.payload["name"],
            "image_url": format!("https://img.example/{}.png", ctx.id()),
        }))
    }
}

fn config(max_retries: u32) -> JobConfig {
    let mut config = JobConfig::default()
        .with_max_retries(max_retries)
        .with_delays(Duration::from_millis(5), Duration::from_millis(20))
        .without_jitter();
    config.poll_interval = Duration::from_millis(10);
    config
}

fn unit() -> WorkUnit {
    WorkUnit::new("recipe_image", json!({"name": "Daiquiri"}))
}

async fn run_in_mode(mode: QueueMode, max_retries: u32) -> genai_core::Job {
    run_with(mode, max_retries, FlakyImageGenerator::new(2)).await
}

async fn run_with(
    mode: QueueMode,
    max_retries: u32,
    processor: Arc<dyn JobProcessor>,
) -> genai_core::Job {
    let runner = match mode {
        QueueMode::InProcess => {
            JobRunner::in_process(processor, &config(max_retries), ResilienceExecutor::new())
        }
        QueueMode::Durable => JobRunner::durable(
            Arc::new(MemoryQueueBackend::default()),
            Some(processor),
            &config(max_retries),
            ResilienceExecutor::new(),
        ),
    };
    assert_eq!(runner.mode(), mode);

    let handle = tokio_test::assert_ok!(runner.submit(unit()).await);
    assert_eq!(handle.kind, "recipe_image");
    assert!(!handle.status.is_terminal());

    runner.wait(&handle.id, Duration::from_secs(5)).await.unwrap()
}

#[tokio::test]
async fn test_in_process_job_recovers_within_budget() {
    let job = run_in_mode(QueueMode::InProcess, 3).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 3);
    assert_eq!(job.progress, 100);
    assert!(job.error.is_none());
    assert_eq!(job.result.as_ref().unwrap()["recipe"], "Daiquiri");
    assert!(job.completed_at.unwrap() >= job.started_at.unwrap());
}

#[tokio::test]
async fn test_in_process_job_fails_when_budget_is_spent() {
    let job = run_in_mode(QueueMode::InProcess, 1).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.error_class, Some(ErrorClass::ServerUnavailable));
    assert!(job.error.as_deref().unwrap().contains("call 2"));
    assert!(job.result.is_none());
}

#[tokio::test]
async fn test_durable_job_recovers_within_budget() {
    let job = run_in_mode(QueueMode::Durable, 3).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 3);
    assert!(job.result.unwrap()["image_url"]
        .as_str()
        .unwrap()
        .ends_with(".png"));
}

#[tokio::test]
async fn test_durable_job_fails_when_budget_is_spent() {
    let job = run_in_mode(QueueMode::Durable, 1).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 2);
    assert!(job.error.as_deref().unwrap().contains("call 2"));
}

#[tokio::test]
async fn test_durable_backend_without_workers_keeps_jobs_pending() {
    let backend = Arc::new(MemoryQueueBackend::default());
    let runner = JobRunner::durable(backend, None, &config(1), ResilienceExecutor::new());

    let handle = runner.submit(unit()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let job = runner.status(&handle.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(runner.stats().await.unwrap().pending, 1);
}

#[tokio::test]
async fn test_stats_count_terminal_jobs() {
    let runner = JobRunner::in_process(
        FlakyImageGenerator::new(0),
        &config(0),
        ResilienceExecutor::new(),
    );
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(runner.submit(unit()).await.unwrap().id);
    }
    for id in &ids {
        runner.wait(id, Duration::from_secs(5)).await.unwrap();
    }
    let stats = runner.stats().await.unwrap();
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.total(), 3);
}

#[tokio::test]
async fn test_unknown_job_id() {
    let runner = JobRunner::in_process(
        FlakyImageGenerator::new(0),
        &config(0),
        ResilienceExecutor::new(),
    );
    let id = genai_core::JobId::new();
    assert!(runner.status(&id).await.unwrap().is_none());
    tokio_test::assert_err!(runner.wait(&id, Duration::from_millis(10)).await);
}

#[tokio::test]
async fn test_generic_processor_failures_are_retried_in_both_modes() {
    for mode in [QueueMode::InProcess, QueueMode::Durable] {
        let processor = FlakyImageGenerator::failing_with(2, storage_failure);
        let job = run_with(mode, 3, processor.clone()).await;
        assert_eq!(job.status, JobStatus::Completed, "{:?}", mode);
        assert_eq!(job.attempts, 3);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 3);
    }
}

#[tokio::test]
async fn test_generic_failure_exhausts_budget_with_second_error() {
    for mode in [QueueMode::InProcess, QueueMode::Durable] {
        let job = run_with(mode, 1, FlakyImageGenerator::failing_with(2, storage_failure)).await;
        assert_eq!(job.status, JobStatus::Failed, "{:?}", mode);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.error_class, Some(ErrorClass::Fatal));
        assert!(job.error.as_deref().unwrap().contains("call 2"));
    }
}

#[tokio::test]
async fn test_io_failure_is_retried_and_keeps_its_class() {
    let job = run_with(
        QueueMode::InProcess,
        1,
        FlakyImageGenerator::failing_with(5, store_refused),
    )
    .await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.error_class, Some(ErrorClass::Fatal));
    assert!(job.error.as_deref().unwrap().contains("call 2"));
}

#[tokio::test]
async fn test_zero_budget_fails_after_one_attempt() {
    for mode in [QueueMode::InProcess, QueueMode::Durable] {
        let processor = FlakyImageGenerator::failing_with(u32::MAX, storage_failure);
        let job = run_with(mode, 0, processor.clone()).await;
        assert_eq!(job.status, JobStatus::Failed, "{:?}", mode);
        assert_eq!(job.attempts, 1);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
        assert!(job.error.as_deref().unwrap().contains("call 1"));
    }
}
