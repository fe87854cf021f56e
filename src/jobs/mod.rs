//! Background jobs: deferred work with status, progress and bounded history.
//!
//! # Job Runner Module
//!
//! Secondary work (image generation, analysis) must never hold up the primary
//! response. Callers submit a [`WorkUnit`], get a [`JobHandle`] back at once,
//! and poll [`JobRunner::status`] for progress and outcome.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`JobRunner`] | Facade; queue strategy chosen at construction |
//! | [`JobQueue`] | Interface shared by both strategies |
//! | [`InProcessQueue`] | Fallback: spawned tasks, in-memory [`JobStore`] |
//! | [`DurableQueue`] | Enqueues into a [`QueueBackend`]; [`JobWorker`]s execute |
//! | [`MemoryQueueBackend`] | Local backend with worker semantics |
//! | [`JobProcessor`] | One attempt of a work unit; [`ProcessorRegistry`] routes by kind |
//! | [`JobConfig`] | Retry budget, deadlines, history window, workers |
//!
//! ## Lifecycle
//!
//! ```text
//! Pending ──► Running ──► Completed
//!                │  ▲
//!                │  └── failure, budget left
//!                └────► Failed (budget spent, or a final failure)
//! ```
//!
//! Each attempt runs through the [`ResilienceExecutor`](crate::resilience::ResilienceExecutor)
//! with the backoff and budget of the job [`RetryPolicy`](crate::resilience::RetryPolicy).
//! Unlike upstream calls, any processor failure is retried except a
//! `ParseFailure`, a cancellation or a configuration error.
//! Terminal jobs stay queryable for `history_limit` entries and `history_ttl`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use genai_core::jobs::{JobConfig, JobContext, JobProcessor, JobRunner, WorkUnit};
//! use genai_core::resilience::ResilienceExecutor;
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Thumbnail;
//!
//! #[async_trait]
//! impl JobProcessor for Thumbnail {
//!     async fn process(&self, ctx: &JobContext, unit: &WorkUnit) -> genai_core::Result<Value> {
//!         ctx.set_progress(50).await?;
//!         Ok(json!({"prompt": unit.payload["prompt"]}))
//!     }
//! }
//!
//! # async fn demo() -> genai_core::Result<()> {
//! let runner = JobRunner::in_process(Arc::new(Thumbnail), &JobConfig::default(), ResilienceExecutor::new());
//! let handle = runner.submit(WorkUnit::new("image", json!({"prompt": "daiquiri"}))).await?;
//! let job = runner.wait(&handle.id, Duration::from_secs(60)).await?;
//! println!("{:?}: {:?}", job.status, job.result);
//! # Ok(())
//! # }
//! ```

mod processor;
mod queue;
mod runner;
mod store;
mod types;

pub use processor::{JobContext, JobProcessor, ProcessorRegistry};
pub use queue::{DurableQueue, InProcessQueue, JobQueue, JobWorker, MemoryQueueBackend, QueueBackend};
pub use runner::{JobConfig, JobRunner};
pub use store::{HistoryPolicy, JobLedger, JobStore};
pub use types::{Job, JobHandle, JobId, JobStatus, QueueMode, QueueStats, WorkUnit};
