//! # genai-core
//!
//! Resilience, caching, incremental delivery and background jobs for services
//! that sit in front of a generative-AI model.
//!
//! ## Overview
//!
//! Upstream model calls are slow, occasionally fail transiently, and cost money.
//! This crate wraps them so that request handlers get:
//!
//! - **Bounded, classified retries**: every attempt has a deadline; only
//!   transient failure classes are retried, with capped exponential backoff.
//! - **Result caching**: identical requests are served from named, TTL-bound,
//!   capacity-bound caches keyed by a canonical request fingerprint.
//! - **Incremental delivery**: fields of a streamed JSON answer reach the client
//!   as soon as they are complete, followed by one authoritative result.
//! - **Background jobs**: secondary work runs through a durable queue backend or
//!   an in-process fallback, with status and progress queries.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use genai_core::cache::FingerprintKeyBuilder;
//! use genai_core::AiCore;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> genai_core::Result<()> {
//!     genai_core::logging::init_tracing("info");
//!     let core = AiCore::builder().build()?;
//!
//!     let params = json!({"ingredients": ["rum", "lime", "sugar"], "style": "classic"});
//!     let key = FingerprintKeyBuilder::new()
//!         .with_namespace("recipe")
//!         .build_key_from_json(&params);
//!
//!     let resolved = core
//!         .resolve_with_cache("recipes", &key, None, || async {
//!             // exactly one upstream call per invocation
//!             Ok(json!({"name": "Daiquiri"}))
//!         })
//!         .await?;
//!     println!("{} (cached: {})", resolved.artifact["name"], resolved.from_cache);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`resilience`] | Error classes, retry policy, deadline + retry executor |
//! | [`cache`] | Fingerprint keys, cache backends, named cache registry |
//! | [`pipeline`] | Partial field extraction and event delivery for streams |
//! | [`jobs`] | Background job queue, workers and history |
//! | [`facade`] | [`AiCore`] wiring the above together |
//! | [`config`] | YAML configuration with `GENAI_*` overrides |
//! | [`logging`] | `tracing` subscriber setup |

pub mod cache;
pub mod config;
pub mod facade;
pub mod jobs;
pub mod logging;
pub mod pipeline;
pub mod resilience;

pub use cache::{CacheKey, CacheStats, FingerprintKeyBuilder};
pub use config::CoreConfig;
pub use facade::{AiCore, AiCoreBuilder, JobFollowUp, Resolved};
pub use jobs::{Job, JobHandle, JobId, JobStatus, WorkUnit};
pub use pipeline::{DeliveryEvent, EventSink, FieldKind, FieldSet};
pub use resilience::{ErrorClass, ResilienceExecutor, RetryPolicy};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A pinned, boxed stream of fallible items.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
