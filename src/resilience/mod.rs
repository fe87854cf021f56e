//! Resilience executor: bounds and retries a single upstream call.
//!
//! # Resilience Module
//!
//! Upstream AI calls are slow, flaky and rate limited. This module turns one
//! caller-supplied attempt into a bounded, retried operation.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ResilienceExecutor`] | Races each attempt against a deadline and retries transient failures |
//! | [`RetryPolicy`] | Deadline, retry budget and exponential backoff with jitter |
//! | [`ResiliencePolicy`] | Trait seam for custom retry decisions |
//! | [`ErrorClass`] | Classification that drives retry eligibility |
//!
//! ## Example
//!
//! ```rust
//! use genai_core::resilience::{ResilienceExecutor, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn demo() -> genai_core::Result<()> {
//! let executor = ResilienceExecutor::new();
//! let policy = RetryPolicy::new("recipe.generate")
//!     .with_deadline(Duration::from_secs(20))
//!     .with_max_retries(2);
//!
//! let text: String = executor
//!     .execute(&policy, || async { Ok("{\"name\":\"Daiquiri\"}".to_string()) })
//!     .await?;
//! # let _ = text;
//! # Ok(())
//! # }
//! ```

mod classify;
mod executor;
mod policy;

pub use classify::ErrorClass;
pub use executor::{ExecutorStats, ResilienceExecutor};
pub use policy::{Decision, ResiliencePolicy, RetryPolicy};
