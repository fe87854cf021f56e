//! Result caching: avoids paying twice for the same upstream AI call.
//!
//! # Result Cache Module
//!
//! Time-bounded, size-bounded storage for generated artifacts, with hit/miss
//! accounting and a periodic expiry sweep.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheManager`] | Typed get/set/has/delete with TTL and statistics |
//! | [`CacheConfig`] | Per-instance TTL, capacity and size limits |
//! | [`CacheRegistry`] | Named, independently configured instances |
//! | [`CacheBackend`] | Trait for storage backends (extension point for a shared cache) |
//! | [`MemoryCache`] | In-memory backend with creation-order eviction |
//! | [`FingerprintKeyBuilder`] | Stable keys from request parameters or raw bytes |
//!
//! ## Example
//!
//! ```rust
//! use genai_core::cache::{CacheConfig, CacheManager, FingerprintKeyBuilder};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn demo() -> genai_core::Result<()> {
//! let cache = CacheManager::in_memory(
//!     CacheConfig::new("recipes")
//!         .with_ttl(Duration::from_secs(3600))
//!         .with_max_entries(1000),
//! );
//! let key = FingerprintKeyBuilder::new()
//!     .with_namespace("recipe")
//!     .build_key_from_json(&json!({"ingredients": ["lime", "rum"], "servings": 2}));
//!
//! cache.set(&key, &json!({"name": "Daiquiri"})).await?;
//! let hit: Option<serde_json::Value> = cache.get(&key).await?;
//! assert!(hit.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! ## Eviction and Expiry
//!
//! - At capacity, a new key evicts the entry that was **created** first; reads
//!   do not refresh entries.
//! - Expired entries are invisible to `get`, removed lazily on access, and
//!   reclaimed by the sweeper even if never queried again.
//! - Concurrent writers of the same key race; the last write wins.

mod backend;
mod key;
mod manager;
mod registry;

pub use backend::{CacheBackend, MemoryCache, SetOutcome};
pub use key::{CacheKey, FingerprintKeyBuilder};
pub use manager::{CacheConfig, CacheManager, CacheStats};
pub use registry::CacheRegistry;
