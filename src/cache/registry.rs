//! Named cache instances.

use super::backend::CacheBackend;
use super::manager::{CacheConfig, CacheManager, CacheStats};
use crate::{Error, ErrorContext, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// One [`CacheManager`] per artifact class, so eviction pressure in one class
/// never displaces entries of another.
#[derive(Default)]
pub struct CacheRegistry {
    caches: BTreeMap<String, Arc<CacheManager>>,
    sweepers: Vec<JoinHandle<()>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-memory cache. Re-registering a name replaces the old instance.
    pub fn register(&mut self, config: CacheConfig) -> Arc<CacheManager> {
        let manager = Arc::new(CacheManager::in_memory(config));
        self.caches
            .insert(manager.name().to_string(), Arc::clone(&manager));
        manager
    }

    /// Register a cache over a caller-supplied backend (e.g. a shared external store).
    pub fn register_with_backend(
        &mut self,
        config: CacheConfig,
        backend: Arc<dyn CacheBackend>,
    ) -> Arc<CacheManager> {
        let manager = Arc::new(CacheManager::new(config, backend));
        self.caches
            .insert(manager.name().to_string(), Arc::clone(&manager));
        manager
    }

    pub fn get(&self, name: &str) -> Result<Arc<CacheManager>> {
        self.caches.get(name).cloned().ok_or_else(|| {
            Error::configuration_with_context(
                format!("unknown cache '{}'", name),
                ErrorContext::new()
                    .with_details(format!(
                        "registered: {}",
                        self.names().collect::<Vec<_>>().join(", ")
                    ))
                    .with_source("cache_registry"),
            )
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.caches.keys().map(|k| k.as_str())
    }

    pub async fn stats(&self, name: &str) -> Result<CacheStats> {
        Ok(self.get(name)?.stats().await)
    }

    pub async fn all_stats(&self) -> BTreeMap<String, CacheStats> {
        let mut out = BTreeMap::new();
        for (name, cache) in &self.caches {
            out.insert(name.clone(), cache.stats().await);
        }
        out
    }

    pub async fn clear(&self, name: &str) -> Result<()> {
        self.get(name)?.clear().await
    }

    /// Spawn one sweeper per registered cache. Must run inside a Tokio runtime.
    pub fn start_sweepers(&mut self, every: Duration) {
        self.stop_sweepers();
        for cache in self.caches.values() {
            self.sweepers.push(cache.spawn_sweeper(every));
        }
    }

    pub fn stop_sweepers(&mut self) {
        for handle in self.sweepers.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for CacheRegistry {
    fn drop(&mut self) {
        self.stop_sweepers();
    }
}
