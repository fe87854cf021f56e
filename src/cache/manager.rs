//! Cache manager.

use super::backend::CacheBackend;
use super::key::CacheKey;
use crate::{Error, ErrorContext, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub name: String,
    pub default_ttl: Duration,
    pub enabled: bool,
    pub max_entries: usize,
    pub max_entry_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            default_ttl: Duration::from_secs(3600),
            enabled: true,
            max_entries: 1000,
            max_entry_size: 10 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
    pub fn with_max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }
    pub fn with_max_entry_size(mut self, bytes: usize) -> Self {
        self.max_entry_size = bytes;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Entries displaced by capacity pressure.
    pub evictions: u64,
    /// Entries removed by the periodic sweep.
    pub expirations: u64,
    pub errors: u64,
    pub hit_rate: f64,
    pub size: usize,
    pub max_size: Option<usize>,
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    errors: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self, size: usize, max_size: Option<usize>) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            size,
            max_size,
        }
    }
}

/// Typed front of a [`CacheBackend`]: serializes artifacts and keeps hit/miss accounting.
pub struct CacheManager {
    config: CacheConfig,
    backend: Arc<dyn CacheBackend>,
    stats: AtomicStats,
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("name", &self.config.name)
            .field("enabled", &self.config.enabled)
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl CacheManager {
    pub fn new(config: CacheConfig, backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            config,
            backend,
            stats: AtomicStats::default(),
        }
    }

    /// A manager over a fresh [`MemoryCache`](super::MemoryCache) sized from `config`.
    pub fn in_memory(config: CacheConfig) -> Self {
        let backend = Arc::new(super::MemoryCache::new(config.max_entries));
        Self::new(config, backend)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        if !self.config.enabled {
            return Ok(None);
        }
        match self.backend.get(key).await {
            Ok(Some(data)) => match serde_json::from_slice(&data) {
                Ok(val) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    Ok(Some(val))
                }
                Err(e) => {
                    // Stored under a different type; treat as a miss.
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    warn!(cache = %self.config.name, key = %key, error = %e, "undecodable cache entry");
                    Ok(None)
                }
            },
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => {
                // The caller falls back to the producer, so this is a miss too.
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<()> {
        self.set_with_ttl(key, value, self.config.default_ttl).await
    }

    pub async fn set_with_ttl<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        if ttl.is_zero() {
            return Err(Error::validation_with_context(
                "cache ttl must be greater than zero",
                ErrorContext::new()
                    .with_field_path("ttl")
                    .with_source("cache_manager"),
            ));
        }
        if !self.config.enabled {
            return Ok(());
        }
        let data = serde_json::to_vec(value)?;
        if data.len() > self.config.max_entry_size {
            debug!(cache = %self.config.name, size = data.len(), "entry exceeds max_entry_size, not cached");
            return Ok(());
        }
        match self.backend.set(key, &data, ttl).await {
            Ok(outcome) => {
                self.stats.sets.fetch_add(1, Ordering::Relaxed);
                if let Some(evicted) = outcome.evicted {
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(cache = %self.config.name, evicted = %evicted, "capacity eviction");
                }
                Ok(())
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub async fn has(&self, key: &CacheKey) -> Result<bool> {
        if !self.config.enabled {
            return Ok(false);
        }
        self.backend.exists(key).await
    }

    pub async fn delete(&self, key: &CacheKey) -> Result<bool> {
        if !self.config.enabled {
            return Ok(false);
        }
        match self.backend.delete(key).await {
            Ok(d) => {
                if d {
                    self.stats.deletes.fetch_add(1, Ordering::Relaxed);
                }
                Ok(d)
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await
    }

    /// Drop expired entries now. The periodic sweeper calls this.
    pub async fn sweep(&self) -> Result<usize> {
        let removed = self.backend.purge_expired().await?;
        if removed > 0 {
            self.stats
                .expirations
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(cache = %self.config.name, removed, "expired entries swept");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> CacheStats {
        let size = self.backend.len().await.unwrap_or(0);
        self.stats.to_stats(size, self.backend.max_entries())
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Run [`sweep`](Self::sweep) every `every` until the manager is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = manager.sweep().await {
                    warn!(cache = %manager.config.name, error = %e, "cache sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager(max: usize) -> CacheManager {
        CacheManager::in_memory(
            CacheConfig::new("recipes")
                .with_max_entries(max)
                .with_ttl(Duration::from_secs(60)),
        )
    }

    #[tokio::test]
    async fn test_hit_rate_accounting() {
        let m = manager(10);
        assert_eq!(m.stats().await.hit_rate, 0.0);

        let key = CacheKey::new("k");
        assert!(m.get::<serde_json::Value>(&key).await.unwrap().is_none());
        m.set(&key, &json!({"name": "Mojito"})).await.unwrap();
        let got: serde_json::Value = m.get(&key).await.unwrap().unwrap();
        assert_eq!(got["name"], "Mojito");

        let stats = m.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.hit_rate, 0.5);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.max_size, Some(10));
    }

    #[tokio::test]
    async fn test_zero_ttl_is_rejected() {
        let m = manager(10);
        let err = m
            .set_with_ttl(&CacheKey::new("k"), &1u32, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn test_eviction_is_counted() {
        let m = manager(2);
        for i in 0..5u32 {
            m.set(&CacheKey::new(format!("k{}", i)), &i).await.unwrap();
        }
        let stats = m.stats().await;
        assert_eq!(stats.size, 2);
        assert_eq!(stats.evictions, 3);
    }

    #[tokio::test]
    async fn test_disabled_cache_is_pass_through() {
        let m = CacheManager::in_memory(CacheConfig::new("off").with_enabled(false));
        let key = CacheKey::new("k");
        m.set(&key, &"value").await.unwrap();
        assert!(m.get::<String>(&key).await.unwrap().is_none());
        assert!(!m.has(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_oversized_entries_are_skipped() {
        let m = CacheManager::in_memory(CacheConfig::new("small").with_max_entry_size(8));
        let key = CacheKey::new("k");
        m.set(&key, &"this string is far too long").await.unwrap();
        assert!(!m.has(&key).await.unwrap());
        assert_eq!(m.stats().await.sets, 0);
    }

    #[test]
    fn test_debug_names_cache_and_backend() {
        let shown = format!("{:?}", manager(4));
        assert!(shown.contains("\"recipes\""), "{}", shown);
        assert!(shown.contains("memory"), "{}", shown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_reclaims_unqueried_keys() {
        let m = Arc::new(manager(10));
        let handle = m.spawn_sweeper(Duration::from_secs(5));
        m.set_with_ttl(&CacheKey::new("a"), &1u8, Duration::from_secs(1))
            .await
            .unwrap();
        m.set_with_ttl(&CacheKey::new("b"), &2u8, Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        let stats = m.stats().await;
        assert_eq!(stats.size, 1);
        assert_eq!(stats.expirations, 1);

        drop(m);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(handle.is_finished());
    }
}
