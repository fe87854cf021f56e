//! Cache backend implementations.

use super::key::CacheKey;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Clone)]
struct CacheEntry {
    data: Vec<u8>,
    created_at: Instant,
    expires_at: Instant,
    /// Insertion sequence; breaks ties between entries created at the same instant.
    seq: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of a backend write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SetOutcome {
    /// Key displaced to make room, if the store was at capacity.
    pub evicted: Option<String>,
}

/// Storage for serialized artifacts.
///
/// [`MemoryCache`] is the in-process implementation; a shared external cache
/// plugs in by implementing this trait.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns `None` for absent and for expired entries. Expired entries are removed.
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<SetOutcome>;
    async fn delete(&self, key: &CacheKey) -> Result<bool>;
    async fn exists(&self, key: &CacheKey) -> Result<bool>;
    async fn clear(&self) -> Result<()>;
    /// Number of stored entries, expired-but-unswept ones included.
    async fn len(&self) -> Result<usize>;
    /// Remove every expired entry and return how many were dropped.
    async fn purge_expired(&self) -> Result<usize>;
    fn max_entries(&self) -> Option<usize>;
    fn name(&self) -> &'static str;
}

/// In-memory store bounded by entry count.
///
/// At capacity, inserting a new key evicts the entry created first. Access does
/// not refresh an entry's position.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    max_entries: usize,
    next_seq: AtomicU64,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            next_seq: AtomicU64::new(0),
        }
    }

    fn evict_oldest(&self, entries: &mut HashMap<String, CacheEntry>) -> Option<String> {
        let oldest = entries
            .iter()
            .min_by_key(|(_, e)| (e.created_at, e.seq))
            .map(|(k, _)| k.clone())?;
        entries.remove(&oldest);
        Some(oldest)
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key.as_str()) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.data.clone())),
                Some(_) => {}
            }
        }
        // Expired: re-check under the write lock, a concurrent set may have replaced it.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key.as_str()) {
            if entry.is_expired(now) {
                entries.remove(key.as_str());
            } else {
                return Ok(Some(entry.data.clone()));
            }
        }
        Ok(None)
    }

    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<SetOutcome> {
        let created_at = Instant::now();
        let entry = CacheEntry {
            data: value.to_vec(),
            created_at,
            expires_at: created_at + ttl,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        let mut entries = self.entries.write().await;
        let mut outcome = SetOutcome::default();
        if !entries.contains_key(key.as_str()) && entries.len() >= self.max_entries {
            outcome.evicted = self.evict_oldest(&mut entries);
        }
        entries.insert(key.as_str().to_string(), entry);
        Ok(outcome)
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.entries.write().await.remove(key.as_str()).is_some())
    }

    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key.as_str())
            .map(|e| !e.is_expired(now))
            .unwrap_or(false))
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok(before - entries.len())
    }

    fn max_entries(&self) -> Option<usize> {
        Some(self.max_entries)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
