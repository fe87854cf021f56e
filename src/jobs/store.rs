//! In-memory job table with bounded history.

use super::types::{timestamp, Job, JobId, JobStatus, QueueStats};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Read/write access to job records, whichever side keeps them.
#[async_trait]
pub trait JobLedger: Send + Sync {
    async fn load(&self, id: &JobId) -> Result<Option<Job>>;
    async fn save(&self, job: Job) -> Result<()>;
}

/// Load, mutate and save one job. Returns the updated record, or `None` if the
/// id is unknown (e.g. already purged).
pub(crate) async fn update_job<F>(ledger: &dyn JobLedger, id: &JobId, f: F) -> Result<Option<Job>>
where
    F: FnOnce(&mut Job) + Send,
{
    let Some(mut job) = ledger.load(id).await? else {
        return Ok(None);
    };
    f(&mut job);
    ledger.save(job.clone()).await?;
    Ok(Some(job))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryPolicy {
    /// Terminal jobs kept at most.
    pub limit: usize,
    /// Terminal jobs older than this (since completion) are dropped.
    pub ttl: Duration,
}

impl Default for HistoryPolicy {
    fn default() -> Self {
        Self {
            limit: 1000,
            ttl: Duration::from_secs(24 * 3600),
        }
    }
}

/// Job table used by the in-process queue and by [`MemoryQueueBackend`](super::MemoryQueueBackend).
///
/// Only terminal jobs are ever purged.
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    history: HistoryPolicy,
    submitted: AtomicU64,
    purged: AtomicU64,
}

impl JobStore {
    pub fn new(history: HistoryPolicy) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            history,
            submitted: AtomicU64::new(0),
            purged: AtomicU64::new(0),
        }
    }

    pub fn history(&self) -> HistoryPolicy {
        self.history
    }

    /// Add a newly submitted job.
    pub async fn insert(&self, job: Job) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.jobs.write().await.insert(job.id, job);
    }

    pub async fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn stats(&self) -> QueueStats {
        let jobs = self.jobs.read().await;
        let mut stats = QueueStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
            ..QueueStats::default()
        };
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub async fn purge_history(&self) -> usize {
        self.purge_history_at(timestamp()).await
    }

    /// Purge relative to `now` (unix seconds): first by age, then by count,
    /// oldest completion first.
    pub(crate) async fn purge_history_at(&self, now: f64) -> usize {
        let ttl = self.history.ttl.as_secs_f64();
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();

        jobs.retain(|_, job| match (job.status.is_terminal(), job.completed_at) {
            (true, Some(done)) => now - done < ttl,
            _ => true,
        });

        let mut terminal: Vec<(f64, JobId)> = jobs
            .values()
            .filter(|j| j.status.is_terminal())
            .map(|j| (j.completed_at.unwrap_or(j.created_at), j.id))
            .collect();
        if terminal.len() > self.history.limit {
            terminal.sort_by(|a, b| a.0.total_cmp(&b.0));
            let excess = terminal.len() - self.history.limit;
            for (_, id) in terminal.into_iter().take(excess) {
                jobs.remove(&id);
            }
        }

        let removed = before - jobs.len();
        if removed > 0 {
            self.purged.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, remaining = jobs.len(), "job history purged");
        }
        removed
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new(HistoryPolicy::default())
    }
}

#[async_trait]
impl JobLedger for JobStore {
    async fn load(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(self.get(id).await)
    }

    async fn save(&self, job: Job) -> Result<()> {
        self.jobs.write().await.insert(job.id, job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::WorkUnit;
    use serde_json::json;

    fn finished(at: f64) -> Job {
        let mut job = Job::new(WorkUnit::new("analysis", json!({})));
        job.complete(json!({}));
        job.completed_at = Some(at);
        job
    }

    #[tokio::test]
    async fn test_purge_by_age_keeps_active_jobs() {
        let store = JobStore::new(HistoryPolicy {
            limit: 100,
            ttl: Duration::from_secs(60),
        });
        let old = finished(1_000.0);
        let recent = finished(1_100.0);
        let pending = Job::new(WorkUnit::new("analysis", json!({})));
        let (old_id, recent_id, pending_id) = (old.id, recent.id, pending.id);
        for job in [old, recent, pending] {
            store.insert(job).await;
        }

        assert_eq!(store.purge_history_at(1_120.0).await, 1);
        assert!(store.get(&old_id).await.is_none());
        assert!(store.get(&recent_id).await.is_some());
        assert!(store.get(&pending_id).await.is_some());
        assert_eq!(store.stats().await.purged, 1);
    }

    #[tokio::test]
    async fn test_purge_by_count_drops_oldest_first() {
        let store = JobStore::new(HistoryPolicy {
            limit: 2,
            ttl: Duration::from_secs(3600),
        });
        let jobs: Vec<Job> = (0..4).map(|i| finished(1_000.0 + i as f64)).collect();
        let ids: Vec<JobId> = jobs.iter().map(|j| j.id).collect();
        for job in jobs {
            store.insert(job).await;
        }

        assert_eq!(store.purge_history_at(1_010.0).await, 2);
        assert!(store.get(&ids[0]).await.is_none());
        assert!(store.get(&ids[1]).await.is_none());
        assert!(store.get(&ids[3]).await.is_some());
        let stats = store.stats().await;
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.submitted, 4);
    }

    #[tokio::test]
    async fn test_update_job_through_ledger() {
        let store = JobStore::default();
        let job = Job::new(WorkUnit::new("analysis", json!({})));
        let id = job.id;
        store.insert(job).await;

        let updated = update_job(&store, &id, |j| j.progress = 40).await.unwrap();
        assert_eq!(updated.map(|j| j.progress), Some(40));
        assert!(update_job(&store, &JobId::new(), |j| j.progress = 1)
            .await
            .unwrap()
            .is_none());
    }
}
