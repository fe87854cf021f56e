//! Job records and the values handed to callers.

use crate::resilience::ErrorClass;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub(crate) fn timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s).map(Self).map_err(|e| {
            Error::validation_with_context(
                format!("invalid job id '{}'", s),
                ErrorContext::new()
                    .with_field_path("job_id")
                    .with_details(e.to_string()),
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A deferred piece of work, routed to a processor by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub kind: String,
    pub payload: Value,
}

impl WorkUnit {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Bookkeeping for one submitted work unit. Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: String,
    pub payload: Value,
    pub status: JobStatus,
    /// 0..=100
    pub progress: u8,
    pub attempts: u32,
    pub created_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Job {
    pub fn new(unit: WorkUnit) -> Self {
        Self {
            id: JobId::new(),
            kind: unit.kind,
            payload: unit.payload,
            status: JobStatus::Pending,
            progress: 0,
            attempts: 0,
            created_at: timestamp(),
            started_at: None,
            completed_at: None,
            error: None,
            error_class: None,
            result: None,
        }
    }

    pub fn work_unit(&self) -> WorkUnit {
        WorkUnit::new(self.kind.clone(), self.payload.clone())
    }

    pub fn handle(&self) -> JobHandle {
        JobHandle {
            id: self.id,
            kind: self.kind.clone(),
            status: self.status,
        }
    }

    pub(crate) fn begin_attempt(&mut self, attempt: u32) {
        self.status = JobStatus::Running;
        self.attempts = attempt;
        if self.started_at.is_none() {
            self.started_at = Some(timestamp());
        }
    }

    pub(crate) fn record_failure(&mut self, class: ErrorClass, message: String) {
        self.error = Some(message);
        self.error_class = Some(class);
    }

    pub(crate) fn complete(&mut self, result: Value) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.error = None;
        self.error_class = None;
        self.completed_at = Some(timestamp());
    }

    pub(crate) fn fail(&mut self, class: ErrorClass, message: String) {
        self.status = JobStatus::Failed;
        self.record_failure(class, message);
        self.completed_at = Some(timestamp());
    }
}

/// Returned by `submit`; use the id to query status later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: JobId,
    pub kind: String,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    /// Jobs live in an external backend and are run by workers.
    Durable,
    /// Jobs run as tasks of this process and are lost on restart.
    InProcess,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub submitted: u64,
    pub purged: u64,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed
    }
}
