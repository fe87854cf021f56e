//! Core configuration.
//!
//! Loaded from YAML, then adjusted by `GENAI_*` environment variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `GENAI_ATTEMPT_TIMEOUT_MS` | `retry.attempt_timeout_ms` |
//! | `GENAI_MAX_RETRIES` | `retry.max_retries` |
//! | `GENAI_STREAM_DEADLINE_MS` | `streaming.deadline_ms` |
//! | `GENAI_JOB_MAX_RETRIES` | `jobs.max_retries` |
//! | `GENAI_CACHE_SWEEP_SECS` | `cache_sweep_interval_ms` (given in seconds) |
//!
//! All durations in YAML are milliseconds.
//!
//! ```yaml
//! retry:
//!   max_retries: 2
//!   attempt_timeout_ms: 30000
//! streaming:
//!   deadline_ms: 60000
//! caches:
//!   - name: recipes
//!     ttl_ms: 3600000
//!     max_entries: 500
//! jobs:
//!   max_retries: 3
//!   workers: 2
//! ```

use crate::cache::CacheConfig;
use crate::jobs::JobConfig;
use crate::resilience::RetryPolicy;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Serde adapter for `Duration` as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(rename = "attempt_timeout_ms", with = "duration_ms")]
    pub attempt_timeout: Duration,
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    #[serde(rename = "max_jitter_ms", with = "duration_ms")]
    pub max_jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            attempt_timeout: policy.deadline,
            base_delay: policy.base_delay,
            max_delay: policy.max_delay,
            max_jitter: policy.max_jitter,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self, operation: impl Into<String>) -> RetryPolicy {
        RetryPolicy::new(operation)
            .with_max_retries(self.max_retries)
            .with_deadline(self.attempt_timeout)
            .with_base_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_max_jitter(self.max_jitter)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Bound on a whole streaming run, open included.
    #[serde(rename = "deadline_ms", with = "duration_ms")]
    pub deadline: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(90),
        }
    }
}

/// One named cache instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub name: String,
    #[serde(rename = "ttl_ms", with = "duration_ms")]
    pub ttl: Duration,
    pub max_entries: usize,
    #[serde(default = "default_max_entry_size")]
    pub max_entry_size: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_max_entry_size() -> usize {
    CacheConfig::default().max_entry_size
}

fn default_enabled() -> bool {
    true
}

impl CacheSettings {
    pub fn new(name: impl Into<String>, ttl: Duration, max_entries: usize) -> Self {
        Self {
            name: name.into(),
            ttl,
            max_entries,
            max_entry_size: default_max_entry_size(),
            enabled: true,
        }
    }

    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig::new(self.name.clone())
            .with_ttl(self.ttl)
            .with_max_entries(self.max_entries)
            .with_max_entry_size(self.max_entry_size)
            .with_enabled(self.enabled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub retry: RetryConfig,
    pub streaming: StreamingConfig,
    pub caches: Vec<CacheSettings>,
    #[serde(rename = "cache_sweep_interval_ms", with = "duration_ms")]
    pub cache_sweep_interval: Duration,
    pub jobs: JobConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            streaming: StreamingConfig::default(),
            caches: vec![
                CacheSettings::new("recipes", Duration::from_secs(3600), 500),
                CacheSettings::new("image_analysis", Duration::from_secs(24 * 3600), 200),
            ],
            cache_sweep_interval: Duration::from_secs(60),
            jobs: JobConfig::default(),
        }
    }
}

impl CoreConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content).map_err(|e| {
            Error::configuration_with_context(
                "cannot parse configuration file",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source(path.as_ref().display().to_string()),
            )
        })
    }

    /// Load, apply environment overrides, validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Unparseable values are
    /// ignored with a warning.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.trim().parse::<u64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(key, value = %raw, "ignoring non-numeric override");
                    None
                }
            }
        };

        if let Some(ms) = read("GENAI_ATTEMPT_TIMEOUT_MS") {
            self.retry.attempt_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = read("GENAI_MAX_RETRIES") {
            self.retry.max_retries = n.min(u32::MAX as u64) as u32;
        }
        if let Some(ms) = read("GENAI_STREAM_DEADLINE_MS") {
            self.streaming.deadline = Duration::from_millis(ms);
        }
        if let Some(n) = read("GENAI_JOB_MAX_RETRIES") {
            self.jobs.max_retries = n.min(u32::MAX as u64) as u32;
        }
        if let Some(secs) = read("GENAI_CACHE_SWEEP_SECS") {
            self.cache_sweep_interval = Duration::from_secs(secs);
        }
    }

    pub fn validate(&self) -> Result<()> {
        fn invalid(field: &str, message: &str) -> Error {
            Error::configuration_with_context(
                message.to_string(),
                ErrorContext::new()
                    .with_field_path(field)
                    .with_source("core_config"),
            )
        }

        if self.retry.attempt_timeout.is_zero() {
            return Err(invalid("retry.attempt_timeout_ms", "attempt timeout must be positive"));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(invalid("retry.max_delay_ms", "max delay is below base delay"));
        }
        if self.streaming.deadline.is_zero() {
            return Err(invalid("streaming.deadline_ms", "stream deadline must be positive"));
        }
        if self.cache_sweep_interval.is_zero() {
            return Err(invalid("cache_sweep_interval_ms", "sweep interval must be positive"));
        }

        let mut names = HashSet::new();
        for (i, cache) in self.caches.iter().enumerate() {
            let field = |f: &str| format!("caches[{}].{}", i, f);
            if cache.name.trim().is_empty() {
                return Err(invalid(&field("name"), "cache name must not be empty"));
            }
            if !names.insert(cache.name.as_str()) {
                return Err(invalid(
                    &field("name"),
                    &format!("duplicate cache name '{}'", cache.name),
                ));
            }
            if cache.ttl.is_zero() {
                return Err(invalid(&field("ttl_ms"), "cache ttl must be positive"));
            }
            if cache.max_entries == 0 {
                return Err(invalid(&field("max_entries"), "cache capacity must be positive"));
            }
            if cache.max_entry_size == 0 {
                return Err(invalid(&field("max_entry_size"), "max entry size must be positive"));
            }
        }

        if self.jobs.attempt_deadline.is_zero() {
            return Err(invalid("jobs.attempt_deadline_ms", "job attempt deadline must be positive"));
        }
        if self.jobs.history_limit == 0 {
            return Err(invalid("jobs.history_limit", "job history limit must be positive"));
        }
        if self.jobs.history_ttl.is_zero() {
            return Err(invalid("jobs.history_ttl_ms", "job history ttl must be positive"));
        }
        Ok(())
    }
}
