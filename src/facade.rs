//! `AiCore`: the components wired together behind one entry point.

use crate::cache::{CacheBackend, CacheKey, CacheManager, CacheRegistry, CacheStats};
use crate::config::CoreConfig;
use crate::jobs::{Job, JobHandle, JobId, JobProcessor, JobRunner, QueueBackend, QueueStats, WorkUnit};
use crate::pipeline::{
    DeliveryPipeline, EventSink, FieldSet, FollowUp, FragmentStream, ResultValidator,
};
use crate::resilience::{ExecutorStats, ResilienceExecutor};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// An artifact and whether it was served from cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub artifact: T,
    pub from_cache: bool,
}

/// Hands a finished stream result to the job runner as a new work unit.
///
/// The payload is `{"request_id": ..., "result": ...}`.
pub struct JobFollowUp {
    runner: Arc<JobRunner>,
    kind: String,
}

impl JobFollowUp {
    pub fn new(runner: Arc<JobRunner>, kind: impl Into<String>) -> Self {
        Self {
            runner,
            kind: kind.into(),
        }
    }
}

#[async_trait]
impl FollowUp for JobFollowUp {
    async fn run(&self, request_id: String, result: Value) -> Result<()> {
        let handle = self
            .runner
            .submit(WorkUnit::new(
                self.kind.clone(),
                json!({"request_id": request_id, "result": result}),
            ))
            .await?;
        debug!(job_id = %handle.id, kind = %self.kind, "follow-up job submitted");
        Ok(())
    }
}

#[derive(Default)]
pub struct AiCoreBuilder {
    config: CoreConfig,
    executor: Option<ResilienceExecutor>,
    cache_backends: HashMap<String, Arc<dyn CacheBackend>>,
    processor: Option<Arc<dyn JobProcessor>>,
    queue_backend: Option<Arc<dyn QueueBackend>>,
    follow_up: Option<Arc<dyn FollowUp>>,
    follow_up_job_kind: Option<String>,
    result_schema: Option<Value>,
    start_sweepers: bool,
}

impl AiCoreBuilder {
    pub fn new() -> Self {
        Self {
            start_sweepers: true,
            ..Self::default()
        }
    }

    pub fn with_config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an executor (and its counters) with other components.
    pub fn with_executor(mut self, executor: ResilienceExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Store the named cache in `backend` instead of process memory.
    pub fn with_cache_backend(mut self, name: impl Into<String>, backend: Arc<dyn CacheBackend>) -> Self {
        self.cache_backends.insert(name.into(), backend);
        self
    }

    pub fn with_job_processor(mut self, processor: Arc<dyn JobProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Run jobs in durable mode over `backend`. Without it, jobs run in-process.
    pub fn with_queue_backend(mut self, backend: Arc<dyn QueueBackend>) -> Self {
        self.queue_backend = Some(backend);
        self
    }

    pub fn with_follow_up(mut self, follow_up: Arc<dyn FollowUp>) -> Self {
        self.follow_up = Some(follow_up);
        self
    }

    /// After each delivered stream, submit a background job of `kind`.
    pub fn with_follow_up_job(mut self, kind: impl Into<String>) -> Self {
        self.follow_up_job_kind = Some(kind.into());
        self
    }

    /// Validate every finalized stream result against this JSON Schema.
    pub fn with_result_schema(mut self, schema: Value) -> Self {
        self.result_schema = Some(schema);
        self
    }

    /// Whether to spawn cache sweep tasks on build (default true).
    pub fn with_sweepers(mut self, enabled: bool) -> Self {
        self.start_sweepers = enabled;
        self
    }

    pub fn build(mut self) -> Result<AiCore> {
        self.config.validate()?;
        let executor = self.executor.unwrap_or_default();

        let mut caches = CacheRegistry::new();
        for settings in &self.config.caches {
            let config = settings.to_cache_config();
            match self.cache_backends.remove(&settings.name) {
                Some(backend) => caches.register_with_backend(config, backend),
                None => caches.register(config),
            };
        }
        if let Some(orphan) = self.cache_backends.keys().next() {
            return Err(Error::configuration_with_context(
                format!("backend supplied for unconfigured cache '{}'", orphan),
                ErrorContext::new()
                    .with_field_path("caches")
                    .with_source("ai_core_builder"),
            ));
        }
        if self.start_sweepers {
            if tokio::runtime::Handle::try_current().is_ok() {
                caches.start_sweepers(self.config.cache_sweep_interval);
            } else {
                warn!("no Tokio runtime at build time, cache sweepers not started");
            }
        }

        let jobs = match (self.queue_backend, self.processor) {
            (Some(backend), processor) => Some(Arc::new(JobRunner::durable(
                backend,
                processor,
                &self.config.jobs,
                executor.clone(),
            ))),
            (None, Some(processor)) => Some(Arc::new(JobRunner::in_process(
                processor,
                &self.config.jobs,
                executor.clone(),
            ))),
            (None, None) => None,
        };

        let follow_up = match (self.follow_up, self.follow_up_job_kind) {
            (Some(f), _) => Some(f),
            (None, Some(kind)) => {
                let runner = jobs.clone().ok_or_else(|| {
                    Error::configuration_with_context(
                        "follow-up job requested but no job runner is configured",
                        ErrorContext::new().with_source("ai_core_builder"),
                    )
                })?;
                Some(Arc::new(JobFollowUp::new(runner, kind)) as Arc<dyn FollowUp>)
            }
            (None, None) => None,
        };

        let validator = self
            .result_schema
            .as_ref()
            .map(ResultValidator::new)
            .transpose()?
            .map(Arc::new);

        info!(
            caches = self.config.caches.len(),
            jobs = jobs.as_ref().map(|j| format!("{:?}", j.mode())).unwrap_or_else(|| "disabled".into()),
            "ai core ready"
        );

        Ok(AiCore {
            config: self.config,
            executor,
            caches,
            jobs,
            follow_up,
            validator,
        })
    }
}

/// Entry point for request handlers.
pub struct AiCore {
    config: CoreConfig,
    executor: ResilienceExecutor,
    caches: CacheRegistry,
    jobs: Option<Arc<JobRunner>>,
    follow_up: Option<Arc<dyn FollowUp>>,
    validator: Option<Arc<ResultValidator>>,
}

impl AiCore {
    pub fn builder() -> AiCoreBuilder {
        AiCoreBuilder::new()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn cache(&self, name: &str) -> Result<Arc<CacheManager>> {
        self.caches.get(name)
    }

    pub fn executor_stats(&self) -> ExecutorStats {
        self.executor.stats()
    }

    /// Return the cached artifact for `key`, or produce, cache and return it.
    ///
    /// `producer` performs one upstream attempt and is retried under the
    /// configured policy. The work runs in a detached task: if the caller goes
    /// away, it still finishes and populates the cache. `ttl` defaults to the
    /// cache's own. A cache store that cannot be read is treated as a miss.
    pub async fn resolve_with_cache<T, F, Fut>(
        &self,
        cache: &str,
        key: &CacheKey,
        ttl: Option<Duration>,
        producer: F,
    ) -> Result<Resolved<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let manager = self.caches.get(cache)?;
        if let Some(artifact) = lookup::<T>(&manager, key).await {
            debug!(cache, key = %key, "cache hit");
            return Ok(Resolved {
                artifact,
                from_cache: true,
            });
        }

        let executor = self.executor.clone();
        let policy = self.config.retry.policy(format!("resolve:{}", cache));
        let ttl = ttl.unwrap_or(manager.config().default_ttl);
        let key = key.clone();
        let task = tokio::spawn(async move {
            let artifact = executor.execute(&policy, producer).await?;
            if let Err(e) = manager.set_with_ttl(&key, &artifact, ttl).await {
                warn!(cache = %manager.name(), key = %key, error = %e, "could not cache artifact");
            }
            Ok::<T, Error>(artifact)
        });

        let artifact = task
            .await
            .map_err(|e| Error::runtime(format!("resolve task ended abnormally: {}", e)))??;
        Ok(Resolved {
            artifact,
            from_cache: false,
        })
    }

    /// A pipeline configured from this core: open policy, stream deadline,
    /// shared executor, result schema and follow-up.
    pub fn pipeline(&self, fields: Arc<FieldSet>) -> DeliveryPipeline {
        let mut pipeline = DeliveryPipeline::new(fields)
            .with_open_policy(self.config.retry.policy("stream_open"))
            .with_stream_deadline(self.config.streaming.deadline)
            .with_executor(self.executor.clone());
        if let Some(validator) = &self.validator {
            pipeline = pipeline.with_validator(Arc::clone(validator));
        }
        if let Some(follow_up) = &self.follow_up {
            pipeline = pipeline.with_follow_up(Arc::clone(follow_up));
        }
        pipeline
    }

    pub async fn stream_with_delivery<F, Fut>(
        &self,
        fields: Arc<FieldSet>,
        producer: F,
        sink: &dyn EventSink,
    ) -> Result<Value>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<FragmentStream>>,
    {
        self.pipeline(fields).run(producer, sink).await
    }

    /// Streaming with a cache in front: a hit is replayed to the sink as
    /// `Started`, the cached fields and `Completed`; a miss streams and caches
    /// the authoritative result.
    pub async fn stream_with_cache<F, Fut>(
        &self,
        cache: &str,
        key: &CacheKey,
        fields: Arc<FieldSet>,
        producer: F,
        sink: &dyn EventSink,
    ) -> Result<Resolved<Value>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<FragmentStream>>,
    {
        let manager = self.caches.get(cache)?;
        let pipeline = self.pipeline(fields);

        if let Some(cached) = lookup::<Value>(&manager, key).await {
            debug!(cache, key = %key, "replaying cached stream result");
            pipeline.replay(&cached, sink).await?;
            return Ok(Resolved {
                artifact: cached,
                from_cache: true,
            });
        }

        let result = pipeline.run(producer, sink).await?;
        if let Err(e) = manager.set(key, &result).await {
            warn!(cache, key = %key, error = %e, "could not cache stream result");
        }
        Ok(Resolved {
            artifact: result,
            from_cache: false,
        })
    }

    fn jobs(&self) -> Result<&Arc<JobRunner>> {
        self.jobs.as_ref().ok_or_else(|| {
            Error::configuration_with_context(
                "background jobs are not configured",
                ErrorContext::new()
                    .with_details("supply a job processor or a queue backend to the builder")
                    .with_source("ai_core"),
            )
        })
    }

    pub fn job_runner(&self) -> Option<&Arc<JobRunner>> {
        self.jobs.as_ref()
    }

    pub async fn submit_background_job(&self, unit: WorkUnit) -> Result<JobHandle> {
        self.jobs()?.submit(unit).await
    }

    pub async fn job_status(&self, id: &JobId) -> Result<Option<Job>> {
        self.jobs()?.status(id).await
    }

    pub async fn job_stats(&self) -> Result<QueueStats> {
        self.jobs()?.stats().await
    }

    pub async fn cache_stats(&self, name: &str) -> Result<CacheStats> {
        self.caches.stats(name).await
    }

    pub async fn all_cache_stats(&self) -> BTreeMap<String, CacheStats> {
        self.caches.all_stats().await
    }

    pub async fn clear_cache(&self, name: &str) -> Result<()> {
        self.caches.clear(name).await?;
        info!(cache = name, "cache cleared");
        Ok(())
    }
}

/// Cache read that degrades to a miss when the backend cannot answer.
async fn lookup<T: DeserializeOwned>(manager: &CacheManager, key: &CacheKey) -> Option<T> {
    match manager.get::<T>(key).await {
        Ok(found) => found,
        Err(e) => {
            warn!(cache = %manager.name(), key = %key, error = %e, "cache read failed, treating as miss");
            None
        }
    }
}
