//! Incremental delivery: forward fields to the client as soon as they are complete.
//!
//! # Delivery Pipeline
//!
//! A streaming upstream response arrives as text fragments of a JSON object.
//! The pipeline keeps the accumulated text, watches a fixed [`FieldSet`], and
//! pushes each field to an [`EventSink`] the moment its value closes. When the
//! stream ends it performs one authoritative parse of the whole text; only that
//! result is returned (and cached by callers).
//!
//! ```text
//! producer ──open (retried)──► fragments ──► PartialResult ──Field──► sink
//!                                   │
//!                                  end ──► parse_authoritative ──Completed──► sink
//!                                                  │
//!                                               FollowUp (detached)
//! ```
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`DeliveryPipeline`] | Drives one run from open to terminal event |
//! | [`FieldSet`] | Fields watched for early delivery |
//! | [`PartialResult`] | Accumulated text plus already-emitted fields |
//! | [`DeliveryEvent`] | `started` / `field` / `completed` / `failed` |
//! | [`ChannelSink`] | Sink over an mpsc channel |
//! | [`ResultValidator`] | Optional JSON Schema check of the final result |
//!
//! ## Guarantees
//!
//! - Each field is emitted at most once, in discovery order.
//! - Exactly one terminal event per run, unless the client disconnects; a
//!   closed sink stops consumption and no terminal event is sent.
//! - Opening the stream goes through the [`ResilienceExecutor`]; a failure after
//!   the first fragment is not retried, because fields were already delivered.
//! - The whole run is bounded by the stream deadline, delivery to a slow
//!   sink included. A client that disconnects while upstream is stalled is
//!   noticed without waiting for the next fragment.

mod finalize;
mod partial;
mod sink;

pub use finalize::{parse_authoritative, ResultValidator};
pub use partial::{FieldKind, FieldSet, FieldSpec, PartialResult};
pub use sink::{ChannelSink, CollectingSink, DeliveryEvent, EventSink};

use crate::resilience::{ResilienceExecutor, RetryPolicy};
use crate::{BoxStream, Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Text fragments of one streaming upstream response.
pub type FragmentStream = BoxStream<'static, String>;

/// Secondary work started after a successful run (e.g. image generation).
///
/// It runs detached: its outcome never changes the run's terminal event.
#[async_trait]
pub trait FollowUp: Send + Sync {
    async fn run(&self, request_id: String, result: Value) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    Started,
    Streaming,
    Finalizing,
    Completed,
    Failed,
}

pub struct DeliveryPipeline {
    fields: Arc<FieldSet>,
    open_policy: RetryPolicy,
    stream_deadline: Duration,
    executor: ResilienceExecutor,
    validator: Option<Arc<ResultValidator>>,
    follow_up: Option<Arc<dyn FollowUp>>,
}

impl DeliveryPipeline {
    pub fn new(fields: Arc<FieldSet>) -> Self {
        Self {
            fields,
            open_policy: RetryPolicy::new("stream_open"),
            stream_deadline: Duration::from_secs(60),
            executor: ResilienceExecutor::new(),
            validator: None,
            follow_up: None,
        }
    }

    pub fn with_open_policy(mut self, policy: RetryPolicy) -> Self {
        self.open_policy = policy;
        self
    }

    pub fn with_stream_deadline(mut self, deadline: Duration) -> Self {
        self.stream_deadline = deadline;
        self
    }

    /// Share an executor so its counters include this pipeline's attempts.
    pub fn with_executor(mut self, executor: ResilienceExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_validator(mut self, validator: Arc<ResultValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_follow_up(mut self, follow_up: Arc<dyn FollowUp>) -> Self {
        self.follow_up = Some(follow_up);
        self
    }

    pub fn fields(&self) -> &Arc<FieldSet> {
        &self.fields
    }

    /// Run one streaming request to completion.
    ///
    /// `producer` opens the upstream stream and is called once per attempt.
    /// Returns the authoritative result, or the failure that was reported to
    /// the sink. Returns [`Error::Cancelled`] if the sink closed mid-run.
    pub async fn run<F, Fut>(&self, producer: F, sink: &dyn EventSink) -> Result<Value>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<FragmentStream>>,
    {
        let request_id = uuid::Uuid::new_v4().to_string();
        let deadline = Instant::now() + self.stream_deadline;
        let mut state = PipelineState::Started;

        sink.push(DeliveryEvent::Started {
            request_id: request_id.clone(),
        })
        .await?;

        let opened =
            tokio::time::timeout_at(deadline, self.executor.execute(&self.open_policy, producer))
                .await;
        let mut stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(self.fail(&request_id, &mut state, sink, deadline, e).await),
            Err(_) => {
                let e = self.deadline_error();
                return Err(self.fail(&request_id, &mut state, sink, deadline, e).await);
            }
        };
        self.advance(&request_id, &mut state, PipelineState::Streaming);

        let mut partial = PartialResult::new(Arc::clone(&self.fields));
        let mut fragments = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = sink.closed() => {
                    info!(request_id = %request_id, fragments, "client disconnected, abandoning stream");
                    return Err(Error::Cancelled);
                }
                next = tokio::time::timeout_at(deadline, stream.next()) => match next {
                    Ok(next) => next,
                    Err(_) => {
                        let e = self.deadline_error();
                        return Err(self.fail(&request_id, &mut state, sink, deadline, e).await);
                    }
                },
            };
            match next {
                Some(Ok(fragment)) => {
                    fragments += 1;
                    for (name, value) in partial.push(&fragment) {
                        debug!(request_id = %request_id, field = %name, "field complete");
                        let event = DeliveryEvent::Field { name, value };
                        self.deliver(&request_id, &mut state, sink, deadline, event)
                            .await?;
                    }
                }
                Some(Err(e)) => {
                    return Err(self.fail(&request_id, &mut state, sink, deadline, e).await)
                }
                None => break,
            }
        }
        drop(stream);

        self.advance(&request_id, &mut state, PipelineState::Finalizing);
        let text = partial.into_buffer();
        let result = match self.finalize(&text) {
            Ok(result) => result,
            Err(e) => return Err(self.fail(&request_id, &mut state, sink, deadline, e).await),
        };

        let completed = DeliveryEvent::Completed {
            result: result.clone(),
            from_cache: false,
        };
        self.deliver(&request_id, &mut state, sink, deadline, completed)
            .await?;
        self.advance(&request_id, &mut state, PipelineState::Completed);
        info!(request_id = %request_id, fragments, bytes = text.len(), "stream delivered");

        self.spawn_follow_up(request_id, &result);
        Ok(result)
    }

    /// Deliver a previously cached result through the same event sequence.
    pub async fn replay(&self, cached: &Value, sink: &dyn EventSink) -> Result<()> {
        sink.push(DeliveryEvent::Started {
            request_id: uuid::Uuid::new_v4().to_string(),
        })
        .await?;
        if let Some(object) = cached.as_object() {
            for spec in self.fields.specs() {
                if let Some(value) = object.get(spec.name()) {
                    sink.push(DeliveryEvent::Field {
                        name: spec.name().to_string(),
                        value: value.clone(),
                    })
                    .await?;
                }
            }
        }
        sink.push(DeliveryEvent::Completed {
            result: cached.clone(),
            from_cache: true,
        })
        .await
    }

    /// Parse a complete non-streamed response.
    ///
    /// If the text is not valid JSON, the watched fields that can still be
    /// read from it are returned instead; with none, the parse failure stands.
    pub fn parse_batch(&self, text: &str) -> Result<Value> {
        match self.finalize(text) {
            Ok(value) => Ok(value),
            Err(err) => {
                let salvaged: Map<String, Value> = self.fields.salvage(text);
                if salvaged.is_empty() {
                    return Err(err);
                }
                warn!(
                    recovered = salvaged.len(),
                    watched = self.fields.len(),
                    error = %err,
                    "salvaged fields from unparseable response"
                );
                Ok(Value::Object(salvaged))
            }
        }
    }

    fn finalize(&self, text: &str) -> Result<Value> {
        let result = parse_authoritative(text)?;
        if let Some(validator) = &self.validator {
            validator.validate(&result)?;
        }
        Ok(result)
    }

    fn spawn_follow_up(&self, request_id: String, result: &Value) {
        let Some(follow_up) = self.follow_up.clone() else {
            return;
        };
        let result = result.clone();
        tokio::spawn(async move {
            if let Err(e) = follow_up.run(request_id.clone(), result).await {
                warn!(request_id = %request_id, error = %e, "follow-up failed");
            }
        });
    }

    /// Push one post-`Started` event. A sink that does not accept it before
    /// the deadline fails the run.
    async fn deliver(
        &self,
        request_id: &str,
        state: &mut PipelineState,
        sink: &dyn EventSink,
        deadline: Instant,
        event: DeliveryEvent,
    ) -> Result<()> {
        match tokio::time::timeout_at(deadline, sink.push(event)).await {
            Ok(pushed) => pushed,
            Err(_) => {
                let e = self.deadline_error();
                Err(self.fail(request_id, state, sink, deadline, e).await)
            }
        }
    }

    async fn fail(
        &self,
        request_id: &str,
        state: &mut PipelineState,
        sink: &dyn EventSink,
        deadline: Instant,
        err: Error,
    ) -> Error {
        self.advance(request_id, state, PipelineState::Failed);
        warn!(
            request_id,
            error_class = err.class().name(),
            error = %err,
            "stream failed"
        );
        // Past the deadline this still gets one poll, so a sink with room receives it.
        match tokio::time::timeout_at(deadline, sink.push(DeliveryEvent::failed(&err))).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => debug!(request_id, "client gone before failure could be reported"),
            Err(_) => debug!(request_id, "client not draining, failure not reported"),
        }
        err
    }

    fn advance(&self, request_id: &str, state: &mut PipelineState, next: PipelineState) {
        debug!(request_id, from = ?state, to = ?next, "pipeline state");
        *state = next;
    }

    fn deadline_error(&self) -> Error {
        Error::Timeout {
            operation: format!("{}.stream", self.open_policy.operation),
            deadline: self.stream_deadline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::ErrorClass;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fields() -> Arc<FieldSet> {
        Arc::new(
            FieldSet::from_specs([
                ("name", FieldKind::String),
                ("ingredients", FieldKind::StringArray),
                ("tip", FieldKind::String),
            ])
            .unwrap(),
        )
    }

    fn pipeline() -> DeliveryPipeline {
        DeliveryPipeline::new(fields()).with_open_policy(
            RetryPolicy::new("test_stream")
                .with_max_retries(2)
                .with_base_delay(Duration::from_millis(10))
                .without_jitter(),
        )
    }

    fn fragments(parts: &[&str]) -> FragmentStream {
        let items: Vec<Result<String>> = parts.iter().map(|p| Ok(p.to_string())).collect();
        futures::stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn test_fields_then_completed() {
        let sink = CollectingSink::new();
        let parts = [r#"{"name":"Dai"#, r#"quiri","ingredients":["rum","#, r#""lime"],"tip":"chill"}"#];
        let result = pipeline()
            .run(|| async { Ok(fragments(&parts)) }, &sink)
            .await
            .unwrap();

        assert_eq!(result["tip"], "chill");
        let events = sink.events();
        assert!(matches!(events[0], DeliveryEvent::Started { .. }));
        assert_eq!(sink.field_names(), vec!["name", "ingredients", "tip"]);
        assert_eq!(
            events.last(),
            Some(&DeliveryEvent::Completed {
                result: result.clone(),
                from_cache: false
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_is_retried() {
        let calls = AtomicU32::new(0);
        let sink = CollectingSink::new();
        let result = pipeline()
            .run(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(Error::from_http_status(503, "busy"))
                        } else {
                            Ok(fragments(&[r#"{"name":"Mojito"}"#]))
                        }
                    }
                },
                &sink,
            )
            .await
            .unwrap();
        assert_eq!(result["name"], "Mojito");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_mid_stream_error_fails_without_retry() {
        let calls = AtomicU32::new(0);
        let sink = CollectingSink::new();
        let err = pipeline()
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        let items: Vec<Result<String>> = vec![
                            Ok(r#"{"name":"Gimlet","#.to_string()),
                            Err(Error::upstream(ErrorClass::NetworkTransient, "reset")),
                        ];
                        Ok(futures::stream::iter(items).boxed())
                    }
                },
                &sink,
            )
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::NetworkTransient);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.field_names(), vec!["name"]);
        assert!(matches!(
            sink.events().last(),
            Some(DeliveryEvent::Failed {
                class: ErrorClass::NetworkTransient,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unparseable_end_fails_with_parse_failure() {
        let sink = CollectingSink::new();
        let err = pipeline()
            .run(
                || async { Ok(fragments(&[r#"{"name":"Sour", "tip": "#])) },
                &sink,
            )
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::ParseFailure);
        assert_eq!(sink.field_names(), vec!["name"]);
        assert!(sink.events().last().unwrap().is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_deadline_bounds_the_run() {
        let sink = CollectingSink::new();
        let p = pipeline().with_stream_deadline(Duration::from_secs(5));
        let err = p
            .run(
                || async {
                    let s = futures::stream::iter(vec![Ok::<_, Error>(r#"{"name":"X","#.to_string())])
                        .chain(futures::stream::pending());
                    Ok(s.boxed())
                },
                &sink,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(matches!(
            sink.events().last(),
            Some(DeliveryEvent::Failed {
                class: ErrorClass::Timeout,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_closed_sink_cancels_without_terminal_event() {
        let sink = CollectingSink::new();
        sink.close();
        let err = pipeline()
            .run(|| async { Ok(fragments(&[r#"{"name":"X"}"#])) }, &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_replay_marks_cached() {
        let sink = CollectingSink::new();
        let cached = json!({"tip": "stir", "name": "Negroni", "extra": 1});
        pipeline().replay(&cached, &sink).await.unwrap();
        assert_eq!(sink.field_names(), vec!["name", "tip"]);
        assert!(matches!(
            sink.events().last(),
            Some(DeliveryEvent::Completed {
                from_cache: true,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_batch_salvages() {
        let p = pipeline();
        let value = p
            .parse_batch(r#"{"name":"Paloma","ingredients":["tequila"],"tip":"#)
            .unwrap();
        assert_eq!(value, json!({"name": "Paloma", "ingredients": ["tequila"]}));
        assert!(p.parse_batch("no json here").is_err());
    }
}
