//! Delivery events and the sinks that carry them to a client.

use crate::resilience::ErrorClass;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

const CLOSED_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One event on the client-facing channel.
///
/// A run emits `Started`, zero or more `Field`s, then exactly one of
/// `Completed` or `Failed`, unless the client disconnects first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DeliveryEvent {
    Started {
        request_id: String,
    },
    Field {
        name: String,
        value: Value,
    },
    Completed {
        result: Value,
        #[serde(default)]
        from_cache: bool,
    },
    Failed {
        class: ErrorClass,
        message: String,
    },
}

impl DeliveryEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DeliveryEvent::Started { .. } => "started",
            DeliveryEvent::Field { .. } => "field",
            DeliveryEvent::Completed { .. } => "completed",
            DeliveryEvent::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryEvent::Completed { .. } | DeliveryEvent::Failed { .. }
        )
    }

    pub fn failed(err: &Error) -> Self {
        DeliveryEvent::Failed {
            class: err.class(),
            message: err.to_string(),
        }
    }
}

/// Destination for delivery events, usually one connected client.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event. Returns [`Error::Cancelled`] once the client is gone.
    async fn push(&self, event: DeliveryEvent) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Resolves once the client is gone. The default polls [`is_closed`](Self::is_closed).
    async fn closed(&self) {
        while !self.is_closed() {
            tokio::time::sleep(CLOSED_POLL_INTERVAL).await;
        }
    }
}

/// Sink over a bounded Tokio channel; dropping the receiver closes it.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<DeliveryEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<DeliveryEvent>) -> Self {
        Self { tx }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<DeliveryEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn push(&self, event: DeliveryEvent) -> Result<()> {
        self.tx.send(event).await.map_err(|_| Error::Cancelled)
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Sink that keeps every event in memory.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<DeliveryEvent>>,
    closed: AtomicBool,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a client disconnect; later pushes fail with [`Error::Cancelled`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<DeliveryEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Names of the `Field` events, in delivery order.
    pub fn field_names(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DeliveryEvent::Field { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn push(&self, event: DeliveryEvent) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Cancelled);
        }
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
