use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::{AggregationOutcome, BufferSnapshot};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum QueueEvent {
    #[serde(rename = "queue:on-update")]
    Updated { buffers: Vec<BufferSnapshot> },
    #[serde(rename = "queue:on-processed")]
    Processed(AggregationOutcome),
}

impl QueueEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Updated { .. } => "queue:on-update",
            Self::Processed(_) => "queue:on-processed",
        }
    }
}

/// Fire-and-forget fan-out of queue events to observers (SSE clients, tests).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: QueueEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("Queue event dropped (no subscribers): {}", e);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }
}
