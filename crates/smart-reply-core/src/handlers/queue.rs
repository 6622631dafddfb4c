use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use serde::Serialize;
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::models::BufferSnapshot;
use crate::services::ConversationOrchestrator;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub pending: usize,
    pub buffers: Vec<BufferSnapshot>,
}

pub async fn queue_status(State(orchestrator): State<ConversationOrchestrator>) -> Json<QueueStatus> {
    let buffers = orchestrator.queue().snapshots();
    Json(QueueStatus {
        pending: buffers.len(),
        buffers,
    })
}

/// Live `queue:on-update` / `queue:on-processed` feed for the dashboard.
pub async fn queue_events(
    State(orchestrator): State<ConversationOrchestrator>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = orchestrator.events().subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    yield Ok(create_sse_event(event.name(), &event));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("SSE observer lagged, skipped {} queue events", skipped);
                }
                Err(RecvError::Closed) => {
                    debug!("Queue event bus closed, ending SSE stream");
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn create_sse_event<T: Serialize>(event_type: &str, data: &T) -> Event {
    Event::default()
        .event(event_type)
        .data(serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string()))
}
