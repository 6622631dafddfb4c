use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::services::transport::parse_webhook;
use crate::state::AppState;
use crate::utils::error::ApiError;

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub accepted: usize,
}

/// Gateway callback intake. Signature is checked against the raw body before
/// any parsing happens.
pub async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    if let Some(validator) = &state.webhook_validator {
        validator.validate(&headers, &body)?;
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid webhook JSON: {}", e)))?;

    let events = parse_webhook(payload);
    if events.is_empty() {
        debug!("Webhook carried no actionable events");
    }

    let accepted = events.len();
    for event in events {
        state.orchestrator.handle_event(event).await;
    }

    if accepted > 0 {
        info!("Webhook accepted {} event(s)", accepted);
    }
    Ok(Json(WebhookAck { accepted }))
}
