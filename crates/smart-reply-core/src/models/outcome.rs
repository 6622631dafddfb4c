use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
    Skipped,
}

/// Result of one flush cycle, broadcast to observers and never persisted.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregationOutcome {
    pub conversation_id: String,
    pub contact_name: String,
    pub message_count: usize,
    pub aggregated_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_text: Option<String>,
    pub cost_saved: f64,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Observer view of one live buffer.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BufferSnapshot {
    pub conversation_id: String,
    pub display_name: String,
    pub count: usize,
    pub start_time: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub preview: String,
    pub owner_paused: bool,
}
