use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::MemoryEntry;
use crate::state::AppState;
use crate::utils::error::ApiError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryExport {
    pub conversation_id: String,
    pub count: usize,
    pub entries: Vec<MemoryEntry>,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct PruneQuery {
    pub older_than_days: Option<u32>,
}

#[derive(Serialize)]
pub struct PruneResponse {
    pub removed: usize,
    pub older_than_days: u32,
}

pub async fn export_memory(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<MemoryExport>, ApiError> {
    let entries = state.orchestrator.export_memory(&conversation_id).await?;
    Ok(Json(MemoryExport {
        conversation_id,
        count: entries.len(),
        entries,
    }))
}

pub async fn delete_memory(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let deleted = state.orchestrator.forget_contact(&conversation_id).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!(
            "No memory stored for {}",
            conversation_id
        )));
    }
    info!(%conversation_id, "Contact memory deleted on request");
    Ok(Json(DeleteResponse { deleted }))
}

pub async fn prune_memory(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<PruneQuery>,
) -> Result<Json<PruneResponse>, ApiError> {
    let older_than_days = query
        .older_than_days
        .unwrap_or(state.settings.memory.retention_days);
    let removed = state
        .orchestrator
        .prune_memory(&conversation_id, older_than_days)
        .await?;
    Ok(Json(PruneResponse {
        removed,
        older_than_days,
    }))
}
