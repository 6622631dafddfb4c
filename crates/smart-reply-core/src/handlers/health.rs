use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    status: String,
    database: String,
    memory: bool,
    pending_buffers: usize,
}

pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let database = match &state.db_pool {
        Some(pool) if pool.ping().await => "up",
        Some(_) => "down",
        None => "not_configured",
    };
    let status = if database == "down" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status,
        Json(ReadinessResponse {
            status: if status.is_success() { "ready" } else { "degraded" }.to_string(),
            database: database.to_string(),
            memory: state.orchestrator.memory_enabled(),
            pending_buffers: state.orchestrator.queue().pending_count(),
        }),
    )
}
