pub mod config;
pub mod database;
pub mod handlers;
pub mod models;
pub mod security;
pub mod services;
pub mod state;
pub mod utils;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::state::AppState;

/// Gateway callbacks may carry inline base64 media.
const WEBHOOK_BODY_LIMIT: usize = 25 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check));

    let webhook_routes = Router::new()
        .route("/webhook/events", post(handlers::events::webhook_handler))
        .layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT));

    let api_routes = Router::new()
        .route("/api/queue", get(handlers::queue::queue_status))
        .route("/api/queue/events", get(handlers::queue::queue_events))
        .route(
            "/api/memory/{conversation_id}",
            get(handlers::memory::export_memory).delete(handlers::memory::delete_memory),
        )
        .route(
            "/api/memory/{conversation_id}/prune",
            post(handlers::memory::prune_memory),
        );

    Router::new()
        .merge(public_routes)
        .merge(webhook_routes)
        .merge(api_routes)
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(state)
}
