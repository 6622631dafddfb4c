use axum::extract::FromRef;
use std::sync::Arc;

use crate::config::Settings;
use crate::database::DbPool;
use crate::security::WebhookSignatureValidator;
use crate::services::ConversationOrchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: ConversationOrchestrator,
    pub settings: Arc<Settings>,
    pub db_pool: Option<DbPool>,
    pub webhook_validator: Option<WebhookSignatureValidator>,
}

impl FromRef<AppState> for ConversationOrchestrator {
    fn from_ref(state: &AppState) -> Self {
        state.orchestrator.clone()
    }
}

impl FromRef<AppState> for Arc<Settings> {
    fn from_ref(state: &AppState) -> Self {
        state.settings.clone()
    }
}
