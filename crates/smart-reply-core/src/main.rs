use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use smart_reply_core::{
    build_router,
    config::Settings,
    database::DbPool,
    security::WebhookSignatureValidator,
    services::{
        build_embedding_chain, build_reply_chain,
        conversation::{ConversationOrchestrator, OrchestratorConfig, OrchestratorDeps},
        memory::{InMemoryVectorStore, PgVectorStore, VectorStore},
        transport::{InMemoryContactDirectory, WebhookTransport},
        HttpMediaDescriber, MediaDescriber,
    },
    state::AppState,
    utils::logger::init_logger,
};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    init_logger(&settings.logging)?;

    info!("🚀 Starting smart reply server...");
    info!(
        "✅ Configuration loaded (edition: {:?}, debounce: {:?})",
        settings.features.edition,
        settings.queue.debounce()
    );

    let db_pool = match &settings.database {
        Some(database) => Some(DbPool::new(database).await?),
        None => None,
    };

    let store: Arc<dyn VectorStore> = match &db_pool {
        Some(pool) => {
            let pg = PgVectorStore::new(pool.clone());
            pg.ensure_schema().await?;
            info!("✅ Conversation memory backed by Postgres/pgvector");
            Arc::new(pg)
        }
        None => {
            if settings.memory_active() {
                warn!("No database configured, conversation memory is process-local");
            }
            Arc::new(InMemoryVectorStore::new())
        }
    };

    let embedder = build_embedding_chain(&settings.embedding);
    let reply = build_reply_chain(&settings.llm);
    if embedder.is_empty() || reply.is_empty() {
        warn!("Embedding or LLM provider list is empty, replies will fail until configured");
    }

    let describer: Option<Arc<dyn MediaDescriber>> = settings
        .llm
        .vision
        .as_ref()
        .map(|endpoint| Arc::new(HttpMediaDescriber::new(endpoint, &settings.llm)) as Arc<dyn MediaDescriber>);

    let orchestrator = ConversationOrchestrator::new(
        OrchestratorDeps {
            transport: Arc::new(WebhookTransport::new(&settings.transport)),
            reply: Arc::new(reply),
            embedder: Arc::new(embedder),
            store,
            contacts: Arc::new(InMemoryContactDirectory::new()),
            describer,
        },
        OrchestratorConfig::from_settings(&settings),
    );
    let _maintenance = orchestrator.spawn_maintenance();
    info!("✅ Smart queue and owner intercept running");

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    let state = AppState {
        orchestrator,
        webhook_validator: WebhookSignatureValidator::from_secret(
            settings.transport.webhook_secret.as_deref(),
        ),
        db_pool: db_pool.clone(),
        settings: Arc::new(settings),
    };
    if state.webhook_validator.is_none() {
        warn!("Webhook secret not set, gateway callbacks are accepted unsigned");
    }

    let app = build_router(state);

    info!("🎯 Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(pool) = db_pool {
        pool.close().await;
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
}
