use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::context_builder::PromptBuilder;
use super::pipeline::{PipelineConfig, PipelineMemory, ReplyPipeline};
use crate::config::{FilterConfig, PromptsConfig, Settings};
use crate::models::{AnnotatedMessage, InboundMessage, MemoryEntry, MessageKind, TransportEvent};
use crate::services::embedding_service::EmbeddingProvider;
use crate::services::event_bus::EventBus;
use crate::services::llm_service::{MediaDescriber, ReplyProvider};
use crate::services::memory::{ConversationMemoryStore, MemoryWriter, VectorStore};
use crate::services::owner_intercept::OwnerInterceptTracker;
use crate::services::smart_queue::{BatchHandler, SmartQueue};
use crate::services::transport::{ChatTransport, ContactDirectory};
use crate::utils::error::CoreError;

/// External collaborators, injected once at startup.
pub struct OrchestratorDeps {
    pub transport: Arc<dyn ChatTransport>,
    pub reply: Arc<dyn ReplyProvider>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub store: Arc<dyn VectorStore>,
    pub contacts: Arc<dyn ContactDirectory>,
    pub describer: Option<Arc<dyn MediaDescriber>>,
}

/// Effective runtime policy (edition gates already applied).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub debounce: Duration,
    pub owner_pause: Duration,
    pub owner_ttl: Duration,
    pub owner_sweep_interval: Duration,
    pub owner_intercept_enabled: bool,
    pub memory_enabled: bool,
    pub multimodal_enabled: bool,
    pub auto_reply_enabled: bool,
    pub filters: FilterConfig,
    pub recall_top_k: usize,
    pub recent_limit: usize,
    pub max_history_tokens: usize,
    pub fallback_history_limit: usize,
    pub retention_days: u32,
    pub prune_interval: Duration,
    pub writer_queue_capacity: usize,
    pub event_capacity: usize,
    pub unit_cost: f64,
    pub prompts: PromptsConfig,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            debounce: settings.queue.debounce(),
            owner_pause: settings.queue.owner_pause(),
            owner_ttl: settings.owner.ttl(),
            owner_sweep_interval: settings.owner.sweep_interval(),
            owner_intercept_enabled: settings.owner_intercept_active(),
            memory_enabled: settings.memory_active(),
            multimodal_enabled: settings.multimodal_active(),
            auto_reply_enabled: settings.queue.auto_reply_enabled,
            filters: settings.filters.clone(),
            recall_top_k: settings.memory.recall_top_k,
            recent_limit: settings.memory.recent_limit,
            max_history_tokens: settings.memory.max_history_tokens,
            fallback_history_limit: settings.memory.fallback_history_limit,
            retention_days: settings.memory.retention_days,
            prune_interval: settings.memory.prune_interval(),
            writer_queue_capacity: settings.memory.writer_queue_capacity,
            event_capacity: settings.queue.event_capacity,
            unit_cost: settings.pricing.unit_cost,
            prompts: settings.prompts.clone(),
        }
    }
}

/// Owns the queue, the owner tracker and the memory store for the process and
/// routes transport events through them.
#[derive(Clone)]
pub struct ConversationOrchestrator {
    queue: SmartQueue,
    owner: OwnerInterceptTracker,
    memory: Option<ConversationMemoryStore>,
    contacts: Arc<dyn ContactDirectory>,
    transport: Arc<dyn ChatTransport>,
    describer: Option<Arc<dyn MediaDescriber>>,
    pipeline: Arc<ReplyPipeline>,
    config: Arc<OrchestratorConfig>,
}

impl ConversationOrchestrator {
    /// Must run inside a tokio runtime (spawns the memory writer).
    pub fn new(deps: OrchestratorDeps, config: OrchestratorConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        let queue = SmartQueue::new(config.debounce, config.unit_cost, events);

        let memory = config.memory_enabled.then(|| {
            let store = ConversationMemoryStore::new(deps.store.clone(), deps.embedder.clone());
            let writer = MemoryWriter::spawn(store.clone(), config.writer_queue_capacity);
            PipelineMemory { store, writer }
        });

        let owner = OwnerInterceptTracker::new(
            config.owner_ttl,
            memory.as_ref().map(|m| m.writer.clone()),
        );

        let pipeline = ReplyPipeline::new(
            memory.clone(),
            owner.clone(),
            deps.reply.clone(),
            deps.transport.clone(),
            PromptBuilder::new(&config.prompts),
            PipelineConfig {
                auto_reply_enabled: config.auto_reply_enabled,
                owner_intercept_enabled: config.owner_intercept_enabled,
                recall_top_k: config.recall_top_k,
                recent_limit: config.recent_limit,
                max_history_tokens: config.max_history_tokens,
                fallback_history_limit: config.fallback_history_limit,
                style_context: config.prompts.style_context.clone(),
            },
        );

        info!(
            memory = config.memory_enabled,
            owner_intercept = config.owner_intercept_enabled,
            multimodal = config.multimodal_enabled,
            "Conversation orchestrator ready"
        );

        Self {
            queue,
            owner,
            memory: memory.map(|m| m.store),
            contacts: deps.contacts,
            transport: deps.transport,
            describer: deps.describer,
            pipeline: Arc::new(pipeline),
            config: Arc::new(config),
        }
    }

    pub fn queue(&self) -> &SmartQueue {
        &self.queue
    }

    pub fn owner(&self) -> &OwnerInterceptTracker {
        &self.owner
    }

    pub fn events(&self) -> &EventBus {
        self.queue.events()
    }

    pub fn memory_enabled(&self) -> bool {
        self.memory.is_some()
    }

    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::NewMessage { message } if message.from_self => {
                self.on_owner_message(message, None).await;
            }
            TransportEvent::NewMessage { message } => {
                self.on_inbound_message(message).await;
            }
            TransportEvent::OwnMessageSent {
                message,
                media_context,
            } => {
                self.on_owner_message(message, media_context).await;
            }
            TransportEvent::MessageRevoked {
                conversation_id,
                message_id,
            } => {
                self.on_message_revoked(&conversation_id, &message_id);
            }
            TransportEvent::Disconnected { reason } => {
                warn!(
                    "Chat transport disconnected: {}",
                    reason.as_deref().unwrap_or("unknown reason")
                );
            }
        }
    }

    fn kind_allowed(&self, kind: MessageKind) -> bool {
        let filters = &self.config.filters;
        match kind {
            MessageKind::Chat => true,
            MessageKind::Group => !filters.ignore_groups,
            MessageKind::Broadcast => !filters.ignore_broadcasts,
            MessageKind::Status => !filters.ignore_status,
            MessageKind::System => !filters.ignore_system,
        }
    }

    pub fn is_eligible(&self, message: &InboundMessage) -> bool {
        !message.from_self && self.kind_allowed(message.kind)
    }

    /// Customer message: filter, sync contact, enqueue. Media is described
    /// after the message holds its place in the buffer. Returns whether the
    /// message was queued.
    pub async fn on_inbound_message(&self, message: InboundMessage) -> bool {
        if !self.is_eligible(&message) {
            debug!(
                conversation_id = %message.conversation_id,
                kind = ?message.kind,
                "Ignoring ineligible message"
            );
            return false;
        }

        let conversation_id = message.conversation_id.clone();

        if let Err(e) = self.contacts.upsert_contact(&message).await {
            warn!(%conversation_id, "Contact sync failed: {}", e);
        }

        // fresh conversation: drop leftovers, keep owner context that is still live
        if !self.queue.has_pending_buffer(&conversation_id)
            && !self.owner.has_owner_activity(&conversation_id)
        {
            self.owner.clear_chat(&conversation_id);
        }

        if self.config.owner_intercept_enabled {
            self.owner.track_customer_message(&conversation_id, &message);
        }

        let handler: Arc<dyn BatchHandler> = self.pipeline.clone();
        self.queue
            .enqueue(&conversation_id, AnnotatedMessage::plain(message.clone()), handler);

        if message.has_media {
            if let Some(description) = self.describe_media(&message).await {
                self.queue
                    .annotate_message(&conversation_id, &message.id, description);
            }
        }
        true
    }

    /// Operator reply seen on the business account.
    pub async fn on_owner_message(&self, message: InboundMessage, media_context: Option<String>) {
        if !self.kind_allowed(message.kind) {
            return;
        }

        let conversation_id = message.conversation_id.clone();

        if self.config.owner_intercept_enabled && self.queue.has_pending_buffer(&conversation_id) {
            self.queue
                .pause_for_owner(&conversation_id, self.config.owner_pause);
        }

        let media_context = match media_context {
            Some(context) => Some(context),
            None if message.has_media => self.describe_media(&message).await,
            None => None,
        };

        self.owner
            .on_owner_message(&conversation_id, &message, media_context);
    }

    pub fn on_message_revoked(&self, conversation_id: &str, message_id: &str) {
        if self.queue.remove_message(conversation_id, message_id) {
            info!(conversation_id, message_id, "Revoked message removed from buffer");
        }
    }

    async fn describe_media(&self, message: &InboundMessage) -> Option<String> {
        if !self.config.multimodal_enabled {
            return None;
        }
        let describer = self.describer.as_ref()?;

        let media = match self
            .transport
            .download_media(&message.conversation_id, &message.id)
            .await
        {
            Ok(media) => media,
            Err(e) => {
                warn!(conversation_id = %message.conversation_id, "Media download failed: {}", e);
                return None;
            }
        };

        let caption = Some(message.body.as_str()).filter(|b| !b.trim().is_empty());
        match describer.describe(&media, caption).await {
            Ok(description) if !description.is_empty() => Some(description),
            Ok(_) => None,
            Err(e) => {
                warn!(conversation_id = %message.conversation_id, "Media description failed: {}", e);
                None
            }
        }
    }

    fn memory_store(&self) -> Result<&ConversationMemoryStore, CoreError> {
        self.memory
            .as_ref()
            .ok_or_else(|| CoreError::Config("Conversation memory is disabled".to_string()))
    }

    pub async fn export_memory(&self, conversation_id: &str) -> Result<Vec<MemoryEntry>, CoreError> {
        Ok(self.memory_store()?.export_contact_memory(conversation_id).await)
    }

    pub async fn forget_contact(&self, conversation_id: &str) -> Result<bool, CoreError> {
        Ok(self.memory_store()?.delete_contact_memory(conversation_id).await)
    }

    pub async fn prune_memory(&self, conversation_id: &str, older_than_days: u32) -> Result<usize, CoreError> {
        Ok(self
            .memory_store()?
            .prune_old_memory(conversation_id, older_than_days)
            .await)
    }

    /// Owner-activity sweep plus, with memory on, the retention prune.
    pub fn spawn_maintenance(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = vec![self.owner.spawn_sweeper(self.config.owner_sweep_interval)];

        if let Some(memory) = self.memory.clone() {
            let every = self.config.prune_interval;
            let retention_days = self.config.retention_days;
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                loop {
                    ticker.tick().await;
                    let pruned = memory.prune_all(retention_days).await;
                    debug!("Retention pass removed {} records", pruned);
                }
            }));
        }

        tasks
    }
}
