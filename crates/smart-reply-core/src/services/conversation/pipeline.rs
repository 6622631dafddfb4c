use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::context_builder::PromptBuilder;
use super::history::{merge_history, to_chat_messages, transport_history, trim_to_budget};
use crate::models::chat::ChatMessage;
use crate::models::MemoryRole;
use crate::services::llm_service::{ReplyProvider, ReplyRequest};
use crate::services::memory::{ConversationMemoryStore, MemoryWrite, MemoryWriter};
use crate::services::owner_intercept::OwnerInterceptTracker;
use crate::services::smart_queue::{BatchHandler, BatchReply, MessageBatch};
use crate::services::transport::ChatTransport;
use crate::utils::error::CoreError;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub auto_reply_enabled: bool,
    pub owner_intercept_enabled: bool,
    pub recall_top_k: usize,
    pub recent_limit: usize,
    pub max_history_tokens: usize,
    pub fallback_history_limit: usize,
    pub style_context: Option<String>,
}

/// Memory handles used together: reads are awaited, the reply write is queued.
#[derive(Clone)]
pub struct PipelineMemory {
    pub store: ConversationMemoryStore,
    pub writer: MemoryWriter,
}

/// Flush callback: turns one aggregated batch into one reply.
pub struct ReplyPipeline {
    memory: Option<PipelineMemory>,
    owner: OwnerInterceptTracker,
    reply: Arc<dyn ReplyProvider>,
    transport: Arc<dyn ChatTransport>,
    prompts: PromptBuilder,
    config: PipelineConfig,
}

impl ReplyPipeline {
    pub fn new(
        memory: Option<PipelineMemory>,
        owner: OwnerInterceptTracker,
        reply: Arc<dyn ReplyProvider>,
        transport: Arc<dyn ChatTransport>,
        prompts: PromptBuilder,
        config: PipelineConfig,
    ) -> Self {
        Self {
            memory,
            owner,
            reply,
            transport,
            prompts,
            config,
        }
    }

    async fn build_history(
        &self,
        batch: &MessageBatch,
        aggregated: &str,
    ) -> Result<Vec<ChatMessage>, CoreError> {
        let conversation_id = batch.conversation_id.as_str();

        match &self.memory {
            Some(memory) => {
                let semantic = memory
                    .store
                    .recall_memory(conversation_id, aggregated, self.config.recall_top_k)
                    .await;
                let recent = memory
                    .store
                    .get_recent_history(conversation_id, self.config.recent_limit)
                    .await;

                debug!(
                    conversation_id,
                    semantic = semantic.len(),
                    recent = recent.len(),
                    "Memory sources loaded"
                );

                let merged = merge_history(semantic, recent, aggregated);
                let trimmed = trim_to_budget(merged, self.config.max_history_tokens);
                Ok(to_chat_messages(&trimmed))
            }
            None => {
                let limit = self.config.fallback_history_limit + batch.len();
                let messages = self
                    .transport
                    .fetch_recent_messages(conversation_id, limit)
                    .await
                    .map_err(|e| CoreError::Transport(format!("Chat context unavailable: {}", e)))?;

                let batch_ids: HashSet<&str> = batch.messages.iter().map(|m| m.id()).collect();
                Ok(transport_history(
                    messages,
                    &batch_ids,
                    self.config.max_history_tokens,
                ))
            }
        }
    }
}

#[async_trait]
impl BatchHandler for ReplyPipeline {
    async fn process_batch(&self, batch: &MessageBatch) -> Result<BatchReply, CoreError> {
        let conversation_id = batch.conversation_id.as_str();
        let aggregated = batch.aggregated_text();
        let multimodal_context = batch.multimodal_context();

        if aggregated.trim().is_empty() {
            return Ok(BatchReply::Skipped {
                reason: "empty batch".to_string(),
            });
        }

        if let Some(memory) = &self.memory {
            let stored = memory
                .store
                .embed_message(
                    conversation_id,
                    MemoryRole::User,
                    &aggregated,
                    multimodal_context.as_deref(),
                )
                .await;
            if !stored {
                debug!(conversation_id, "Customer turn not embedded");
            }
        }

        if !self.config.auto_reply_enabled {
            return Ok(BatchReply::Skipped {
                reason: "auto-reply disabled".to_string(),
            });
        }

        let mut history = self.build_history(batch, &aggregated).await?;

        let owner_context = if self.config.owner_intercept_enabled {
            self.owner.get_owner_context(conversation_id)
        } else {
            None
        };
        if let Some(owner) = &owner_context {
            info!(conversation_id, "Injecting owner context (collaborative mode)");
            history.push(PromptBuilder::owner_turn(owner));
            // used once; later batches start clean
            self.owner.clear_chat(conversation_id);
        }

        let request = ReplyRequest {
            system_prompt: self.prompts.build_system_prompt(owner_context.as_ref()),
            user_message: aggregated,
            history,
            multimodal_context,
            style_context: self.config.style_context.clone(),
            collaborative: owner_context.is_some(),
        };

        let reply = self.reply.generate_reply(&request).await.map_err(|e| {
            warn!(conversation_id, "Reply generation failed: {}", e);
            e
        })?;

        self.transport
            .send_message(conversation_id, &reply.text)
            .await?;

        info!(
            conversation_id,
            messages = batch.len(),
            sentiment = reply.sentiment.as_deref().unwrap_or("-"),
            product_intent = reply.product_intent.as_deref().unwrap_or("-"),
            "Aggregated reply sent"
        );

        if let Some(memory) = &self.memory {
            memory.writer.submit(MemoryWrite {
                conversation_id: conversation_id.to_string(),
                role: MemoryRole::Assistant,
                text: reply.text.clone(),
                media_context: None,
            });
        }

        Ok(BatchReply::Replied {
            reply_text: reply.text,
        })
    }
}
