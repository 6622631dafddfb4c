pub mod normalize;
pub mod webhook;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

use crate::models::{InboundMessage, MediaPayload};
use crate::utils::error::CoreError;

pub use normalize::parse_webhook;
pub use webhook::WebhookTransport;

/// Outbound side of the chat network plus history/media lookups.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), CoreError>;

    /// Latest `limit` messages of a chat, oldest first.
    async fn fetch_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<InboundMessage>, CoreError>;

    async fn download_media(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<MediaPayload, CoreError>;
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Contact {
    pub conversation_id: String,
    pub display_name: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub message_count: u64,
}

#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn upsert_contact(&self, message: &InboundMessage) -> Result<(), CoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryContactDirectory {
    contacts: Arc<DashMap<String, Contact>>,
}

impl InMemoryContactDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, conversation_id: &str) -> Option<Contact> {
        self.contacts.get(conversation_id).map(|c| c.clone())
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

#[async_trait]
impl ContactDirectory for InMemoryContactDirectory {
    async fn upsert_contact(&self, message: &InboundMessage) -> Result<(), CoreError> {
        let name = message.sender_name.clone().filter(|n| !n.trim().is_empty());
        self.contacts
            .entry(message.conversation_id.clone())
            .and_modify(|contact| {
                if name.is_some() {
                    contact.display_name = name.clone();
                }
                contact.last_seen = message.timestamp;
                contact.message_count += 1;
            })
            .or_insert_with(|| Contact {
                conversation_id: message.conversation_id.clone(),
                display_name: name.clone(),
                first_seen: message.timestamp,
                last_seen: message.timestamp,
                message_count: 1,
            });
        Ok(())
    }
}
