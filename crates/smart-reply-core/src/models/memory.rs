use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::chat::ChatMessage;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MemoryRole {
    User,
    Owner,
    Assistant,
}

impl MemoryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Owner => "owner",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "owner" => Some(Self::Owner),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }

    /// Operator and bot turns both speak for the business.
    pub fn chat_role(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Owner | Self::Assistant => "assistant",
        }
    }
}

/// Persisted turn, including its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRecord {
    pub id: String,
    pub conversation_id: String,
    pub role: MemoryRole,
    pub text: String,
    pub media_context: Option<String>,
    pub vector: Vec<f32>,
    pub timestamp: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn to_entry(&self) -> MemoryEntry {
        MemoryEntry {
            id: self.id.clone(),
            conversation_id: self.conversation_id.clone(),
            role: self.role,
            text: self.text.clone(),
            media_context: self.media_context.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// A record as handed out to callers: vectors never leave the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    pub id: String,
    pub conversation_id: String,
    pub role: MemoryRole,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_context: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecalledMemory {
    #[serde(flatten)]
    pub entry: MemoryEntry,
    /// `1 / (1 + distance)` for semantic hits, 0 for recency hits.
    pub relevance: f32,
}

impl RecalledMemory {
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.entry.role.chat_role().to_string(),
            content: self.entry.text.clone(),
        }
    }
}
