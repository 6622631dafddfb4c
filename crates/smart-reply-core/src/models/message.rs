use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport-level classification used by the eligibility filter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Chat,
    Group,
    Broadcast,
    Status,
    System,
}

/// Normalized, immutable view of a transport message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundMessage {
    pub id: String,
    pub conversation_id: String,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub has_media: bool,
    #[serde(default)]
    pub from_self: bool,
    #[serde(default)]
    pub kind: MessageKind,
}

impl InboundMessage {
    /// Best human-readable label for the counterparty.
    pub fn display_name(&self) -> &str {
        self.sender_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or(self.sender_id.as_deref())
            .unwrap_or(&self.conversation_id)
    }
}

/// An inbound message plus whatever the multimodal pass made of it. The
/// original body is never rewritten; readers pick `display_text`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnnotatedMessage {
    pub original: InboundMessage,
    pub display_text: String,
    pub multimodal_context: Option<String>,
}

impl AnnotatedMessage {
    pub fn plain(original: InboundMessage) -> Self {
        let display_text = original.body.clone();
        Self {
            original,
            display_text,
            multimodal_context: None,
        }
    }

    /// Rebuild `display_text` from the original body plus the description.
    pub fn attach_media_description(&mut self, description: String) {
        self.display_text = if self.original.body.trim().is_empty() {
            format!("[Media: {}]", description)
        } else {
            format!("{}\n[Media: {}]", self.original.body, description)
        };
        self.multimodal_context = Some(description);
    }

    pub fn id(&self) -> &str {
        &self.original.id
    }
}

/// Raw media fetched through the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    pub mime_type: String,
    /// base64-encoded bytes
    pub data: String,
}

/// Events delivered by the chat transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransportEvent {
    NewMessage {
        message: InboundMessage,
    },
    OwnMessageSent {
        message: InboundMessage,
        #[serde(default)]
        media_context: Option<String>,
    },
    MessageRevoked {
        conversation_id: String,
        message_id: String,
    },
    Disconnected {
        #[serde(default)]
        reason: Option<String>,
    },
}
