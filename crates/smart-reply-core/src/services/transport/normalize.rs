//! Gateway webhook payloads (Baileys / Evolution-API shape) -> `TransportEvent`.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::debug;

use crate::models::{InboundMessage, MessageKind, TransportEvent};

/// Accepts either an already-normalized `TransportEvent` or a raw gateway
/// payload. Unknown or irrelevant payloads yield no events.
pub fn parse_webhook(payload: Value) -> Vec<TransportEvent> {
    if let Ok(event) = serde_json::from_value::<TransportEvent>(payload.clone()) {
        return vec![event];
    }
    normalize_gateway_payload(&payload)
}

pub fn normalize_gateway_payload(payload: &Value) -> Vec<TransportEvent> {
    let event = payload["event"]
        .as_str()
        .unwrap_or("")
        .to_ascii_lowercase()
        .replace('_', ".");
    let data = &payload["data"];

    match event.as_str() {
        "messages.upsert" => records(data).filter_map(message_event).collect(),
        "messages.delete" => records(data)
            .filter_map(|record| {
                let key = if record["key"].is_object() { &record["key"] } else { record };
                Some(TransportEvent::MessageRevoked {
                    conversation_id: key["remoteJid"].as_str()?.to_string(),
                    message_id: key["id"].as_str()?.to_string(),
                })
            })
            .collect(),
        "connection.update" => match data["state"].as_str() {
            Some("close") => vec![TransportEvent::Disconnected {
                reason: data["statusReason"]
                    .as_i64()
                    .map(|code| format!("status {}", code))
                    .or_else(|| data["reason"].as_str().map(str::to_string)),
            }],
            _ => Vec::new(),
        },
        // echoes of messages this service sent through the gateway API
        "send.message" => Vec::new(),
        other => {
            debug!("Ignoring gateway event '{}'", other);
            Vec::new()
        }
    }
}

fn records(data: &Value) -> impl Iterator<Item = &Value> {
    let items: Vec<&Value> = match data {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        single => match single["messages"].as_array() {
            Some(items) => items.iter().collect(),
            None => vec![single],
        },
    };
    items.into_iter()
}

fn message_event(record: &Value) -> Option<TransportEvent> {
    let protocol = &record["message"]["protocolMessage"];
    if protocol.is_object() {
        let is_revoke = protocol["type"].as_str() == Some("REVOKE") || protocol["type"].as_i64() == Some(0);
        if !is_revoke {
            return None;
        }
        return Some(TransportEvent::MessageRevoked {
            conversation_id: record["key"]["remoteJid"].as_str()?.to_string(),
            message_id: protocol["key"]["id"].as_str()?.to_string(),
        });
    }

    let message = message_from_record(record)?;
    if message.from_self {
        Some(TransportEvent::OwnMessageSent {
            message,
            media_context: None,
        })
    } else {
        Some(TransportEvent::NewMessage { message })
    }
}

fn classify(remote_jid: &str, record: &Value) -> MessageKind {
    if remote_jid == "status@broadcast" {
        MessageKind::Status
    } else if remote_jid.ends_with("@broadcast") || remote_jid.ends_with("@newsletter") {
        MessageKind::Broadcast
    } else if remote_jid.ends_with("@g.us") {
        MessageKind::Group
    } else if record["messageStubType"].is_number() || !record["message"].is_object() {
        MessageKind::System
    } else {
        MessageKind::Chat
    }
}

fn text_of(message: &Value) -> Option<&str> {
    message["conversation"]
        .as_str()
        .or_else(|| message["extendedTextMessage"]["text"].as_str())
        .or_else(|| message["imageMessage"]["caption"].as_str())
        .or_else(|| message["videoMessage"]["caption"].as_str())
        .or_else(|| message["documentMessage"]["caption"].as_str())
}

fn has_media(message: &Value) -> bool {
    [
        "imageMessage",
        "videoMessage",
        "audioMessage",
        "documentMessage",
        "stickerMessage",
    ]
    .iter()
    .any(|kind| message[*kind].is_object())
}

fn timestamp_of(record: &Value) -> DateTime<Utc> {
    let secs = match &record["messageTimestamp"] {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    };
    secs.and_then(|s| Utc.timestamp_opt(s, 0).single())
        .unwrap_or_else(Utc::now)
}

/// One stored/pushed gateway message record -> `InboundMessage`.
pub fn message_from_record(record: &Value) -> Option<InboundMessage> {
    let key = &record["key"];
    let remote_jid = key["remoteJid"].as_str()?;
    let id = key["id"].as_str()?;
    let from_self = key["fromMe"].as_bool().unwrap_or(false);

    let participant = key["participant"].as_str().unwrap_or(remote_jid);
    let sender_id = participant.split('@').next().unwrap_or(participant).to_string();
    let sender_name = record["pushName"]
        .as_str()
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string);

    let message = &record["message"];

    Some(InboundMessage {
        id: id.to_string(),
        conversation_id: remote_jid.to_string(),
        sender_id: Some(sender_id),
        sender_name,
        body: text_of(message).unwrap_or("").to_string(),
        timestamp: timestamp_of(record),
        has_media: has_media(message),
        from_self,
        kind: classify(remote_jid, record),
    })
}
