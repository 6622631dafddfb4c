use std::collections::HashSet;

use crate::models::chat::ChatMessage;
use crate::models::{InboundMessage, RecalledMemory};
use crate::utils::token_estimator::estimate_tokens;

/// Semantic hits first, then recency hits; exact-text duplicates dropped
/// (first occurrence wins). Entries equal to `exclude_text` are skipped.
pub fn merge_history(
    semantic: Vec<RecalledMemory>,
    recent: Vec<RecalledMemory>,
    exclude_text: &str,
) -> Vec<RecalledMemory> {
    let mut seen: HashSet<String> = HashSet::new();
    if !exclude_text.is_empty() {
        seen.insert(exclude_text.to_string());
    }

    semantic
        .into_iter()
        .chain(recent)
        .filter(|memory| seen.insert(memory.entry.text.clone()))
        .collect()
}

/// Drop the oldest entries until the estimated token total fits `max_tokens`.
pub fn trim_to_budget(mut history: Vec<RecalledMemory>, max_tokens: usize) -> Vec<RecalledMemory> {
    let mut total: usize = history.iter().map(|m| estimate_tokens(&m.entry.text)).sum();

    while total > max_tokens && !history.is_empty() {
        let oldest = history
            .iter()
            .enumerate()
            .min_by_key(|(_, m)| m.entry.timestamp)
            .map(|(index, _)| index)
            .unwrap_or(0);
        let removed = history.remove(oldest);
        total = total.saturating_sub(estimate_tokens(&removed.entry.text));
    }

    history
}

pub fn to_chat_messages(history: &[RecalledMemory]) -> Vec<ChatMessage> {
    history.iter().map(RecalledMemory::to_chat_message).collect()
}

/// Transport history (used when memory is off): drop the batch's own
/// messages, map sides, keep the newest turns within budget.
pub fn transport_history(
    messages: Vec<InboundMessage>,
    batch_ids: &HashSet<&str>,
    max_tokens: usize,
) -> Vec<ChatMessage> {
    let mut turns: Vec<ChatMessage> = messages
        .into_iter()
        .filter(|m| !batch_ids.contains(m.id.as_str()) && !m.body.trim().is_empty())
        .map(|m| {
            if m.from_self {
                ChatMessage::assistant(m.body)
            } else {
                ChatMessage::user(m.body)
            }
        })
        .collect();

    let mut total: usize = turns.iter().map(ChatMessage::estimate_tokens).sum();
    while total > max_tokens && !turns.is_empty() {
        let removed = turns.remove(0);
        total = total.saturating_sub(removed.estimate_tokens());
    }
    turns
}
