use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::models::{InboundMessage, MemoryRole};
use crate::services::memory::{MemoryWrite, MemoryWriter};

/// Placeholder text for an owner message that only carried media.
pub const MEDIA_ONLY_TEXT: &str = "[Media attachment]";

#[derive(Debug, Clone)]
struct OwnerActivity {
    owner_message: String,
    owner_media_context: Option<String>,
    updated_at: Instant,
    pending_customer_messages: Vec<InboundMessage>,
}

impl OwnerActivity {
    fn empty() -> Self {
        Self {
            owner_message: String::new(),
            owner_media_context: None,
            updated_at: Instant::now(),
            pending_customer_messages: Vec::new(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.updated_at.elapsed() > ttl
    }

    fn is_live(&self, ttl: Duration) -> bool {
        !self.owner_message.trim().is_empty() && !self.is_expired(ttl)
    }
}

/// Snapshot handed to prompt assembly.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OwnerContext {
    pub owner_message: String,
    pub owner_media_context: Option<String>,
    pub customer_messages: Vec<InboundMessage>,
}

/// Remembers recent human-operator activity per conversation so automated
/// replies can build on what the owner said instead of contradicting it.
#[derive(Clone)]
pub struct OwnerInterceptTracker {
    activities: Arc<DashMap<String, OwnerActivity>>,
    ttl: Duration,
    memory: Option<MemoryWriter>,
}

impl OwnerInterceptTracker {
    pub fn new(ttl: Duration, memory: Option<MemoryWriter>) -> Self {
        info!("Initializing owner intercept tracker (ttl: {:?})", ttl);
        Self {
            activities: Arc::new(DashMap::new()),
            ttl,
            memory,
        }
    }

    /// Record (or overwrite) the owner's latest message; queued customer
    /// messages are kept. The memory write is queued, never awaited.
    pub fn on_owner_message(
        &self,
        conversation_id: &str,
        message: &InboundMessage,
        media_context: Option<String>,
    ) {
        let text = if message.body.trim().is_empty() && (message.has_media || media_context.is_some())
        {
            MEDIA_ONLY_TEXT.to_string()
        } else {
            message.body.clone()
        };

        {
            let mut activity = self
                .activities
                .entry(conversation_id.to_string())
                .or_insert_with(OwnerActivity::empty);
            activity.owner_message = text.clone();
            activity.owner_media_context = media_context.clone();
            activity.updated_at = Instant::now();
        }

        debug!(conversation_id, "Owner activity recorded");

        if let Some(memory) = &self.memory {
            memory.submit(MemoryWrite {
                conversation_id: conversation_id.to_string(),
                role: MemoryRole::Owner,
                text,
                media_context,
            });
        }
    }

    /// Remember what the customer said so a later owner reply has context.
    pub fn track_customer_message(&self, conversation_id: &str, message: &InboundMessage) {
        let ttl = self.ttl;
        let mut activity = self
            .activities
            .entry(conversation_id.to_string())
            .or_insert_with(OwnerActivity::empty);

        if activity.is_expired(ttl) {
            *activity = OwnerActivity::empty();
        }
        activity.pending_customer_messages.push(message.clone());
    }

    pub fn has_owner_activity(&self, conversation_id: &str) -> bool {
        self.get_owner_context(conversation_id).is_some()
    }

    /// Fresh owner context, or `None`. Expired entries are removed on read.
    pub fn get_owner_context(&self, conversation_id: &str) -> Option<OwnerContext> {
        let ttl = self.ttl;
        let context = {
            let activity = self.activities.get(conversation_id)?;
            if activity.is_expired(ttl) {
                None
            } else if activity.is_live(ttl) {
                Some(OwnerContext {
                    owner_message: activity.owner_message.clone(),
                    owner_media_context: activity.owner_media_context.clone(),
                    customer_messages: activity.pending_customer_messages.clone(),
                })
            } else {
                return None;
            }
        };

        if context.is_none() {
            self.activities
                .remove_if(conversation_id, |_, activity| activity.is_expired(ttl));
            debug!(conversation_id, "Owner activity expired, removed");
        }
        context
    }

    pub fn clear_chat(&self, conversation_id: &str) {
        if self.activities.remove(conversation_id).is_some() {
            debug!(conversation_id, "Owner activity cleared");
        }
    }

    /// Drop every entry older than the TTL. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let ttl = self.ttl;
        let start_len = self.activities.len();
        self.activities.retain(|_, activity| !activity.is_expired(ttl));
        let count = start_len.saturating_sub(self.activities.len());

        if count > 0 {
            info!("Cleaned up {} expired owner activities", count);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracker.cleanup_expired();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageKind;
    use chrono::Utc;
    use tokio::time::advance;

    const TTL: Duration = Duration::from_millis(300_000);

    fn message(id: &str, body: &str, from_self: bool) -> InboundMessage {
        InboundMessage {
            id: id.into(),
            conversation_id: "c1".into(),
            sender_id: None,
            sender_name: None,
            body: body.into(),
            timestamp: Utc::now(),
            has_media: false,
            from_self,
            kind: MessageKind::Chat,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_expires_without_sweep() {
        let tracker = OwnerInterceptTracker::new(TTL, None);
        tracker.on_owner_message("c1", &message("o1", "saya bantu ya kak", true), None);
        assert!(tracker.has_owner_activity("c1"));

        advance(TTL + Duration::from_millis(1)).await;
        assert!(!tracker.has_owner_activity("c1"));
        // lazily removed on read
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_expired() {
        let tracker = OwnerInterceptTracker::new(TTL, None);
        tracker.on_owner_message("c1", &message("o1", "halo", true), None);
        tracker.track_customer_message("c2", &message("m1", "kak?", false));

        advance(Duration::from_secs(60)).await;
        assert_eq!(tracker.cleanup_expired(), 0);

        advance(TTL).await;
        assert_eq!(tracker.cleanup_expired(), 2);
        assert!(!tracker.has_owner_activity("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_runs_on_interval() {
        let tracker = OwnerInterceptTracker::new(TTL, None);
        tracker.on_owner_message("c1", &message("o1", "halo", true), None);
        let sweeper = tracker.spawn_sweeper(Duration::from_secs(60));

        tokio::time::sleep(TTL + Duration::from_secs(61)).await;
        assert_eq!(tracker.len(), 0);
        sweeper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_customer_messages_alone_are_not_activity() {
        let tracker = OwnerInterceptTracker::new(TTL, None);
        tracker.track_customer_message("c1", &message("m1", "ada stok?", false));
        assert!(!tracker.has_owner_activity("c1"));
        assert!(tracker.get_owner_context("c1").is_none());
        // still held for a later owner reply
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_owner_message_keeps_pending_customer_messages() {
        let tracker = OwnerInterceptTracker::new(TTL, None);
        tracker.track_customer_message("c1", &message("m1", "ada stok?", false));
        tracker.track_customer_message("c1", &message("m2", "ukuran M", false));
        tracker.on_owner_message("c1", &message("o1", "ada kak", true), None);
        tracker.on_owner_message("c1", &message("o2", "warna hitam ya", true), None);

        let context = tracker.get_owner_context("c1").unwrap();
        assert_eq!(context.owner_message, "warna hitam ya");
        let bodies: Vec<&str> = context
            .customer_messages
            .iter()
            .map(|m| m.body.as_str())
            .collect();
        assert_eq!(bodies, vec!["ada stok?", "ukuran M"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_owner_message_refreshes_ttl() {
        let tracker = OwnerInterceptTracker::new(TTL, None);
        tracker.on_owner_message("c1", &message("o1", "halo", true), None);
        advance(Duration::from_secs(200)).await;
        tracker.on_owner_message("c1", &message("o2", "masih ada?", true), None);
        advance(Duration::from_secs(200)).await;
        assert!(tracker.has_owner_activity("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_only_owner_message() {
        let tracker = OwnerInterceptTracker::new(TTL, None);
        let mut photo = message("o1", "", true);
        photo.has_media = true;
        tracker.on_owner_message("c1", &photo, Some("catalog photo".into()));

        let context = tracker.get_owner_context("c1").unwrap();
        assert_eq!(context.owner_message, MEDIA_ONLY_TEXT);
        assert_eq!(context.owner_media_context.as_deref(), Some("catalog photo"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_chat_and_snapshot_isolation() {
        let tracker = OwnerInterceptTracker::new(TTL, None);
        tracker.on_owner_message("c1", &message("o1", "halo", true), None);
        let snapshot = tracker.get_owner_context("c1").unwrap();

        tracker.clear_chat("c1");
        assert!(!tracker.has_owner_activity("c1"));
        assert_eq!(snapshot.owner_message, "halo");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_pending_list_reset_on_track() {
        let tracker = OwnerInterceptTracker::new(TTL, None);
        tracker.track_customer_message("c1", &message("m1", "old", false));
        advance(TTL + Duration::from_secs(1)).await;
        tracker.track_customer_message("c1", &message("m2", "new", false));
        tracker.on_owner_message("c1", &message("o1", "halo", true), None);

        let context = tracker.get_owner_context("c1").unwrap();
        assert_eq!(context.customer_messages.len(), 1);
        assert_eq!(context.customer_messages[0].body, "new");
    }
}
