use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use unicode_segmentation::UnicodeSegmentation;

use crate::models::{AggregationOutcome, AnnotatedMessage, BufferSnapshot, OutcomeStatus};
use crate::services::event_bus::{EventBus, QueueEvent};
use crate::utils::error::CoreError;

const PREVIEW_GRAPHEMES: usize = 60;

/// Messages collapsed into one processing unit, in arrival order.
#[derive(Debug, Clone)]
pub struct MessageBatch {
    pub conversation_id: String,
    pub display_name: String,
    pub messages: Vec<AnnotatedMessage>,
}

impl MessageBatch {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Bodies joined with newlines, arrival order preserved.
    pub fn aggregated_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.display_text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Media descriptions of the batch, if any message carried one.
    pub fn multimodal_context(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter_map(|m| m.multimodal_context.as_deref())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchReply {
    Replied { reply_text: String },
    Skipped { reason: String },
}

/// Flush callback. Runs once per debounce cycle on a detached task.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn process_batch(&self, batch: &MessageBatch) -> Result<BatchReply, CoreError>;
}

struct ConversationBuffer {
    generation: u64,
    display_name: String,
    messages: Vec<AnnotatedMessage>,
    started_at: DateTime<Utc>,
    expiry: DateTime<Utc>,
    owner_paused: bool,
    handler: Arc<dyn BatchHandler>,
    timer: Option<JoinHandle<()>>,
}

impl ConversationBuffer {
    fn snapshot(&self, conversation_id: &str) -> BufferSnapshot {
        let preview = self
            .messages
            .last()
            .map(|m| preview_text(&m.display_text))
            .unwrap_or_default();

        BufferSnapshot {
            conversation_id: conversation_id.to_string(),
            display_name: self.display_name.clone(),
            count: self.messages.len(),
            start_time: self.started_at,
            expiry: self.expiry,
            preview,
            owner_paused: self.owner_paused,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct QueueInner {
    buffers: Mutex<HashMap<String, ConversationBuffer>>,
    debounce: Duration,
    unit_cost: f64,
    events: EventBus,
    generations: AtomicU64,
}

/// Per-conversation debounce buffer. Every enqueue pushes the deadline out by
/// the debounce window; owner activity swaps in a longer window and pins it.
#[derive(Clone)]
pub struct SmartQueue {
    inner: Arc<QueueInner>,
}

impl SmartQueue {
    pub fn new(debounce: Duration, unit_cost: f64, events: EventBus) -> Self {
        info!("Initializing smart queue (debounce: {:?})", debounce);
        Self {
            inner: Arc::new(QueueInner {
                buffers: Mutex::new(HashMap::new()),
                debounce,
                unit_cost,
                events,
                generations: AtomicU64::new(0),
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Append to the conversation's buffer, creating it if absent, and restart
    /// the debounce timer. While owner-paused the pinned deadline is kept.
    pub fn enqueue(
        &self,
        conversation_id: &str,
        message: AnnotatedMessage,
        handler: Arc<dyn BatchHandler>,
    ) {
        {
            let mut buffers = self.inner.buffers.lock();
            let display_name = message.original.display_name().to_string();

            match buffers.get_mut(conversation_id) {
                Some(buffer) => {
                    buffer.messages.push(message);
                    buffer.display_name = display_name;
                    buffer.handler = handler;

                    if buffer.owner_paused {
                        debug!(
                            conversation_id,
                            count = buffer.messages.len(),
                            "Buffer owner-paused, keeping deadline"
                        );
                    } else {
                        self.schedule(conversation_id, buffer, self.inner.debounce);
                    }
                }
                None => {
                    let now = Utc::now();
                    let mut buffer = ConversationBuffer {
                        generation: 0,
                        display_name,
                        messages: vec![message],
                        started_at: now,
                        expiry: now,
                        owner_paused: false,
                        handler,
                        timer: None,
                    };
                    self.schedule(conversation_id, &mut buffer, self.inner.debounce);
                    buffers.insert(conversation_id.to_string(), buffer);
                }
            }

            debug!(
                conversation_id,
                count = buffers.get(conversation_id).map(|b| b.messages.len()).unwrap_or(0),
                "Message buffered"
            );
        }

        self.publish_update();
    }

    /// Drop one message from a live buffer. An emptied buffer is discarded
    /// together with its timer. Returns whether anything changed.
    pub fn remove_message(&self, conversation_id: &str, message_id: &str) -> bool {
        let changed = {
            let mut buffers = self.inner.buffers.lock();
            let Some(buffer) = buffers.get_mut(conversation_id) else {
                return false;
            };

            let before = buffer.messages.len();
            buffer.messages.retain(|m| m.id() != message_id);
            if buffer.messages.len() == before {
                return false;
            }

            if buffer.messages.is_empty() {
                if let Some(mut emptied) = buffers.remove(conversation_id) {
                    emptied.cancel_timer();
                }
                info!(conversation_id, "Buffer emptied by revoke, flush cancelled");
            }
            true
        };

        if changed {
            self.publish_update();
        }
        changed
    }

    /// Attach a media description to a message still waiting in its buffer.
    /// The message keeps its position. Returns false once the message has
    /// been flushed or revoked.
    pub fn annotate_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        description: String,
    ) -> bool {
        {
            let mut buffers = self.inner.buffers.lock();
            let Some(message) = buffers
                .get_mut(conversation_id)
                .and_then(|buffer| buffer.messages.iter_mut().find(|m| m.id() == message_id))
            else {
                debug!(conversation_id, message_id, "Message no longer buffered, description dropped");
                return false;
            };
            message.attach_media_description(description);
        }

        self.publish_update();
        true
    }

    /// Restart the timer with `extra_delay` and mark the buffer owner-paused.
    /// Returns false when there is no buffer to pause.
    pub fn pause_for_owner(&self, conversation_id: &str, extra_delay: Duration) -> bool {
        {
            let mut buffers = self.inner.buffers.lock();
            let Some(buffer) = buffers.get_mut(conversation_id) else {
                debug!(conversation_id, "No pending buffer to pause for owner");
                return false;
            };

            buffer.owner_paused = true;
            self.schedule(conversation_id, buffer, extra_delay);
            info!(
                conversation_id,
                delay_ms = extra_delay.as_millis() as u64,
                "Buffer paused for owner"
            );
        }

        self.publish_update();
        true
    }

    pub fn has_pending_buffer(&self, conversation_id: &str) -> bool {
        self.inner.buffers.lock().contains_key(conversation_id)
    }

    pub fn is_owner_paused(&self, conversation_id: &str) -> bool {
        self.inner
            .buffers
            .lock()
            .get(conversation_id)
            .map(|b| b.owner_paused)
            .unwrap_or(false)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.buffers.lock().len()
    }

    /// Current buffers, oldest first.
    pub fn snapshots(&self) -> Vec<BufferSnapshot> {
        let buffers = self.inner.buffers.lock();
        let mut snapshots: Vec<BufferSnapshot> = buffers
            .iter()
            .map(|(id, buffer)| buffer.snapshot(id))
            .collect();
        snapshots.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        snapshots
    }

    fn publish_update(&self) {
        self.inner.events.publish(QueueEvent::Updated {
            buffers: self.snapshots(),
        });
    }

    /// Cancel-and-reschedule. Must be called with the buffer map locked.
    fn schedule(&self, conversation_id: &str, buffer: &mut ConversationBuffer, delay: Duration) {
        buffer.cancel_timer();

        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
        buffer.generation = generation;
        buffer.expiry = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

        let deadline = Instant::now() + delay;
        let weak: Weak<QueueInner> = Arc::downgrade(&self.inner);
        let id = conversation_id.to_string();

        buffer.timer = Some(tokio::spawn(async move {
            sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                SmartQueue { inner }.flush(id, generation).await;
            }
        }));
    }

    /// Take the buffer out of the active set (so new messages open a fresh
    /// one), run the handler, and report exactly one outcome.
    async fn flush(&self, conversation_id: String, generation: u64) {
        let buffer = {
            let mut buffers = self.inner.buffers.lock();
            let current = buffers
                .get(&conversation_id)
                .map(|b| b.generation == generation)
                .unwrap_or(false);
            if current {
                buffers.remove(&conversation_id)
            } else {
                None
            }
        };

        let Some(mut buffer) = buffer else {
            debug!(%conversation_id, generation, "Stale timer woke, nothing to flush");
            return;
        };
        // the handle belongs to this very task; detach instead of aborting
        buffer.timer.take();

        self.publish_update();

        let batch = MessageBatch {
            conversation_id: conversation_id.clone(),
            display_name: buffer.display_name.clone(),
            messages: std::mem::take(&mut buffer.messages),
        };
        let message_count = batch.len();
        let aggregated_text = batch.aggregated_text();
        let cost_saved = message_count.saturating_sub(1) as f64 * self.inner.unit_cost;

        info!(%conversation_id, message_count, "Flushing aggregated batch");

        let result = AssertUnwindSafe(buffer.handler.process_batch(&batch))
            .catch_unwind()
            .await;

        let (status, reply_text, error) = match result {
            Ok(Ok(BatchReply::Replied { reply_text })) => {
                (OutcomeStatus::Success, Some(reply_text), None)
            }
            Ok(Ok(BatchReply::Skipped { reason })) => {
                debug!(%conversation_id, %reason, "Batch skipped");
                (OutcomeStatus::Skipped, None, None)
            }
            Ok(Err(e)) => {
                error!(%conversation_id, "Batch processing failed: {}", e);
                (OutcomeStatus::Failed, None, Some(e.to_string()))
            }
            Err(_) => {
                error!(%conversation_id, "Batch handler panicked");
                (
                    OutcomeStatus::Failed,
                    None,
                    Some("batch handler panicked".to_string()),
                )
            }
        };

        if status == OutcomeStatus::Failed {
            warn!(%conversation_id, "Batch consumed without reply");
        }

        self.inner
            .events
            .publish(QueueEvent::Processed(AggregationOutcome {
                conversation_id,
                contact_name: batch.display_name,
                message_count,
                aggregated_text,
                reply_text,
                cost_saved,
                status,
                error,
            }));
    }
}

fn preview_text(text: &str) -> String {
    let graphemes: Vec<&str> = text.graphemes(true).collect();
    if graphemes.len() <= PREVIEW_GRAPHEMES {
        return text.to_string();
    }
    let mut preview: String = graphemes[..PREVIEW_GRAPHEMES].concat();
    preview.push_str("...");
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InboundMessage, MessageKind};
    use tokio::sync::{broadcast, mpsc, Notify};
    use tokio::time::advance;

    const D: Duration = Duration::from_secs(10);

    fn msg(id: &str, body: &str) -> AnnotatedMessage {
        AnnotatedMessage::plain(InboundMessage {
            id: id.into(),
            conversation_id: "628111".into(),
            sender_id: Some("628111".into()),
            sender_name: Some("Budi".into()),
            body: body.into(),
            timestamp: Utc::now(),
            has_media: false,
            from_self: false,
            kind: MessageKind::Chat,
        })
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(Instant, Vec<String>)>>,
        fail: bool,
    }

    #[async_trait]
    impl BatchHandler for Recorder {
        async fn process_batch(&self, batch: &MessageBatch) -> Result<BatchReply, CoreError> {
            let bodies = batch.messages.iter().map(|m| m.display_text.clone()).collect();
            self.calls.lock().push((Instant::now(), bodies));
            if self.fail {
                return Err(CoreError::Reply("provider down".into()));
            }
            Ok(BatchReply::Replied {
                reply_text: format!("ok {}", batch.len()),
            })
        }
    }

    async fn next_outcome(rx: &mut broadcast::Receiver<QueueEvent>) -> AggregationOutcome {
        loop {
            if let QueueEvent::Processed(outcome) = rx.recv().await.unwrap() {
                return outcome;
            }
        }
    }

    fn setup() -> (SmartQueue, broadcast::Receiver<QueueEvent>) {
        let bus = EventBus::new(64);
        let rx = bus.subscribe();
        (SmartQueue::new(D, 0.002, bus), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_burst() {
        let (queue, mut rx) = setup();
        let handler = Arc::new(Recorder::default());
        let start = Instant::now();

        queue.enqueue("c1", msg("1", "halo"), handler.clone());
        advance(Duration::from_secs(3)).await;
        queue.enqueue("c1", msg("2", "ada stok?"), handler.clone());
        advance(Duration::from_secs(3)).await;
        queue.enqueue("c1", msg("3", "ukuran M"), handler.clone());

        let outcome = next_outcome(&mut rx).await;
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.message_count, 3);
        assert_eq!(outcome.aggregated_text, "halo\nada stok?\nukuran M");
        assert!((outcome.cost_saved - 0.004).abs() < 1e-9);
        assert_eq!(outcome.reply_text.as_deref(), Some("ok 3"));

        let calls = handler.calls.lock();
        assert_eq!(calls.len(), 1);
        let fired_after = calls[0].0 - start;
        assert!(fired_after >= Duration::from_secs(16));
        assert!(fired_after < Duration::from_millis(16_100));
        assert!(!queue.has_pending_buffer("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_extends_deadline() {
        let (queue, mut rx) = setup();
        let handler = Arc::new(Recorder::default());
        let start = Instant::now();

        queue.enqueue("c1", msg("1", "halo"), handler.clone());
        advance(Duration::from_secs(8)).await;
        assert!(queue.pause_for_owner("c1", Duration::from_millis(15_000)));
        assert!(queue.is_owner_paused("c1"));

        // a customer follow-up while paused does not pull the deadline in
        advance(Duration::from_secs(4)).await;
        queue.enqueue("c1", msg("2", "kak?"), handler.clone());

        let outcome = next_outcome(&mut rx).await;
        assert_eq!(outcome.message_count, 2);

        let fired_after = handler.calls.lock()[0].0 - start;
        assert!(fired_after >= Duration::from_secs(23));
        assert!(fired_after < Duration::from_millis(23_100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_without_buffer_is_noop() {
        let (queue, _rx) = setup();
        assert!(!queue.pause_for_owner("nobody", Duration::from_secs(15)));
        assert!(!queue.is_owner_paused("nobody"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_removing_only_message_cancels_flush() {
        let (queue, mut rx) = setup();
        let handler = Arc::new(Recorder::default());

        queue.enqueue("c1", msg("1", "oops"), handler.clone());
        assert!(queue.remove_message("c1", "1"));
        assert!(!queue.has_pending_buffer("c1"));

        advance(Duration::from_secs(30)).await;
        tokio::task::yield_now().await;

        assert!(handler.calls.lock().is_empty());
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, QueueEvent::Processed(_)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_unknown_message_is_noop() {
        let (queue, _rx) = setup();
        let handler = Arc::new(Recorder::default());
        queue.enqueue("c1", msg("1", "halo"), handler);

        assert!(!queue.remove_message("c1", "nope"));
        assert!(!queue.remove_message("c2", "1"));
        assert!(queue.has_pending_buffer("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_removal_keeps_remaining_order() {
        let (queue, mut rx) = setup();
        let handler = Arc::new(Recorder::default());

        queue.enqueue("c1", msg("1", "a"), handler.clone());
        queue.enqueue("c1", msg("2", "b"), handler.clone());
        queue.enqueue("c1", msg("3", "c"), handler.clone());
        assert!(queue.remove_message("c1", "2"));

        let outcome = next_outcome(&mut rx).await;
        assert_eq!(outcome.aggregated_text, "a\nc");
    }

    #[tokio::test(start_paused = true)]
    async fn test_annotation_keeps_arrival_position() {
        let (queue, mut rx) = setup();
        let handler = Arc::new(Recorder::default());

        queue.enqueue("c1", msg("1", "yang ini?"), handler.clone());
        queue.enqueue("c1", msg("2", "berapa?"), handler.clone());
        assert!(queue.annotate_message("c1", "1", "red bag".into()));
        assert!(!queue.annotate_message("c1", "nope", "x".into()));
        assert!(!queue.annotate_message("c2", "1", "x".into()));

        let outcome = next_outcome(&mut rx).await;
        assert_eq!(outcome.aggregated_text, "yang ini?\n[Media: red bag]\nberapa?");

        // flushed batches are not touched
        assert!(!queue.annotate_message("c1", "1", "late".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reported_as_outcome() {
        let (queue, mut rx) = setup();
        let handler = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });

        queue.enqueue("c1", msg("1", "halo"), handler.clone());
        let outcome = next_outcome(&mut rx).await;

        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert!(outcome.error.unwrap().contains("provider down"));
        assert!(outcome.reply_text.is_none());
        // consumed, not requeued
        assert!(!queue.has_pending_buffer("c1"));
    }

    struct Gated {
        started: mpsc::UnboundedSender<usize>,
        release: Notify,
    }

    #[async_trait]
    impl BatchHandler for Gated {
        async fn process_batch(&self, batch: &MessageBatch) -> Result<BatchReply, CoreError> {
            let _ = self.started.send(batch.len());
            self.release.notified().await;
            Ok(BatchReply::Skipped {
                reason: "test".into(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_during_flush_opens_fresh_buffer() {
        let (queue, mut rx) = setup();
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let gated = Arc::new(Gated {
            started: started_tx,
            release: Notify::new(),
        });

        queue.enqueue("c1", msg("1", "first"), gated.clone());
        assert_eq!(started_rx.recv().await, Some(1));

        // the in-flight batch is already out of the map
        assert!(!queue.has_pending_buffer("c1"));
        queue.enqueue("c1", msg("2", "second"), gated.clone());
        assert!(queue.has_pending_buffer("c1"));
        assert_eq!(queue.snapshots()[0].count, 1);

        gated.release.notify_one();
        let outcome = next_outcome(&mut rx).await;
        assert_eq!(outcome.aggregated_text, "first");
        assert_eq!(outcome.status, OutcomeStatus::Skipped);
        assert!(outcome.error.is_none());

        assert_eq!(started_rx.recv().await, Some(1));
        gated.release.notify_one();
        let outcome = next_outcome(&mut rx).await;
        assert_eq!(outcome.aggregated_text, "second");
    }

    #[tokio::test(start_paused = true)]
    async fn test_conversations_are_independent() {
        let (queue, mut rx) = setup();
        let handler = Arc::new(Recorder::default());

        queue.enqueue("c1", msg("1", "a"), handler.clone());
        advance(Duration::from_secs(5)).await;
        queue.enqueue("c2", msg("2", "b"), handler.clone());

        let first = next_outcome(&mut rx).await;
        let second = next_outcome(&mut rx).await;
        assert_eq!(first.conversation_id, "c1");
        assert_eq!(second.conversation_id, "c2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_contents() {
        let (queue, _rx) = setup();
        let handler = Arc::new(Recorder::default());
        let long = "x".repeat(100);

        queue.enqueue("c1", msg("1", "short"), handler.clone());
        queue.enqueue("c1", msg("2", &long), handler);

        let snapshots = queue.snapshots();
        assert_eq!(snapshots.len(), 1);
        let snap = &snapshots[0];
        assert_eq!(snap.display_name, "Budi");
        assert_eq!(snap.count, 2);
        assert!(!snap.owner_paused);
        assert_eq!(snap.preview, format!("{}...", "x".repeat(PREVIEW_GRAPHEMES)));
        assert!(snap.expiry >= snap.start_time);
    }

    #[test]
    fn test_batch_multimodal_context() {
        let mut with_media = msg("2", "ini?");
        with_media.multimodal_context = Some("photo of a bag".into());
        let batch = MessageBatch {
            conversation_id: "c".into(),
            display_name: "c".into(),
            messages: vec![msg("1", "halo"), with_media],
        };
        assert_eq!(batch.multimodal_context().as_deref(), Some("photo of a bag"));
    }
}
