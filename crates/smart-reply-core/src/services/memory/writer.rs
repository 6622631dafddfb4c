use flume::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, error, info, warn};

use super::store::ConversationMemoryStore;
use crate::models::MemoryRole;

/// One best-effort memory write.
#[derive(Debug, Clone)]
pub struct MemoryWrite {
    pub conversation_id: String,
    pub role: MemoryRole,
    pub text: String,
    pub media_context: Option<String>,
}

/// Non-blocking front of the memory store. Writes are queued and drained by a
/// single background worker, so per-conversation order is kept; a full queue
/// or a failed embed is logged and the write dropped.
#[derive(Clone)]
pub struct MemoryWriter {
    sender: Sender<MemoryWrite>,
}

impl MemoryWriter {
    pub fn spawn(store: ConversationMemoryStore, capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        info!("Initializing MemoryWriter: queue={}", capacity);

        tokio::spawn(async move {
            Self::worker_loop(store, receiver).await;
        });

        Self { sender }
    }

    /// Fire-and-forget.
    pub fn submit(&self, write: MemoryWrite) {
        match self.sender.try_send(write) {
            Ok(()) => {}
            Err(TrySendError::Full(write)) => {
                warn!(
                    conversation_id = %write.conversation_id,
                    "Memory write queue full, dropping {} turn",
                    write.role.as_str()
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                error!("Memory writer worker is gone, dropping write");
            }
        }
    }

    async fn worker_loop(store: ConversationMemoryStore, receiver: Receiver<MemoryWrite>) {
        info!("Memory writer worker started");

        while let Ok(write) = receiver.recv_async().await {
            let stored = store
                .embed_message(
                    &write.conversation_id,
                    write.role,
                    &write.text,
                    write.media_context.as_deref(),
                )
                .await;

            if !stored {
                debug!(
                    conversation_id = %write.conversation_id,
                    "Memory write skipped"
                );
            }
        }

        info!("Memory writer worker shutting down (channel closed)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::store::tests::{memory_with, LetterEmbedder};
    use std::time::Duration;

    async fn wait_for_records(store: &ConversationMemoryStore, id: &str, n: usize) -> bool {
        for _ in 0..100 {
            if store.export_contact_memory(id).await.len() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_writes_land_in_order() {
        let (store, _) = memory_with(LetterEmbedder::default());
        let writer = MemoryWriter::spawn(store.clone(), 16);

        for text in ["first", "second"] {
            writer.submit(MemoryWrite {
                conversation_id: "c1".into(),
                role: MemoryRole::User,
                text: text.into(),
                media_context: None,
            });
        }

        assert!(wait_for_records(&store, "c1", 2).await);
        let texts: Vec<String> = store
            .export_contact_memory("c1")
            .await
            .into_iter()
            .map(|e| e.text)
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_failed_write_does_not_stop_worker() {
        let (store, _) = memory_with(LetterEmbedder {
            blank: vec!["broken".into()],
            ..Default::default()
        });
        let writer = MemoryWriter::spawn(store.clone(), 16);

        for text in ["broken", "fine"] {
            writer.submit(MemoryWrite {
                conversation_id: "c1".into(),
                role: MemoryRole::Owner,
                text: text.into(),
                media_context: None,
            });
        }

        assert!(wait_for_records(&store, "c1", 1).await);
        assert_eq!(store.export_contact_memory("c1").await[0].text, "fine");
    }
}
