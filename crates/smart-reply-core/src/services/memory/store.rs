use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::vector_store::{RecordFilter, VectorStore};
use crate::models::{MemoryEntry, MemoryRecord, MemoryRole, RecalledMemory};
use crate::services::embedding_service::EmbeddingProvider;
use crate::utils::similarity::relevance_from_distance;

/// Embedding-indexed transcript, one partition per conversation.
///
/// Every operation is best-effort: remote or storage failures are logged and
/// surface as `false` / empty results, never as errors.
#[derive(Clone)]
pub struct ConversationMemoryStore {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

/// Partition name for a conversation id. ASCII alphanumerics pass through,
/// every other byte becomes `_xx` (lowercase hex), so distinct ids never
/// share a partition (`628111@c.us` -> `contact_628111_40c_2eus`).
pub fn partition_name(conversation_id: &str) -> String {
    let mut name = String::with_capacity(8 + conversation_id.len() * 3);
    name.push_str("contact_");
    for byte in conversation_id.bytes() {
        if byte.is_ascii_alphanumeric() {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("_{:02x}", byte));
        }
    }
    name
}

fn embeddable_text(text: &str, media_context: Option<&str>) -> String {
    match media_context.filter(|ctx| !ctx.trim().is_empty()) {
        Some(ctx) => format!("{}\n[Media: {}]", text, ctx),
        None => text.to_string(),
    }
}

impl ConversationMemoryStore {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    async fn embed_query(&self, text: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(text).await {
            Ok(vector) if !vector.is_empty() => Some(vector),
            Ok(_) => {
                debug!("Embedding capability returned no vector");
                None
            }
            Err(e) => {
                warn!("Embedding failed: {}", e);
                None
            }
        }
    }

    /// Append one turn. False for blank text, an empty/failed embedding, or a
    /// store failure; nothing is written in those cases.
    pub async fn embed_message(
        &self,
        conversation_id: &str,
        role: MemoryRole,
        text: &str,
        media_context: Option<&str>,
    ) -> bool {
        if text.trim().is_empty() {
            return false;
        }

        let Some(vector) = self.embed_query(&embeddable_text(text, media_context)).await else {
            return false;
        };

        let partition = partition_name(conversation_id);
        let record = MemoryRecord {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            text: text.to_string(),
            media_context: media_context.map(str::to_string),
            vector,
            timestamp: Utc::now(),
        };

        let result = match self.store.create_or_open_partition(&partition).await {
            Ok(()) => self.store.insert(&partition, vec![record]).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                debug!(conversation_id, role = role.as_str(), "Memory record stored");
                true
            }
            Err(e) => {
                warn!(conversation_id, "Failed to store memory record: {}", e);
                false
            }
        }
    }

    /// Up to `k` records nearest to `query_text`, nearest first.
    pub async fn recall_memory(
        &self,
        conversation_id: &str,
        query_text: &str,
        k: usize,
    ) -> Vec<RecalledMemory> {
        if k == 0 || query_text.trim().is_empty() {
            return Vec::new();
        }

        let partition = partition_name(conversation_id);
        match self.store.has_partition(&partition).await {
            Ok(true) => {}
            Ok(false) => return Vec::new(),
            Err(e) => {
                warn!(conversation_id, "Partition lookup failed: {}", e);
                return Vec::new();
            }
        }

        let Some(vector) = self.embed_query(query_text).await else {
            return Vec::new();
        };

        match self.store.vector_search(&partition, &vector, k).await {
            Ok(hits) => hits
                .into_iter()
                .map(|hit| RecalledMemory {
                    entry: hit.record.to_entry(),
                    relevance: relevance_from_distance(hit.distance),
                })
                .collect(),
            Err(e) => {
                warn!(conversation_id, "Vector search failed: {}", e);
                Vec::new()
            }
        }
    }

    /// The latest `limit` records, oldest first, relevance fixed at 0.
    pub async fn get_recent_history(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Vec<RecalledMemory> {
        if limit == 0 {
            return Vec::new();
        }

        let mut records = self.scan_all(conversation_id).await;
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit);
        records.reverse();

        records
            .into_iter()
            .map(|record| RecalledMemory {
                entry: record.to_entry(),
                relevance: 0.0,
            })
            .collect()
    }

    /// Delete records older than `older_than_days`. Returns how many went.
    pub async fn prune_old_memory(&self, conversation_id: &str, older_than_days: u32) -> usize {
        self.prune_partition(&partition_name(conversation_id), older_than_days)
            .await
    }

    /// Retention sweep over every partition.
    pub async fn prune_all(&self, older_than_days: u32) -> usize {
        let partitions = match self.store.list_partitions().await {
            Ok(partitions) => partitions,
            Err(e) => {
                warn!("Failed to list memory partitions: {}", e);
                return 0;
            }
        };

        let mut total = 0;
        for partition in partitions {
            total += self.prune_partition(&partition, older_than_days).await;
        }

        if total > 0 {
            info!("Pruned {} memory records older than {} days", total, older_than_days);
        }
        total
    }

    async fn prune_partition(&self, partition: &str, older_than_days: u32) -> usize {
        let Some(cutoff) = ChronoDuration::try_days(i64::from(older_than_days))
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            debug!(partition, older_than_days, "Cutoff before representable time, nothing to prune");
            return 0;
        };
        match self
            .store
            .delete(partition, &RecordFilter::older_than(cutoff))
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(partition, "Prune failed: {}", e);
                0
            }
        }
    }

    /// Irreversibly forget a contact. False when there was nothing to drop.
    pub async fn delete_contact_memory(&self, conversation_id: &str) -> bool {
        match self
            .store
            .drop_partition(&partition_name(conversation_id))
            .await
        {
            Ok(dropped) => {
                if dropped {
                    info!(conversation_id, "Contact memory deleted");
                }
                dropped
            }
            Err(e) => {
                warn!(conversation_id, "Failed to delete contact memory: {}", e);
                false
            }
        }
    }

    /// Full dump, oldest first, vectors omitted.
    pub async fn export_contact_memory(&self, conversation_id: &str) -> Vec<MemoryEntry> {
        let mut records = self.scan_all(conversation_id).await;
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        records.iter().map(MemoryRecord::to_entry).collect()
    }

    async fn scan_all(&self, conversation_id: &str) -> Vec<MemoryRecord> {
        match self
            .store
            .scan(&partition_name(conversation_id), &RecordFilter::default())
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(conversation_id, "Memory scan failed: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::memory::vector_store::InMemoryVectorStore;
    use crate::utils::error::CoreError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Deterministic embedder: a small bag-of-letters vector. Texts listed in
    /// `blank` embed to nothing.
    #[derive(Default)]
    pub(crate) struct LetterEmbedder {
        pub blank: Vec<String>,
        pub calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmbeddingProvider for LetterEmbedder {
        fn name(&self) -> &str {
            "letters"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
            self.calls.lock().push(text.to_string());
            if self.blank.iter().any(|b| b == text) {
                return Ok(Vec::new());
            }
            let mut v = vec![0.0f32; 26];
            for c in text.to_ascii_lowercase().chars() {
                if c.is_ascii_lowercase() {
                    v[(c as u8 - b'a') as usize] += 1.0;
                }
            }
            Ok(v)
        }
    }

    pub(crate) fn memory_with(embedder: LetterEmbedder) -> (ConversationMemoryStore, Arc<LetterEmbedder>) {
        let embedder = Arc::new(embedder);
        let store = ConversationMemoryStore::new(Arc::new(InMemoryVectorStore::new()), embedder.clone());
        (store, embedder)
    }

    #[tokio::test]
    async fn test_blank_text_is_not_embedded() {
        let (memory, embedder) = memory_with(LetterEmbedder::default());
        assert!(!memory.embed_message("c1", MemoryRole::User, "   ", None).await);
        assert!(embedder.calls.lock().is_empty());
        assert!(memory.export_contact_memory("c1").await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_vector_skips_write() {
        let (memory, _) = memory_with(LetterEmbedder {
            blank: vec!["hello".into()],
            ..Default::default()
        });
        assert!(!memory.embed_message("c1", MemoryRole::User, "hello", None).await);
        assert!(memory.export_contact_memory("c1").await.is_empty());
    }

    #[tokio::test]
    async fn test_media_context_is_part_of_embedded_text() {
        let (memory, embedder) = memory_with(LetterEmbedder::default());
        assert!(
            memory
                .embed_message("c1", MemoryRole::Owner, "ini kak", Some("blue bag"))
                .await
        );
        assert_eq!(embedder.calls.lock()[0], "ini kak\n[Media: blue bag]");

        let exported = memory.export_contact_memory("c1").await;
        assert_eq!(exported[0].text, "ini kak");
        assert_eq!(exported[0].media_context.as_deref(), Some("blue bag"));
    }

    #[tokio::test]
    async fn test_export_and_delete_round_trip() {
        let (memory, _) = memory_with(LetterEmbedder::default());
        let turns = [
            (MemoryRole::User, "ada stok sepatu"),
            (MemoryRole::Assistant, "ada kak"),
            (MemoryRole::Owner, "saya cek dulu"),
        ];
        for (role, text) in turns {
            assert!(memory.embed_message("c1", role, text, None).await);
        }

        let exported = memory.export_contact_memory("c1").await;
        assert_eq!(exported.len(), 3);
        for ((role, text), entry) in turns.iter().zip(exported.iter()) {
            assert_eq!(entry.role, *role);
            assert_eq!(entry.text, *text);
        }
        let json = serde_json::to_value(&exported[0]).unwrap();
        assert!(json.get("vector").is_none());

        assert!(memory.delete_contact_memory("c1").await);
        assert!(memory.recall_memory("c1", "sepatu", 5).await.is_empty());
        assert!(!memory.delete_contact_memory("c1").await);
    }

    #[tokio::test]
    async fn test_recall_ranks_by_similarity() {
        let (memory, _) = memory_with(LetterEmbedder::default());
        memory.embed_message("c1", MemoryRole::User, "zzz", None).await;
        memory.embed_message("c1", MemoryRole::User, "abc", None).await;

        let hits = memory.recall_memory("c1", "abc", 2).await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry.text, "abc");
        assert!((hits[0].relevance - 1.0).abs() < 1e-6);
        assert!(hits[1].relevance < hits[0].relevance);
        assert!(hits[1].relevance > 0.0);
    }

    #[tokio::test]
    async fn test_recall_unknown_partition_is_empty() {
        let (memory, embedder) = memory_with(LetterEmbedder::default());
        assert!(memory.recall_memory("ghost", "halo", 5).await.is_empty());
        // no partition, no embedding call
        assert!(embedder.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_recent_history_is_latest_chronological() {
        let (memory, _) = memory_with(LetterEmbedder::default());
        for text in ["one", "two", "three", "four"] {
            memory.embed_message("c1", MemoryRole::User, text, None).await;
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let recent = memory.get_recent_history("c1", 2).await;
        let texts: Vec<&str> = recent.iter().map(|r| r.entry.text.as_str()).collect();
        assert_eq!(texts, vec!["three", "four"]);
        assert!(recent.iter().all(|r| r.relevance == 0.0));
    }

    #[tokio::test]
    async fn test_prune_keeps_fresh_records() {
        let (memory, _) = memory_with(LetterEmbedder::default());
        memory.embed_message("c1", MemoryRole::User, "halo", None).await;

        assert_eq!(memory.prune_old_memory("c1", 30).await, 0);
        assert_eq!(memory.prune_all(30).await, 0);
        assert_eq!(memory.export_contact_memory("c1").await.len(), 1);
        // unknown contact is a no-op
        assert_eq!(memory.prune_old_memory("ghost", 30).await, 0);
    }

    #[tokio::test]
    async fn test_prune_removes_aged_records_once() {
        let vectors = Arc::new(InMemoryVectorStore::new());
        let memory = ConversationMemoryStore::new(vectors.clone(), Arc::new(LetterEmbedder::default()));
        memory.embed_message("c1", MemoryRole::User, "halo", None).await;

        let partition = partition_name("c1");
        vectors.create_or_open_partition(&partition).await.unwrap();
        vectors
            .insert(
                &partition,
                vec![MemoryRecord {
                    id: Uuid::new_v4().to_string(),
                    conversation_id: "c1".into(),
                    role: MemoryRole::Assistant,
                    text: "old promo".into(),
                    media_context: None,
                    vector: vec![0.5; 26],
                    timestamp: Utc::now() - ChronoDuration::days(100),
                }],
            )
            .await
            .unwrap();
        assert_eq!(memory.export_contact_memory("c1").await.len(), 2);

        assert_eq!(memory.prune_old_memory("c1", 90).await, 1);
        assert_eq!(memory.prune_old_memory("c1", 90).await, 0);
        let left = memory.export_contact_memory("c1").await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].text, "halo");
    }

    #[tokio::test]
    async fn test_prune_with_huge_window_is_noop() {
        let (memory, _) = memory_with(LetterEmbedder::default());
        memory.embed_message("c1", MemoryRole::User, "halo", None).await;

        assert_eq!(memory.prune_old_memory("c1", u32::MAX).await, 0);
        assert_eq!(memory.prune_all(u32::MAX).await, 0);
        assert_eq!(memory.export_contact_memory("c1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_lookalike_ids_are_isolated() {
        let (memory, _) = memory_with(LetterEmbedder::default());
        memory.embed_message("a.b", MemoryRole::User, "secret", None).await;
        memory.embed_message("a_b", MemoryRole::User, "other", None).await;

        let dotted = memory.export_contact_memory("a.b").await;
        assert_eq!(dotted.len(), 1);
        assert_eq!(dotted[0].text, "secret");
        assert!(memory.export_contact_memory("a-b").await.is_empty());

        assert!(memory.delete_contact_memory("a_b").await);
        assert!(memory.export_contact_memory("a_b").await.is_empty());
        assert_eq!(memory.export_contact_memory("a.b").await[0].text, "secret");
    }

    #[test]
    fn test_partition_name_is_escaped() {
        assert_eq!(partition_name("628111@c.us"), "contact_628111_40c_2eus");
        assert_eq!(partition_name("a.b"), "contact_a_2eb");
        assert_eq!(partition_name("a-b"), "contact_a_2db");
        assert_eq!(partition_name("a_b"), "contact_a_5fb");
        assert_eq!(partition_name("a_2eb"), "contact_a_5f2eb");
    }
}
