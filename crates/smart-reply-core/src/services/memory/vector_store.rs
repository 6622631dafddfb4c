use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::warn;

use crate::models::MemoryRecord;
use crate::utils::error::CoreError;
use crate::utils::similarity::l2_distance;

/// Row selection for scan/delete. Empty filter selects everything.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub older_than: Option<DateTime<Utc>>,
}

impl RecordFilter {
    pub fn older_than(cutoff: DateTime<Utc>) -> Self {
        Self {
            older_than: Some(cutoff),
        }
    }

    pub fn matches(&self, record: &MemoryRecord) -> bool {
        self.older_than.map_or(true, |cutoff| record.timestamp < cutoff)
    }
}

#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    /// L2 distance, 0.0 = identical
    pub distance: f32,
}

/// Per-conversation partitioned vector storage.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_or_open_partition(&self, partition: &str) -> Result<(), CoreError>;

    async fn has_partition(&self, partition: &str) -> Result<bool, CoreError>;

    async fn insert(&self, partition: &str, records: Vec<MemoryRecord>) -> Result<(), CoreError>;

    /// Up to `k` nearest records, nearest first.
    async fn vector_search(
        &self,
        partition: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>, CoreError>;

    async fn scan(
        &self,
        partition: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<MemoryRecord>, CoreError>;

    /// Returns the number of deleted records.
    async fn delete(&self, partition: &str, filter: &RecordFilter) -> Result<usize, CoreError>;

    /// Returns false when the partition did not exist.
    async fn drop_partition(&self, partition: &str) -> Result<bool, CoreError>;

    async fn list_partitions(&self) -> Result<Vec<String>, CoreError>;
}

/// Process-local store; brute-force L2 search over a partition.
#[derive(Clone, Default)]
pub struct InMemoryVectorStore {
    partitions: Arc<DashMap<String, Vec<MemoryRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_or_open_partition(&self, partition: &str) -> Result<(), CoreError> {
        self.partitions.entry(partition.to_string()).or_default();
        Ok(())
    }

    async fn has_partition(&self, partition: &str) -> Result<bool, CoreError> {
        Ok(self.partitions.contains_key(partition))
    }

    async fn insert(&self, partition: &str, records: Vec<MemoryRecord>) -> Result<(), CoreError> {
        let mut rows = self
            .partitions
            .get_mut(partition)
            .ok_or_else(|| CoreError::Store(format!("Partition {} not open", partition)))?;
        rows.extend(records);
        Ok(())
    }

    async fn vector_search(
        &self,
        partition: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>, CoreError> {
        let Some(rows) = self.partitions.get(partition) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredRecord> = rows
            .iter()
            .filter_map(|record| match l2_distance(&record.vector, vector) {
                Ok(distance) => Some(ScoredRecord {
                    record: record.clone(),
                    distance,
                }),
                Err(e) => {
                    warn!(partition, record_id = %record.id, "Skipping record: {}", e);
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k);
        Ok(scored)
    }

    async fn scan(
        &self,
        partition: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<MemoryRecord>, CoreError> {
        Ok(self
            .partitions
            .get(partition)
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, partition: &str, filter: &RecordFilter) -> Result<usize, CoreError> {
        let Some(mut rows) = self.partitions.get_mut(partition) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !filter.matches(r));
        Ok(before - rows.len())
    }

    async fn drop_partition(&self, partition: &str) -> Result<bool, CoreError> {
        Ok(self.partitions.remove(partition).is_some())
    }

    async fn list_partitions(&self) -> Result<Vec<String>, CoreError> {
        Ok(self.partitions.iter().map(|e| e.key().clone()).collect())
    }
}
