use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::{FromRow, Postgres, QueryBuilder};
use tracing::{debug, info};

use super::vector_store::{RecordFilter, ScoredRecord, VectorStore};
use crate::database::DbPool;
use crate::models::{MemoryRecord, MemoryRole};
use crate::utils::error::CoreError;

const SCHEMA: &[&str] = &[
    "CREATE EXTENSION IF NOT EXISTS vector",
    r#"CREATE TABLE IF NOT EXISTS memory_partitions (
        name TEXT PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS conversation_memory (
        id TEXT PRIMARY KEY,
        partition TEXT NOT NULL REFERENCES memory_partitions(name) ON DELETE CASCADE,
        conversation_id TEXT NOT NULL,
        role TEXT NOT NULL,
        text TEXT NOT NULL,
        media_context TEXT,
        embedding vector NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_conversation_memory_partition ON conversation_memory (partition, created_at)",
];

#[derive(FromRow)]
struct MemoryRow {
    id: String,
    conversation_id: String,
    role: String,
    text: String,
    media_context: Option<String>,
    embedding: Vector,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ScoredRow {
    #[sqlx(flatten)]
    row: MemoryRow,
    distance: f64,
}

impl TryFrom<MemoryRow> for MemoryRecord {
    type Error = CoreError;

    fn try_from(row: MemoryRow) -> Result<Self, Self::Error> {
        let role = MemoryRole::parse(&row.role)
            .ok_or_else(|| CoreError::Store(format!("Unknown memory role '{}'", row.role)))?;
        Ok(MemoryRecord {
            id: row.id,
            conversation_id: row.conversation_id,
            role,
            text: row.text,
            media_context: row.media_context,
            vector: row.embedding.to_vec(),
            timestamp: row.created_at,
        })
    }
}

/// Postgres + pgvector store. Partitions are rows of `memory_partitions`;
/// records live in one table keyed by partition, searched with L2 (`<->`).
#[derive(Clone)]
pub struct PgVectorStore {
    pool: DbPool,
}

impl PgVectorStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), CoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(self.pool.get_pool()).await?;
        }
        info!("Conversation memory schema ready");
        Ok(())
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &RecordFilter) {
    if let Some(cutoff) = filter.older_than {
        builder.push(" AND created_at < ").push_bind(cutoff);
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn create_or_open_partition(&self, partition: &str) -> Result<(), CoreError> {
        sqlx::query("INSERT INTO memory_partitions (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(partition)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    async fn has_partition(&self, partition: &str) -> Result<bool, CoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM memory_partitions WHERE name = $1)",
        )
        .bind(partition)
        .fetch_one(self.pool.get_pool())
        .await?;
        Ok(exists)
    }

    async fn insert(&self, partition: &str, records: Vec<MemoryRecord>) -> Result<(), CoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO conversation_memory \
             (id, partition, conversation_id, role, text, media_context, embedding, created_at) ",
        );
        builder.push_values(records, |mut row, record| {
            row.push_bind(record.id)
                .push_bind(partition.to_string())
                .push_bind(record.conversation_id)
                .push_bind(record.role.as_str())
                .push_bind(record.text)
                .push_bind(record.media_context)
                .push_bind(Vector::from(record.vector))
                .push_bind(record.timestamp);
        });

        builder.build().execute(self.pool.get_pool()).await?;
        Ok(())
    }

    async fn vector_search(
        &self,
        partition: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>, CoreError> {
        let rows = sqlx::query_as::<_, ScoredRow>(
            r#"SELECT id, conversation_id, role, text, media_context, embedding, created_at,
                      (embedding <-> $2) AS distance
               FROM conversation_memory
               WHERE partition = $1
               ORDER BY embedding <-> $2
               LIMIT $3"#,
        )
        .bind(partition)
        .bind(Vector::from(vector.to_vec()))
        .bind(k as i64)
        .persistent(false)
        .fetch_all(self.pool.get_pool())
        .await?;

        debug!(partition, "Vector search returned {} rows", rows.len());

        rows.into_iter()
            .map(|scored| {
                Ok(ScoredRecord {
                    distance: scored.distance as f32,
                    record: MemoryRecord::try_from(scored.row)?,
                })
            })
            .collect()
    }

    async fn scan(
        &self,
        partition: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<MemoryRecord>, CoreError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id, conversation_id, role, text, media_context, embedding, created_at \
             FROM conversation_memory WHERE partition = ",
        );
        builder.push_bind(partition);
        push_filter(&mut builder, filter);
        builder.push(" ORDER BY created_at ASC");

        let rows = builder
            .build_query_as::<MemoryRow>()
            .fetch_all(self.pool.get_pool())
            .await?;

        rows.into_iter().map(MemoryRecord::try_from).collect()
    }

    async fn delete(&self, partition: &str, filter: &RecordFilter) -> Result<usize, CoreError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("DELETE FROM conversation_memory WHERE partition = ");
        builder.push_bind(partition);
        push_filter(&mut builder, filter);

        let result = builder.build().execute(self.pool.get_pool()).await?;
        Ok(result.rows_affected() as usize)
    }

    async fn drop_partition(&self, partition: &str) -> Result<bool, CoreError> {
        let result = sqlx::query("DELETE FROM memory_partitions WHERE name = $1")
            .bind(partition)
            .execute(self.pool.get_pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_partitions(&self) -> Result<Vec<String>, CoreError> {
        let names = sqlx::query_scalar::<_, String>("SELECT name FROM memory_partitions ORDER BY name")
            .fetch_all(self.pool.get_pool())
            .await?;
        Ok(names)
    }
}
