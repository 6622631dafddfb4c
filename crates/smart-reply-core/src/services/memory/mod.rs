pub mod pg_store;
pub mod store;
pub mod vector_store;
pub mod writer;

pub use pg_store::PgVectorStore;
pub use store::{partition_name, ConversationMemoryStore};
pub use vector_store::{InMemoryVectorStore, RecordFilter, ScoredRecord, VectorStore};
pub use writer::{MemoryWrite, MemoryWriter};
