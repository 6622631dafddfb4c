pub mod conversation;
pub mod embedding_service;
pub mod event_bus;
pub mod llm_service;
pub mod memory;
pub mod owner_intercept;
pub mod smart_queue;
pub mod transport;

pub use conversation::ConversationOrchestrator;
pub use embedding_service::{build_embedding_chain, EmbeddingProvider, HttpEmbeddingProvider};
pub use event_bus::{EventBus, QueueEvent};
pub use llm_service::{build_reply_chain, HttpMediaDescriber, MediaDescriber, ReplyProvider};
pub use owner_intercept::{OwnerContext, OwnerInterceptTracker};
pub use smart_queue::{BatchHandler, BatchReply, MessageBatch, SmartQueue};
