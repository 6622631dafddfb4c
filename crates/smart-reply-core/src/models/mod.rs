pub mod chat;
pub mod memory;
pub mod message;
pub mod outcome;

pub use chat::ChatMessage;
pub use memory::{MemoryEntry, MemoryRecord, MemoryRole, RecalledMemory};
pub use message::{AnnotatedMessage, InboundMessage, MediaPayload, MessageKind, TransportEvent};
pub use outcome::{AggregationOutcome, BufferSnapshot, OutcomeStatus};
