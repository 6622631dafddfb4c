//! Reply orchestration for aggregated customer batches.
//!
//! - `context_builder`: system prompt and owner-turn assembly
//! - `history`: merge, dedup and token trimming of prior turns
//! - `pipeline`: the flush callback run for each batch
//! - `orchestrator`: event routing between transport, queue and tracker

mod context_builder;
mod history;
pub mod orchestrator;
pub mod pipeline;

pub use context_builder::{PromptBuilder, SystemPromptComponents};
pub use history::{merge_history, transport_history, trim_to_budget};
pub use orchestrator::{ConversationOrchestrator, OrchestratorConfig, OrchestratorDeps};
pub use pipeline::{PipelineConfig, PipelineMemory, ReplyPipeline};
