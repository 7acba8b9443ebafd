//! Agent Core: orchestration layer.
//!
//! Submodules:
//! - `orchestrator`: Per-turn state machine (analyze, answer or run tools, summarize)
//! - `analysis`: Does a request need tools?
//! - `recovery`: Tool invocations recovered from free text
//! - `tool_router`: Dispatches invocations to the tool registry
//! - `conversation`: Conversation history and windowing
//! - `prompts`: Per-phase prompts and trace narration
//! - `types`: Shared types across the agent core
//! - `errors`: Agent-level error types

pub mod analysis;
pub mod conversation;
pub mod errors;
pub mod orchestrator;
pub mod prompts;
pub mod recovery;
pub mod tool_router;
pub mod types;

// Re-exports for convenience
pub use conversation::ConversationManager;
pub use errors::AgentError;
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use tool_router::ToolRouter;
pub use types::{AgentEvent, ConversationState, Invocation, Phase, TraceEntry, TurnOutcome};
