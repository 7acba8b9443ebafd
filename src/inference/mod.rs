//! Inference client: OpenAI-compatible chat completions.
//!
//! This module handles all communication with the model endpoint:
//! - Non-streaming chat completions with optional tool declarations
//! - Tool call parsing, with repair of malformed argument JSON
//! - Fallback chain management
//! - The `models` section of the agent config
//!
//! The orchestrator depends only on the [`ChatModel`] trait. Switching
//! models is a config change, not a code change.

pub mod client;
pub mod config;
pub mod errors;
pub mod model;
pub mod response;
pub mod tool_call_parser;
pub mod types;

// Re-exports for convenience
pub use client::InferenceClient;
pub use config::{ModelConfig, ModelsConfig};
pub use errors::InferenceError;
pub use model::ChatModel;
pub use types::{ChatMessage, ModelReply, Role, ToolCall, ToolDefinition};
