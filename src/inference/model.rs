//! The model seam the orchestrator talks to.

use async_trait::async_trait;

use super::errors::InferenceError;
use super::types::{ChatMessage, ModelReply, ToolDefinition};

/// A chat model that answers a conversation, optionally with tool calls.
///
/// [`super::InferenceClient`] is the HTTP implementation. Tests drive the
/// orchestrator with scripted implementations.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ModelReply, InferenceError>;

    /// Human-readable name of the model currently answering.
    fn name(&self) -> String {
        "model".to_string()
    }
}
