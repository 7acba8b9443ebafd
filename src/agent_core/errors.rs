//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;

/// Errors that can occur during orchestration.
///
/// Most of these are recovered inside the turn and only logged. A turn
/// surfaces `Cancelled` to its caller and turns an unusable model into the
/// outcome's `error_message`.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model call failed or returned nothing usable.
    #[error("model unavailable: {reason}")]
    ModelUnavailable { reason: String },

    /// The model did not answer within the configured bound.
    #[error("model call timed out after {timeout_ms}ms")]
    ModelTimeout { timeout_ms: u64 },

    /// The tool loop hit its iteration bound. Not a failure: the turn moves
    /// on to synthesis.
    #[error("iteration limit reached ({max_iterations})")]
    IterationLimitReached { max_iterations: u32 },

    /// The turn was cancelled by its caller.
    #[error("turn cancelled")]
    Cancelled,
}

impl From<InferenceError> for AgentError {
    fn from(e: InferenceError) -> Self {
        AgentError::ModelUnavailable {
            reason: e.to_string(),
        }
    }
}
