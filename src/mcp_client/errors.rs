//! Tool-server client error types.

use thiserror::Error;

/// Errors that can occur while launching, handshaking with, or calling a
/// tool server.
///
/// Launch-time variants exclude a server from the registry. Call-time
/// variants are folded into a failed `ToolCallResult` by the channel and
/// registry, so callers of `ToolRegistry::call` never see them directly.
#[derive(Debug, Error)]
pub enum McpError {
    /// The configured command could not be found on disk or on `PATH`.
    #[error("executable not found for server '{name}': {command}")]
    ExecutableNotFound { name: String, command: String },

    /// The server process failed to start for any other reason.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// No `initialize` response arrived within the handshake timeout.
    #[error("server '{name}' handshake timed out after {timeout_ms}ms")]
    HandshakeTimeout { name: String, timeout_ms: u64 },

    /// The `initialize` response could not be interpreted.
    #[error("server '{name}' sent a malformed handshake response: {reason}")]
    MalformedHandshake { name: String, reason: String },

    /// The server process exited before or during the handshake.
    #[error("server '{name}' exited during startup{stderr}")]
    ProcessExited { name: String, stderr: String },

    /// The process closed its stdout while a response was expected.
    #[error("process terminated")]
    ProcessTerminated { server: String },

    /// JSON-RPC communication error (serialization, pipe I/O).
    #[error("transport error for server '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// Server returned a JSON-RPC error response.
    #[error("[{code}] {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Only lines with foreign ids were read before the attempt cap.
    #[error("no matching response")]
    NoMatchingResponse { server: String, attempts: u32 },

    /// No response arrived before the per-call timeout.
    #[error("no matching response")]
    ResponseTimeout { server: String, timeout_ms: u64 },

    /// The server is not in the `Connected` state.
    #[error("server not connected")]
    ServerUnavailable { name: String },

    /// Tool not present in the catalog.
    #[error("unknown tool: '{name}'")]
    UnknownTool { name: String },

    /// Tool call arguments failed structural validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// A server configuration entry is unusable.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl McpError {
    /// Whether this error means the server process is gone for good.
    pub fn is_process_death(&self) -> bool {
        matches!(
            self,
            McpError::ProcessTerminated { .. } | McpError::ProcessExited { .. }
        )
    }
}
