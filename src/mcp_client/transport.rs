//! Line-delimited JSON-RPC transport.
//!
//! Handles the low-level exchange with a tool server:
//! - Writing one JSON-RPC request per line, then flushing
//! - Reading response lines until one carries the request's `id`
//! - Bounding that read by an attempt cap and a wall-clock timeout
//!
//! The transport is generic over boxed async streams so that a child
//! process's pipes and in-memory `tokio::io::duplex` pairs are
//! interchangeable.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::types::{error_codes, JsonRpcRequest, JsonRpcResponse};

/// Default number of non-matching lines tolerated before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

struct Pipes {
    writer: Option<BoxedWriter>,
    reader: BufReader<BoxedReader>,
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Bi-directional JSON-RPC transport over a pair of byte streams.
///
/// One lock guards both directions, so a request's write and the read of
/// its response are never interleaved with another request.
pub struct LineTransport {
    server_name: String,
    pipes: Mutex<Pipes>,
    next_id: AtomicU64,
    max_attempts: u32,
}

impl LineTransport {
    /// Create a transport. Request ids start from the current wall-clock
    /// time in milliseconds and increase monotonically.
    pub fn new(server_name: &str, writer: BoxedWriter, reader: BoxedReader) -> Self {
        let seed = chrono::Utc::now().timestamp_millis().max(1) as u64;
        Self {
            server_name: server_name.to_string(),
            pipes: Mutex::new(Pipes {
                writer: Some(writer),
                reader: BufReader::new(reader),
            }),
            next_id: AtomicU64::new(seed),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Allocate the next request id.
    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send a request and wait for the response carrying the same id.
    ///
    /// Lines with another id, or that are not JSON at all, are discarded;
    /// after `max_attempts` of them the call fails with
    /// `NoMatchingResponse`. The whole exchange is bounded by `timeout`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_request_id();
        self.request_with_id(id, method, params, timeout).await
    }

    /// Like [`request`](Self::request), with an id allocated by the caller
    /// through [`next_request_id`](Self::next_request_id).
    pub async fn request_with_id(
        &self,
        id: u64,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, McpError> {
        let req = JsonRpcRequest::new(id, method, params);
        let line = self.encode(&req)?;

        let mut pipes = self.pipes.lock().await;
        let exchange = async {
            self.write_line(&mut pipes, &line).await?;
            self.read_matching(&mut pipes, id).await
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    server = %self.server_name,
                    method,
                    id,
                    timeout_ms = timeout.as_millis() as u64,
                    "no response before timeout"
                );
                Err(McpError::ResponseTimeout {
                    server: self.server_name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let mut notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(params) = params {
            notification["params"] = params;
        }
        let line = self.encode(&notification)?;

        let mut pipes = self.pipes.lock().await;
        self.write_line(&mut pipes, &line).await
    }

    /// Close the write half. The peer observes EOF on its input.
    pub async fn close_writer(&self) {
        let mut pipes = self.pipes.lock().await;
        if let Some(mut writer) = pipes.writer.take() {
            let _ = writer.shutdown().await;
        }
    }

    fn encode<T: serde::Serialize>(&self, message: &T) -> Result<String, McpError> {
        let mut json = serde_json::to_string(message).map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to serialize message: {e}"),
        })?;
        json.push('\n');
        Ok(json)
    }

    async fn write_line(&self, pipes: &mut Pipes, line: &str) -> Result<(), McpError> {
        let Some(writer) = pipes.writer.as_mut() else {
            return Err(McpError::ProcessTerminated {
                server: self.server_name.clone(),
            });
        };

        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        written.map_err(|e| match e.kind() {
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => McpError::ProcessTerminated {
                server: self.server_name.clone(),
            },
            _ => McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to write request: {e}"),
            },
        })
    }

    async fn read_matching(&self, pipes: &mut Pipes, id: u64) -> Result<JsonRpcResponse, McpError> {
        let mut line_buf = String::new();
        let mut attempts = 0u32;

        while attempts < self.max_attempts {
            line_buf.clear();
            let bytes_read = pipes
                .reader
                .read_line(&mut line_buf)
                .await
                .map_err(|e| McpError::TransportError {
                    server: self.server_name.clone(),
                    reason: format!("failed to read response: {e}"),
                })?;

            if bytes_read == 0 {
                return Err(McpError::ProcessTerminated {
                    server: self.server_name.clone(),
                });
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }
            attempts += 1;

            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.id == Some(id) => return Ok(resp),
                Ok(resp) => {
                    tracing::debug!(
                        server = %self.server_name,
                        expected = id,
                        received = ?resp.id,
                        "discarding response with foreign id"
                    );
                }
                Err(_) => {
                    tracing::debug!(
                        server = %self.server_name,
                        line = %trimmed,
                        "discarding non-JSON-RPC line"
                    );
                }
            }
        }

        tracing::warn!(
            server = %self.server_name,
            id,
            attempts,
            "gave up waiting for matching response"
        );
        Err(McpError::NoMatchingResponse {
            server: self.server_name.clone(),
            attempts,
        })
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
