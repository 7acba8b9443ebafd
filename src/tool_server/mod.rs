//! Server side of the tool protocol.
//!
//! [`serve`] reads one JSON-RPC request per line and answers `initialize`,
//! `tools/list`, and `tools/call` by delegating to a [`ToolHandler`]. It is
//! what the `calculator-server` binary runs over its stdio, and what tests
//! run in-process over `tokio::io::duplex` pipes.

pub mod calculator;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::mcp_client::types::{error_codes, AdvertisedTool, ServerInfo, PROTOCOL_VERSION};

pub use calculator::CalculatorServer;

/// Why a tool invocation did not produce a normal result.
#[derive(Debug, Error)]
pub enum ToolFault {
    /// The tool ran and reports a failure to the caller (`isError: true`).
    #[error("{0}")]
    Reported(String),

    /// No tool by this name.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The handler itself broke; answered with a JSON-RPC internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The tools one server exposes.
pub trait ToolHandler: Send + Sync {
    fn server_info(&self) -> ServerInfo;

    fn tools(&self) -> Vec<AdvertisedTool>;

    /// Run a tool and return its text output.
    fn call(&self, name: &str, arguments: &serde_json::Value) -> Result<String, ToolFault>;
}

/// Answer requests from `reader` on `writer` until `reader` reaches EOF.
///
/// Lines that are not JSON are skipped, as are notifications (messages
/// without an `id`). Unknown methods get `-32601`.
pub async fn serve<R, W, H>(reader: R, mut writer: W, handler: H) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    H: ToolHandler,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable line");
                continue;
            }
        };

        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let Some(id) = request.get("id").filter(|id| !id.is_null()).cloned() else {
            tracing::debug!(method, "notification received");
            continue;
        };

        tracing::info!(method, %id, "request received");
        let params = request.get("params").cloned().unwrap_or(serde_json::Value::Null);

        let response = match dispatch(&handler, method, &params) {
            Ok(result) => serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err((code, message)) => {
                tracing::warn!(method, code, %message, "request failed");
                serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": code, "message": message},
                })
            }
        };

        let mut out = response.to_string();
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
    }

    tracing::info!("input closed, tool server stopping");
    Ok(())
}

fn dispatch<H: ToolHandler>(
    handler: &H,
    method: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, (i32, String)> {
    match method {
        "initialize" => Ok(serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "serverInfo": handler.server_info(),
        })),
        "ping" => Ok(serde_json::json!({})),
        "tools/list" => Ok(serde_json::json!({"tools": handler.tools()})),
        "tools/call" => {
            let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
            let empty = serde_json::json!({});
            let arguments = params.get("arguments").unwrap_or(&empty);
            match handler.call(name, arguments) {
                Ok(text) => Ok(text_result(&text, false)),
                Err(fault @ (ToolFault::Reported(_) | ToolFault::UnknownTool(_))) => {
                    Ok(text_result(&fault.to_string(), true))
                }
                Err(fault @ ToolFault::Internal(_)) => {
                    Err((error_codes::INTERNAL_ERROR, fault.to_string()))
                }
            }
        }
        other => Err((
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        )),
    }
}

fn text_result(text: &str, is_error: bool) -> serde_json::Value {
    let mut result = serde_json::json!({
        "content": [{"type": "text", "text": text}],
    });
    if is_error {
        result["isError"] = serde_json::Value::Bool(true);
    }
    result
}
