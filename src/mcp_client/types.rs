//! Shared types for the tool-server client.
//!
//! JSON-RPC 2.0 message types and the tool protocol structures exchanged
//! with tool servers over stdio.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Protocol revision sent in (and expected from) the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
///
/// `id` is optional so that notifications and id-less error replies parse
/// and can be discarded as non-matching instead of failing deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Build a success response.
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn failure(id: u64, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id: Some(id),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

fn default_jsonrpc() -> String {
    "2.0".to_string()
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ─── Tool Protocol Types ─────────────────────────────────────────────────────

/// A tool as advertised by a server in its `tools/list` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertisedTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema", rename = "inputSchema", alias = "input_schema")]
    pub input_schema: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// A tool bound to the server that hosts it.
///
/// Identity is `(server, name)`; unique within one registry snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub server: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    /// Bind an advertised definition to its server.
    pub fn from_definition(server: &str, def: AdvertisedTool) -> Self {
        Self {
            server: server.to_string(),
            name: def.name,
            description: def.description,
            input_schema: def.input_schema,
        }
    }

    /// Fully qualified name, `server__tool`.
    pub fn qualified_name(&self) -> String {
        format!("{}__{}", self.server, self.name)
    }
}

/// `tools/list` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<AdvertisedTool>,
}

/// A single tool invocation routed to one server.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRequest {
    pub id: u64,
    pub server: String,
    pub tool: String,
    pub arguments: serde_json::Value,
}

/// Outcome of a tool call.
///
/// Never partially populated: either `success` with `result`, or failure
/// with `error`. Use the constructors to keep that invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub server: String,
    pub tool: String,
    pub execution_time_ms: u64,
}

impl ToolCallResult {
    pub fn ok(server: &str, tool: &str, result: serde_json::Value, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            server: server.to_string(),
            tool: tool.to_string(),
            execution_time_ms,
        }
    }

    pub fn failed(
        server: &str,
        tool: &str,
        error: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            server: server.to_string(),
            tool: tool.to_string(),
            execution_time_ms,
        }
    }

    /// Human-readable rendering used when feeding results back to the model.
    ///
    /// Text content blocks are joined; anything else is printed as JSON.
    pub fn render(&self) -> String {
        if !self.success {
            return format!("Error: {}", self.error.as_deref().unwrap_or("unknown error"));
        }
        match &self.result {
            Some(value) => content_text(value).unwrap_or_else(|| value.to_string()),
            None => String::new(),
        }
    }
}

/// Join the `text` blocks of a `{content: [...]}` result, if it has any.
pub fn content_text(value: &serde_json::Value) -> Option<String> {
    let blocks = value.get("content")?.as_array()?;
    let texts: Vec<&str> = blocks
        .iter()
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    }
}

// ─── Configuration ───────────────────────────────────────────────────────────

/// How to launch one tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Added to the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

impl ServerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        }
    }
}

/// Connection state of a configured server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Unconnected,
    Connected,
    Failed,
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServerStatus::Unconnected => "unconnected",
            ServerStatus::Connected => "connected",
            ServerStatus::Failed => "failed",
        };
        f.pad(s)
    }
}

/// `initialize` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion", alias = "protocol_version")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default, rename = "serverInfo", alias = "server_info")]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

// ─── Standard Error Codes ────────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_omits_missing_params() {
        let req = JsonRpcRequest::new(1, "tools/list", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_response_without_id_parses() {
        let json = r#"{"jsonrpc": "2.0", "method": "notifications/progress"}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert!(resp.id.is_none());
        assert!(resp.result.is_none());
    }

    #[test]
    fn test_error_response_roundtrip_shape() {
        let resp = JsonRpcResponse::failure(7, error_codes::METHOD_NOT_FOUND, "Method not found");
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["error"]["code"], -32601);
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_tool_definition_reads_input_schema() {
        let json = r#"{"name": "add", "description": "Add", "inputSchema": {"type": "object", "required": ["a"]}}"#;
        let def: AdvertisedTool = serde_json::from_str(json).unwrap();
        assert_eq!(def.input_schema["required"][0], "a");

        let bare: AdvertisedTool = serde_json::from_str(r#"{"name": "ping"}"#).unwrap();
        assert_eq!(bare.input_schema["type"], "object");
        assert!(bare.description.is_empty());
    }

    #[test]
    fn test_call_result_render() {
        let ok = ToolCallResult::ok(
            "calculator",
            "add",
            serde_json::json!({"content": [{"type": "text", "text": "2 + 3 = 5.0"}]}),
            3,
        );
        assert_eq!(ok.render(), "2 + 3 = 5.0");

        let failed = ToolCallResult::failed("ghost", "echo", "server not connected", 0);
        assert!(failed.result.is_none());
        assert_eq!(failed.render(), "Error: server not connected");
    }

    #[test]
    fn test_initialize_result_requires_protocol_version() {
        let good = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "calc", "version": "1.0"}
        });
        let parsed: InitializeResult = serde_json::from_value(good).unwrap();
        assert_eq!(parsed.server_info.unwrap().name.as_deref(), Some("calc"));

        let bad = serde_json::json!({"capabilities": {}});
        assert!(serde_json::from_value::<InitializeResult>(bad).is_err());
    }
}
