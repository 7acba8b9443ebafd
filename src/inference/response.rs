//! Parsing of non-streaming chat completion responses.

use serde::Deserialize;

use super::errors::InferenceError;
use super::tool_call_parser::parse_native_json_tool_call;
use super::types::ModelReply;

/// Parse a `POST /chat/completions` response body into a [`ModelReply`].
///
/// Tool calls whose arguments cannot be parsed (even after repair) do not
/// fail the reply; their raw text is kept in `unparsed_tool_calls`.
pub fn parse_completion_response(body: &str) -> Result<ModelReply, InferenceError> {
    #[derive(Deserialize)]
    struct CompletionResponse {
        choices: Vec<CompletionChoice>,
    }

    #[derive(Deserialize)]
    struct CompletionChoice {
        message: CompletionMessage,
    }

    #[derive(Deserialize)]
    struct CompletionMessage {
        content: Option<String>,
        /// Chain-of-thought from reasoning models. Not part of the answer.
        #[allow(dead_code)]
        reasoning: Option<String>,
        tool_calls: Option<Vec<CompletionToolCall>>,
    }

    #[derive(Deserialize)]
    struct CompletionToolCall {
        id: Option<String>,
        function: CompletionFunction,
    }

    #[derive(Deserialize)]
    struct CompletionFunction {
        #[serde(default)]
        name: String,
        /// Normally a JSON-encoded string; some servers send the object itself.
        #[serde(default)]
        arguments: serde_json::Value,
    }

    let resp: CompletionResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::MalformedResponse {
            reason: format!("failed to parse completion response: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::MalformedResponse {
            reason: "empty choices array".into(),
        })?;

    let content = choice.message.content.filter(|c| !c.trim().is_empty());

    let mut reply = ModelReply {
        content,
        ..ModelReply::default()
    };

    for tc in choice.message.tool_calls.unwrap_or_default() {
        let raw_args = match tc.function.arguments {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        match parse_native_json_tool_call(tc.id.as_deref(), &tc.function.name, &raw_args) {
            Ok(call) => reply.tool_calls.push(call),
            Err(e) => {
                tracing::warn!(
                    tool = %tc.function.name,
                    error = %e,
                    "unparseable tool call in model response"
                );
                reply.unparsed_tool_calls.push(format!(
                    r#"{{"name": "{}", "arguments": {}}}"#,
                    tc.function.name, raw_args
                ));
            }
        }
    }

    Ok(reply)
}
