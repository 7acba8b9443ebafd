//! Best-effort recovery of tool invocations from free text.
//!
//! Used when a model reply carries tool-call data the native parser could
//! not handle, or writes its tool calls into the message text. Kept apart
//! from the orchestrator so the heuristics can change on their own.
//!
//! Strategy, first success wins:
//! 1. the whole text as JSON: an array or object of `{server, tool, arguments}`
//!    (`name` is accepted for `tool`; qualified names are split later);
//! 2. balanced `[...]` then `{...}` substrings, each tried as step 1;
//! 3. keyword defaults from the text and the user's request, limited to tools
//!    that exist in the catalog.

use serde_json::{json, Value};

use crate::inference::tool_call_parser::json_spans;
use crate::mcp_client::catalog::QUALIFIED_SEPARATOR;
use crate::mcp_client::ToolCatalog;

use super::types::Invocation;

/// Recover invocations from `text`, falling back to keyword defaults.
pub fn recover_invocations(text: &str, user_input: &str, catalog: &ToolCatalog) -> Vec<Invocation> {
    let parsed = parse_invocations(text);
    if !parsed.is_empty() {
        tracing::info!(count = parsed.len(), "recovered tool calls from text");
        return parsed;
    }

    let defaults = keyword_defaults(text, user_input, catalog);
    if !defaults.is_empty() {
        tracing::info!(
            tool = %defaults[0].name,
            "no parseable tool calls, using keyword default"
        );
    }
    defaults
}

/// Steps 1 and 2 only: invocations written as JSON somewhere in `text`.
pub fn parse_invocations(text: &str) -> Vec<Invocation> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        let found = invocations_from_value(&value);
        if !found.is_empty() {
            return found;
        }
    }

    let spans = json_spans(text);
    let arrays = spans.iter().filter(|s| s.starts_with('['));
    let objects = spans.iter().filter(|s| s.starts_with('{'));
    for span in arrays.chain(objects) {
        if let Ok(value) = serde_json::from_str::<Value>(span) {
            let found = invocations_from_value(&value);
            if !found.is_empty() {
                return found;
            }
        }
    }

    Vec::new()
}

/// The `"name"` of a tool-call payload, read without parsing it as JSON.
pub fn payload_tool_name(raw: &str) -> Option<&str> {
    const KEY: &str = "\"name\"";
    let after_key = &raw[raw.find(KEY)? + KEY.len()..];
    let value = after_key
        .trim_start()
        .strip_prefix(':')?
        .trim_start()
        .strip_prefix('"')?;
    let end = value.find('"')?;
    Some(value[..end].trim()).filter(|name| !name.is_empty())
}

/// Step 3: the fixed keyword defaults.
fn keyword_defaults(text: &str, user_input: &str, catalog: &ToolCatalog) -> Vec<Invocation> {
    let haystack = format!("{text} {user_input}").to_lowercase();
    let words: Vec<&str> = haystack
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let has = |keys: &[&str]| words.iter().any(|w| keys.contains(w));

    let candidate = if has(&["list", "ls", "directory", "files"]) {
        Some(("filesystem", "list_directory", json!({"path": "."})))
    } else if has(&["search", "find", "web"]) {
        Some(("brave-search", "search", json!({"query": user_input.trim()})))
    } else {
        None
    };

    candidate
        .filter(|(server, tool, _)| catalog.contains(server, tool))
        .map(|(server, tool, arguments)| {
            vec![Invocation {
                call_id: None,
                name: format!("{server}{QUALIFIED_SEPARATOR}{tool}"),
                arguments,
                recovered: true,
            }]
        })
        .unwrap_or_default()
}

fn invocations_from_value(value: &Value) -> Vec<Invocation> {
    match value {
        Value::Array(items) => items.iter().filter_map(invocation_from_object).collect(),
        Value::Object(_) => {
            // `{"tool_calls": [...]}` wrappers are common.
            if let Some(inner) = value.get("tool_calls").filter(|v| v.is_array()) {
                return invocations_from_value(inner);
            }
            invocation_from_object(value).into_iter().collect()
        }
        _ => Vec::new(),
    }
}

fn invocation_from_object(value: &Value) -> Option<Invocation> {
    let obj = value.as_object()?;
    // OpenAI shape nested under "function".
    if let Some(function) = obj.get("function").filter(|f| f.is_object()) {
        return invocation_from_object(function);
    }

    let tool = obj
        .get("tool")
        .or_else(|| obj.get("name"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())?;
    let server = obj
        .get("server")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let name = match server {
        Some(server) if !tool.contains(QUALIFIED_SEPARATOR) && !tool.contains('.') => {
            format!("{server}{QUALIFIED_SEPARATOR}{tool}")
        }
        _ => tool.to_string(),
    };

    let arguments = match obj.get("arguments").or_else(|| obj.get("parameters")) {
        Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or_else(|_| json!({})),
        Some(v @ Value::Object(_)) => v.clone(),
        _ => json!({}),
    };

    Some(Invocation {
        call_id: None,
        name,
        arguments,
        recovered: true,
    })
}
