//! Tool call parsing: turns raw model output into `ToolCall` structs.
//!
//! Native OpenAI-style tool calls carry their arguments as a JSON-encoded
//! string, which local models regularly get wrong. Arguments go through
//! [`repair_malformed_tool_call_json`] before a call is given up on.
//!
//! [`find_balanced_end`] and [`json_spans`] locate JSON embedded in free
//! text, for models that write tool calls into their message content.

use uuid::Uuid;

use super::errors::InferenceError;
use super::types::ToolCall;

// ─── Native JSON Parsing ─────────────────────────────────────────────────────

/// Parse one native tool call.
///
/// A missing id is generated. Empty arguments mean `{}`. Arguments that are
/// not valid JSON are repaired when possible.
pub fn parse_native_json_tool_call(
    id: Option<&str>,
    name: &str,
    arguments_json: &str,
) -> Result<ToolCall, InferenceError> {
    let call_id = id
        .filter(|id| !id.is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("call_{}", Uuid::new_v4()));

    if name.trim().is_empty() {
        return Err(InferenceError::ToolCallParseError {
            raw_response: arguments_json.to_string(),
            reason: "empty tool name".into(),
        });
    }

    let arguments = if arguments_json.trim().is_empty() {
        serde_json::json!({})
    } else {
        match serde_json::from_str::<serde_json::Value>(arguments_json) {
            Ok(v) => v,
            Err(e) => repair_malformed_tool_call_json(arguments_json).ok_or_else(|| {
                InferenceError::ToolCallParseError {
                    raw_response: arguments_json.to_string(),
                    reason: format!("invalid JSON arguments: {e}"),
                }
            })?,
        }
    };

    // Some models send the arguments object as a JSON string inside the string.
    let arguments = match arguments {
        serde_json::Value::String(inner) => serde_json::from_str(&inner)
            .unwrap_or(serde_json::Value::String(inner)),
        other => other,
    };

    Ok(ToolCall {
        id: call_id,
        name: name.trim().to_string(),
        arguments,
    })
}

// ─── Embedded JSON ───────────────────────────────────────────────────────────

/// Find the index of the bracket closing the `[` or `{` at `start`.
///
/// Brackets inside double-quoted strings are ignored, so
/// `{"path": "a}b"}` closes at the last byte.
pub fn find_balanced_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let open = *bytes.get(start)?;
    let close = match open {
        b'[' => b']',
        b'{' => b'}',
        _ => return None,
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escape_next {
            escape_next = false;
            continue;
        }
        if in_string {
            match b {
                b'\\' => escape_next = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Outermost balanced `[...]` and `{...}` spans in `text`, in order.
pub fn json_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut pos = 0;
    while pos < text.len() {
        let Some(offset) = text[pos..].find(['[', '{']) else {
            break;
        };
        let start = pos + offset;
        match find_balanced_end(text, start) {
            Some(end) => {
                spans.push(&text[start..=end]);
                pos = end + 1;
            }
            None => pos = start + 1,
        }
    }
    spans
}

// ─── Malformed JSON Repair ──────────────────────────────────────────────────

/// Raw arguments from a server-side tool-call parse failure.
///
/// Ollama answers HTTP 500 with
/// `{"error":{"message":"error parsing tool call: raw='<args>', err=<why>"}}`
/// when a model emits arguments it cannot parse. The tool name is not part of
/// the message.
pub fn failed_tool_call_arguments(error_body: &str) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_str(error_body).ok()?;
    let message = parsed.pointer("/error/message")?.as_str()?;
    if !message.contains("error parsing tool call") {
        return None;
    }

    let (_, after) = message.split_once("raw='")?;
    let end = after.rfind("', err=")?;
    Some(after[..end].to_string())
}

/// Repair steps, applied cumulatively until the text parses.
const REPAIRS: &[fn(&str) -> String] = &[
    collapse_doubled_quotes,
    drop_trailing_commas,
    close_open_braces,
    strip_control_characters,
];

/// Best-effort repair of malformed tool-call arguments.
///
/// Handles what local models get wrong most: a doubled opening quote
/// (`"dest":""/tmp/x"`), trailing commas, missing closing braces, and raw
/// control characters.
pub fn repair_malformed_tool_call_json(raw: &str) -> Option<serde_json::Value> {
    let parse = |text: &str| serde_json::from_str::<serde_json::Value>(text).ok();
    if let Some(value) = parse(raw) {
        return Some(value);
    }

    let mut text = raw.to_string();
    for repair in REPAIRS {
        text = repair(&text);
        if let Some(value) = parse(&text) {
            return Some(value);
        }
    }
    None
}

/// `:""x` → `:"x`. A real empty string (`:""` before `,`, `}` or the end) is kept.
fn collapse_doubled_quotes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(at) = rest.find(":\"\"") {
        let after = &rest[at + 3..];
        out.push_str(&rest[..at + 2]);
        if after.is_empty() || after.starts_with([',', '}']) {
            out.push('"');
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

/// Drop commas that only precede whitespace and a closing `}` or `]`.
fn drop_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for (i, ch) in input.char_indices() {
        if ch == ',' {
            let next = input[i + 1..].trim_start().chars().next();
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

/// Append a `}` for every brace left open outside of strings.
fn close_open_braces(input: &str) -> String {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;
    for ch in input.chars() {
        match (in_string, escaped, ch) {
            (true, true, _) => escaped = false,
            (true, false, '\\') => escaped = true,
            (_, _, '"') => in_string = !in_string,
            (false, _, '{') => depth += 1,
            (false, _, '}') => depth -= 1,
            _ => {}
        }
    }

    let mut out = input.to_string();
    out.extend(std::iter::repeat('}').take(depth.max(0) as usize));
    out
}

/// Remove control characters other than `\n`, `\r` and `\t`.
fn strip_control_characters(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
