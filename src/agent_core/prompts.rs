//! Prompts for each orchestration phase, and the deterministic narration
//! used when the model can't summarize.

use crate::mcp_client::ToolCatalog;

use super::tool_router::truncate_utf8;
use super::types::TraceEntry;

/// Bytes of each tool result quoted in synthesis prompts and narration.
const RESULT_EXCERPT_BYTES: usize = 600;

pub fn analysis_prompt(catalog: &ToolCatalog) -> String {
    format!(
        "You analyze user requests to decide whether tools are needed.\n\n\
         Available tools: {}\n\n\
         Respond with \"YES\" if tools are needed, \"NO\" if a direct response is sufficient.\n\n\
         Examples:\n\
         - \"List files in the current directory\" -> YES\n\
         - \"Search for the latest AI news\" -> YES\n\
         - \"What is 12 times 7?\" -> YES\n\
         - \"Hello, how are you?\" -> NO\n\
         - \"Explain machine learning\" -> NO\n\n\
         Respond with only YES or NO.",
        catalog.qualified_names().join(", ")
    )
}

pub const DIRECT_PROMPT: &str = "You are a helpful AI assistant. Provide clear, accurate, and \
     helpful responses. Be conversational, friendly, and concise.";

pub fn tools_prompt(catalog: &ToolCatalog) -> String {
    format!(
        "You are a helpful AI assistant with access to tools.\n\n\
         Available tools:\n{}\n\n\
         Call tools when they help answer the request. You may call several tools at \
         once when they are independent. Use the results you receive; when you have \
         enough information, answer the user directly without calling more tools. \
         NEVER invent tool results.",
        catalog.describe()
    )
}

pub const SYNTHESIS_PROMPT: &str = "You are a helpful AI assistant. Answer the user's request \
     using the tool results provided. Be clear and concise. If a tool failed, say so \
     honestly. Only report what actually happened.";

/// The synthesis request: the user's words plus every trace entry.
pub fn synthesis_request(user_input: &str, trace: &[TraceEntry]) -> String {
    let results = trace
        .iter()
        .map(|entry| {
            if entry.success {
                format!(
                    "- {} {} -> {}",
                    entry.label(),
                    entry.arguments,
                    truncate_utf8(&entry.render(), RESULT_EXCERPT_BYTES)
                )
            } else {
                format!(
                    "- {} {} -> FAILED: {}",
                    entry.label(),
                    entry.arguments,
                    entry.error.as_deref().unwrap_or("unknown error")
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!("The user asked: \"{user_input}\"\n\nTool results:\n{results}")
}

/// A plain-text account of the trace, for when synthesis is unavailable.
pub fn narrate_trace(trace: &[TraceEntry]) -> String {
    if trace.is_empty() {
        return "I wasn't able to produce an answer for this request.".to_string();
    }

    let lines: Vec<String> = trace
        .iter()
        .map(|entry| {
            if entry.success {
                format!(
                    "- {} returned: {}",
                    entry.label(),
                    truncate_utf8(entry.render().trim(), RESULT_EXCERPT_BYTES)
                )
            } else {
                format!(
                    "- tool {} failed: {}",
                    entry.label(),
                    entry.error.as_deref().unwrap_or("unknown error")
                )
            }
        })
        .collect();

    format!("Here is what the tools reported:\n{}", lines.join("\n"))
}
