//! Input analysis for the agent loop.
//!
//! Decides whether a user request needs tools. The model is asked a YES/NO
//! question; its answer is parsed by [`parse_yes_no`]. When the model fails
//! or answers ambiguously, [`needs_tools_heuristic`] decides.

use crate::mcp_client::ToolCatalog;

/// Words that signal a tool-backed request.
const TOOL_KEYWORDS: &[&str] = &[
    // filesystem
    "list", "ls", "directory", "directories", "folder", "folders", "file", "files", "read",
    "write", "save", "create", "mkdir",
    // search
    "search", "find", "web", "lookup", "google", "news",
    // database
    "query", "database", "databases", "db", "sql", "table", "tables", "schema", "describe",
    "select",
    // arithmetic
    "calculate", "calculator", "compute", "add", "sum", "plus", "multiply", "times", "product",
    "divide", "divided",
    // retrieval
    "rag", "documents", "knowledge",
];

/// Lowercased alphanumeric words of `text`.
fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Deterministic keyword check. Defaults to `false`.
///
/// Also fires on inline arithmetic such as `12 * 4`.
pub fn needs_tools_heuristic(input: &str) -> bool {
    if words(input).any(|w| TOOL_KEYWORDS.contains(&w.as_str())) {
        return true;
    }
    let has_digit = input.chars().any(|c| c.is_ascii_digit());
    let has_operator = input.chars().any(|c| matches!(c, '+' | '*' | '/' | '×' | '÷'));
    has_digit && has_operator
}

/// Whether `input` gives any reason to consult the model about tools:
/// a keyword hit, or a server or tool name from the catalog.
pub fn has_tool_signal(input: &str, catalog: &ToolCatalog) -> bool {
    if needs_tools_heuristic(input) {
        return true;
    }
    let mentioned: Vec<String> = words(input).collect();
    catalog.tools().iter().any(|t| {
        mentioned
            .iter()
            .any(|w| *w == t.name.to_lowercase() || *w == t.server.to_lowercase())
    })
}

/// Parse the model's answer to the YES/NO classification question.
///
/// Accepts `YES`/`NO` and the older `tools`/`direct` vocabulary. Returns
/// `None` when both or neither appear.
pub fn parse_yes_no(answer: &str) -> Option<bool> {
    let mut yes = false;
    let mut no = false;
    for w in words(answer) {
        match w.as_str() {
            "yes" | "tools" => yes = true,
            "no" | "direct" => no = true,
            _ => {}
        }
    }
    match (yes, no) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    }
}
