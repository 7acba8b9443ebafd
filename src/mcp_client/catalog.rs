//! Tool catalog: an immutable snapshot of the tools every connected server
//! advertised.
//!
//! Provides:
//! - Lookup by qualified name (`server__tool`, or `server.tool`)
//! - Resolution of bare, misspelled, or differently-separated names
//! - Structural validation of call arguments against the input schema
//! - Conversion into model tool declarations

use std::collections::{BTreeMap, HashMap};

use super::errors::McpError;
use super::types::ToolDescriptor;
use crate::inference::types::{FunctionDefinition, ToolDefinition};

/// Separator between server and tool in qualified names. Chosen because
/// model APIs restrict function names to `[A-Za-z0-9_-]`.
pub const QUALIFIED_SEPARATOR: &str = "__";

/// Split a qualified name into `(server, tool)`.
///
/// Accepts `server__tool` and `server.tool`. Returns `None` for bare names.
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    if let Some((server, tool)) = name.split_once(QUALIFIED_SEPARATOR) {
        if !server.is_empty() && !tool.is_empty() {
            return Some((server, tool));
        }
    }
    match name.split_once('.') {
        Some((server, tool)) if !server.is_empty() && !tool.is_empty() => Some((server, tool)),
        _ => None,
    }
}

// ─── ToolCatalog ─────────────────────────────────────────────────────────────

/// Snapshot of all available tools, in server-then-advertised order.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
    /// `server__tool → index into tools`.
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from per-server tool lists.
    pub fn from_servers(servers: &BTreeMap<String, Vec<ToolDescriptor>>) -> Self {
        let mut catalog = Self::new();
        for tools in servers.values() {
            for tool in tools {
                catalog.insert(tool.clone());
            }
        }
        catalog
    }

    /// Add a tool. A later tool with the same `(server, name)` replaces the
    /// earlier one.
    pub fn insert(&mut self, tool: ToolDescriptor) {
        let key = tool.qualified_name();
        match self.index.get(&key) {
            Some(&i) => self.tools[i] = tool,
            None => {
                self.index.insert(key, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Look up a tool by `(server, tool)`.
    pub fn get(&self, server: &str, tool: &str) -> Option<&ToolDescriptor> {
        self.index
            .get(&format!("{server}{QUALIFIED_SEPARATOR}{tool}"))
            .map(|&i| &self.tools[i])
    }

    /// Whether a tool with this bare name exists on this server.
    pub fn contains(&self, server: &str, tool: &str) -> bool {
        self.get(server, tool).is_some()
    }

    /// Qualified names of all tools, in catalog order.
    pub fn qualified_names(&self) -> Vec<String> {
        self.tools.iter().map(ToolDescriptor::qualified_name).collect()
    }

    /// Distinct server names, in catalog order.
    pub fn server_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for tool in &self.tools {
            if !names.contains(&tool.server.as_str()) {
                names.push(&tool.server);
            }
        }
        names
    }

    /// Validate a call's arguments: they must be an object (or absent) and
    /// carry every field the schema lists as required.
    ///
    /// Full JSON Schema validation is left to the server.
    pub fn validate_tool_call(
        &self,
        server: &str,
        tool: &str,
        arguments: &serde_json::Value,
    ) -> Result<(), McpError> {
        let def = self.get(server, tool).ok_or(McpError::UnknownTool {
            name: format!("{server}{QUALIFIED_SEPARATOR}{tool}"),
        })?;

        let args_obj = match arguments {
            serde_json::Value::Object(map) => Some(map),
            serde_json::Value::Null => None,
            other => {
                return Err(McpError::InvalidArguments {
                    tool: tool.to_string(),
                    reason: format!("arguments must be an object, got {other}"),
                })
            }
        };

        if let Some(required) = def.input_schema.get("required").and_then(|r| r.as_array()) {
            for field_name in required.iter().filter_map(|f| f.as_str()) {
                let has_field = args_obj
                    .map(|obj| obj.contains_key(field_name))
                    .unwrap_or(false);
                if !has_field {
                    return Err(McpError::InvalidArguments {
                        tool: tool.to_string(),
                        reason: format!("missing required field: '{field_name}'"),
                    });
                }
            }
        }

        Ok(())
    }

    /// Model-facing tool declarations, named `server__tool`.
    pub fn to_tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|tool| ToolDefinition {
                r#type: "function".to_string(),
                function: FunctionDefinition {
                    name: tool.qualified_name(),
                    description: if tool.description.is_empty() {
                        format!("{} tool from the {} server", tool.name, tool.server)
                    } else {
                        tool.description.clone()
                    },
                    parameters: tool.input_schema.clone(),
                },
            })
            .collect()
    }

    /// One line per tool, for prompts: `server__tool: description`.
    pub fn describe(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("- {}: {}", t.qualified_name(), t.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ─── Tool Resolution ────────────────────────────────────────────────────────

/// Result of resolving a model-supplied tool name against the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResolution {
    /// Name found as-is.
    Exact { server: String, tool: String },

    /// Name lacked a server prefix but uniquely matched one tool.
    Unprefixed {
        server: String,
        tool: String,
        original: String,
    },

    /// Name was qualified but didn't exist; a similar tool on the same
    /// server was found via edit distance.
    Corrected {
        server: String,
        tool: String,
        original: String,
        score: f64,
    },

    /// No match. `suggestions` holds up to 3 similar qualified names.
    NotFound {
        original: String,
        suggestions: Vec<String>,
    },
}

impl ToolResolution {
    /// `(server, tool)` if resolution succeeded.
    pub fn target(&self) -> Option<(&str, &str)> {
        match self {
            Self::Exact { server, tool }
            | Self::Unprefixed { server, tool, .. }
            | Self::Corrected { server, tool, .. } => Some((server, tool)),
            Self::NotFound { .. } => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::NotFound { .. })
    }
}

impl ToolCatalog {
    /// Resolve a tool name that may be unprefixed, misspelled, or use `.`
    /// instead of `__`.
    ///
    /// Strategy (first match wins):
    /// 1. **Exact:** qualified name exists.
    /// 2. **Unprefixed:** bare name matches exactly one server's tool.
    /// 3. **Same-server fuzzy:** most similar tool on the named server with
    ///    similarity ≥ `min_similarity`.
    /// 4. **NotFound** with suggestions.
    pub fn resolve(&self, name: &str, min_similarity: f64) -> ToolResolution {
        let name = name.trim();

        let Some((server, tool)) = split_qualified(name) else {
            let candidates: Vec<&ToolDescriptor> =
                self.tools.iter().filter(|t| t.name == name).collect();
            return match candidates.as_slice() {
                [only] => ToolResolution::Unprefixed {
                    server: only.server.clone(),
                    tool: only.name.clone(),
                    original: name.to_string(),
                },
                [] => ToolResolution::NotFound {
                    original: name.to_string(),
                    suggestions: self.find_similar(name, 3),
                },
                many => ToolResolution::NotFound {
                    original: name.to_string(),
                    suggestions: many.iter().map(|t| t.qualified_name()).collect(),
                },
            };
        };

        if self.contains(server, tool) {
            return ToolResolution::Exact {
                server: server.to_string(),
                tool: tool.to_string(),
            };
        }

        let mut best: Option<(&ToolDescriptor, f64)> = None;
        for candidate in self.tools.iter().filter(|t| t.server == server) {
            let score = similarity(tool, &candidate.name);
            if score >= min_similarity && best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((candidate, score));
            }
        }

        if let Some((resolved, score)) = best {
            return ToolResolution::Corrected {
                server: resolved.server.clone(),
                tool: resolved.name.clone(),
                original: name.to_string(),
                score,
            };
        }

        ToolResolution::NotFound {
            original: name.to_string(),
            suggestions: self.find_similar(name, 3),
        }
    }

    /// Up to `max_results` qualified names most similar to `name`.
    ///
    /// Compares tool names only; the server part of `name` is ignored.
    pub fn find_similar(&self, name: &str, max_results: usize) -> Vec<String> {
        let query = split_qualified(name).map(|(_, tool)| tool).unwrap_or(name);

        let mut scored: Vec<(String, f64)> = self
            .tools
            .iter()
            .map(|t| (t.qualified_name(), similarity(query, &t.name)))
            .filter(|(_, score)| *score > 0.3)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_results);
        scored.into_iter().map(|(name, _)| name).collect()
    }
}

// ─── Edit Distance ──────────────────────────────────────────────────────────

/// Levenshtein edit distance over bytes.
fn levenshtein(a: &str, b: &str) -> usize {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    let n = b_bytes.len();

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for (i, &ac) in a_bytes.iter().enumerate() {
        curr[0] = i + 1;
        for j in 1..=n {
            let cost = usize::from(ac != b_bytes[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Normalized similarity, 0.0 (different) to 1.0 (identical).
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
