//! Shared types for the agent core.
//!
//! The per-turn conversation state threaded through the orchestrator's
//! transition functions, the trace it accumulates, and the progress events
//! it emits.

use serde::{Deserialize, Serialize};

use crate::inference::types::ChatMessage;
use crate::mcp_client::types::{content_text, ToolCallResult};

// ─── Phases ─────────────────────────────────────────────────────────────────

/// Orchestration phase. A turn moves
/// `AnalyzeInput → {DirectResponse | ModelWithTools} → [ExecuteTools ⇄ ModelWithTools]* → FinalResponse → Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    AnalyzeInput,
    DirectResponse,
    ModelWithTools,
    ExecuteTools,
    FinalResponse,
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::AnalyzeInput => "analyze_input",
            Phase::DirectResponse => "direct_response",
            Phase::ModelWithTools => "model_with_tools",
            Phase::ExecuteTools => "execute_tools",
            Phase::FinalResponse => "final_response",
            Phase::Done => "done",
        };
        f.write_str(s)
    }
}

// ─── Invocations & Trace ────────────────────────────────────────────────────

/// One tool invocation requested by the model, not yet resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    /// The model's tool call id. `None` for recovered invocations.
    pub call_id: Option<String>,
    /// Tool name as requested, e.g. `calculator__add` or `calculator.add`.
    pub name: String,
    pub arguments: serde_json::Value,
    /// Synthesized by best-effort recovery rather than a native tool call.
    pub recovered: bool,
}

/// The record of one executed (or rejected) invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Position of the invocation in the model's request.
    pub index: usize,
    /// Tool-loop iteration the invocation belongs to (1-based).
    pub iteration: u32,
    pub call_id: Option<String>,
    /// Resolved server, or the requested name's server part if unresolved.
    pub server: String,
    pub tool: String,
    pub arguments: serde_json::Value,
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub recovered: bool,
    pub execution_time_ms: u64,
}

impl TraceEntry {
    pub fn from_result(
        index: usize,
        iteration: u32,
        invocation: &Invocation,
        result: ToolCallResult,
    ) -> Self {
        Self {
            index,
            iteration,
            call_id: invocation.call_id.clone(),
            server: result.server,
            tool: result.tool,
            arguments: invocation.arguments.clone(),
            success: result.success,
            result: result.result,
            error: result.error,
            recovered: invocation.recovered,
            execution_time_ms: result.execution_time_ms,
        }
    }

    /// `server.tool`, for prompts and narration.
    pub fn label(&self) -> String {
        format!("{}.{}", self.server, self.tool)
    }

    /// Text fed back to the model: the result's text, or `Error: ...`.
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

// ─── Conversation State ─────────────────────────────────────────────────────

/// Everything one turn knows. Transition functions take it by value and
/// hand back the next state with the next phase.
#[derive(Debug, Clone)]
pub struct ConversationState {
    /// Prior turns' messages (user/assistant), oldest first.
    pub history: Vec<ChatMessage>,
    pub user_input: String,
    /// Working prompt for the tool loop: system, windowed history, the user
    /// message, then assistant tool requests and tool results.
    pub messages: Vec<ChatMessage>,
    /// Completed tool-loop iterations.
    pub iteration: u32,
    pub trace: Vec<TraceEntry>,
    pub needs_tools: bool,
    pub final_response: Option<String>,
    pub error_message: Option<String>,
    /// Invocations requested by the latest model reply.
    pub pending: Vec<Invocation>,
    /// Tool-call payloads from the latest reply that nothing could be
    /// recovered from. Each becomes a failed trace entry.
    pub unparseable: Vec<String>,
    pub phase: Phase,
    /// Model round-trips made this turn, of every kind.
    pub model_calls: u32,
}

impl ConversationState {
    pub fn new(history: Vec<ChatMessage>, user_input: impl Into<String>) -> Self {
        Self {
            history,
            user_input: user_input.into(),
            messages: Vec::new(),
            iteration: 0,
            trace: Vec::new(),
            needs_tools: false,
            final_response: None,
            error_message: None,
            pending: Vec::new(),
            unparseable: Vec::new(),
            phase: Phase::AnalyzeInput,
            model_calls: 0,
        }
    }

    /// A final answer or an error has been decided; no more tools run.
    pub fn is_terminal(&self) -> bool {
        self.final_response.as_deref().is_some_and(|r| !r.is_empty())
            || self.error_message.as_deref().is_some_and(|e| !e.is_empty())
    }

    pub fn into_outcome(self) -> TurnOutcome {
        let mut transcript = self.history;
        transcript.push(ChatMessage::user(self.user_input));
        if let Some(answer) = self.final_response.as_deref().filter(|a| !a.is_empty()) {
            transcript.push(ChatMessage::assistant(answer));
        }
        TurnOutcome {
            used_tools: !self.trace.is_empty(),
            final_response: self.final_response,
            error_message: self.error_message,
            trace: self.trace,
            iterations: self.iteration,
            model_calls: self.model_calls,
            transcript,
        }
    }
}

/// What a turn produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub final_response: Option<String>,
    /// Set only when the model backend was unusable.
    pub error_message: Option<String>,
    /// Every invocation in request order, including failures.
    pub trace: Vec<TraceEntry>,
    pub iterations: u32,
    pub model_calls: u32,
    pub used_tools: bool,
    /// Prior history + this turn's user message + the answer; seeds the next turn.
    pub transcript: Vec<ChatMessage>,
}

impl TurnOutcome {
    /// Text to show the user.
    pub fn display_text(&self) -> &str {
        self.final_response
            .as_deref()
            .or(self.error_message.as_deref())
            .unwrap_or("")
    }
}

// ─── Events ─────────────────────────────────────────────────────────────────

/// Progress records emitted while a turn runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Step {
        phase: Phase,
        message: String,
    },
    ToolStarted {
        server: String,
        tool: String,
        arguments: serde_json::Value,
        iteration: u32,
    },
    ToolFinished {
        entry: TraceEntry,
    },
    Final {
        response: String,
        used_tools: bool,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invocation() -> Invocation {
        Invocation {
            call_id: Some("call_1".into()),
            name: "calculator__add".into(),
            arguments: json!({"a": 2, "b": 3}),
            recovered: false,
        }
    }

    #[test]
    fn test_trace_entry_from_result() {
        let result = ToolCallResult::ok(
            "calculator",
            "add",
            json!({"content": [{"type": "text", "text": "2 + 3 = 5.0"}]}),
            4,
        );
        let entry = TraceEntry::from_result(0, 1, &invocation(), result);
        assert!(entry.success);
        assert_eq!(entry.label(), "calculator.add");
        assert_eq!(entry.render(), "2 + 3 = 5.0");
        assert_eq!(entry.call_id.as_deref(), Some("call_1"));

        let failed = ToolCallResult::failed("ghost", "x", "server not connected", 0);
        let entry = TraceEntry::from_result(1, 1, &invocation(), failed);
        assert_eq!(entry.render(), "Error: server not connected");
    }

    #[test]
    fn test_terminal_state() {
        let mut state = ConversationState::new(Vec::new(), "hi");
        assert!(!state.is_terminal());
        state.final_response = Some(String::new());
        assert!(!state.is_terminal());
        state.error_message = Some("model down".into());
        assert!(state.is_terminal());
    }

    #[test]
    fn test_outcome_transcript() {
        let mut state = ConversationState::new(vec![ChatMessage::user("earlier")], "now");
        state.final_response = Some("answer".into());
        let outcome = state.into_outcome();
        assert_eq!(outcome.transcript.len(), 3);
        assert_eq!(outcome.transcript[2].text(), "answer");
        assert!(!outcome.used_tools);
        assert_eq!(outcome.display_text(), "answer");
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = AgentEvent::Step {
            phase: Phase::ExecuteTools,
            message: "running 1 tool".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step");
        assert_eq!(json["phase"], "execute_tools");
    }
}
