//! Orchestration state machine: one conversation turn.
//!
//! Phases (see [`Phase`]):
//! 1. **AnalyzeInput** decides whether the request needs tools
//! 2. **DirectResponse** answers without tools, or
//! 3. **ModelWithTools** lets the model request tool calls, which
//!    **ExecuteTools** runs and feeds back, until the model answers or the
//!    iteration bound is hit
//! 4. **FinalResponse** makes sure there is an answer, synthesizing one from
//!    the trace if needed
//!
//! Each transition takes the [`ConversationState`] by value and returns it
//! with the next phase. Tool infrastructure failures never end a turn; only
//! an unusable model produces an `error_message`.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use crate::inference::types::{ChatMessage, ModelReply, ToolCall, ToolDefinition};
use crate::inference::ChatModel;
use crate::mcp_client::{ToolCatalog, ToolProvider};

use super::analysis::{has_tool_signal, needs_tools_heuristic, parse_yes_no};
use super::conversation::{windowed, DEFAULT_HISTORY_WINDOW};
use super::errors::AgentError;
use super::prompts;
use super::recovery::{parse_invocations, recover_invocations};
use super::tool_router::{emit, result_messages, ToolRouter};
use super::types::{AgentEvent, ConversationState, Invocation, Phase, TurnOutcome};

// ─── Settings ───────────────────────────────────────────────────────────────

/// Upper bound accepted for `max_iterations`.
pub const MAX_ITERATIONS_CEILING: u32 = 10;

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Tool-loop iterations before an answer is forced (1..=10).
    pub max_iterations: u32,
    /// Run the invocations of one model reply concurrently.
    pub parallel_tool_calls: bool,
    /// Prior messages shown to the model.
    pub history_window: usize,
    /// Bound on every model call.
    pub model_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            parallel_tool_calls: true,
            history_window: DEFAULT_HISTORY_WINDOW,
            model_timeout: Duration::from_secs(120),
        }
    }
}

impl OrchestratorSettings {
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.clamp(1, MAX_ITERATIONS_CEILING);
        self
    }
}

// ─── Orchestrator ───────────────────────────────────────────────────────────

/// Runs conversation turns against a model and a tool provider.
///
/// Holds no per-turn state; one instance can serve many turns, including
/// concurrent ones.
pub struct Orchestrator {
    model: Arc<dyn ChatModel>,
    router: ToolRouter,
    tools: Arc<dyn ToolProvider>,
    settings: OrchestratorSettings,
}

/// Read-only context shared by the transitions of one turn.
struct Turn<'a> {
    catalog: ToolCatalog,
    definitions: Vec<ToolDefinition>,
    events: Option<&'a mpsc::Sender<AgentEvent>>,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: Arc<dyn ToolProvider>,
        settings: OrchestratorSettings,
    ) -> Self {
        let settings = OrchestratorSettings {
            max_iterations: settings.max_iterations.clamp(1, MAX_ITERATIONS_CEILING),
            ..settings
        };
        Self {
            model,
            router: ToolRouter::new(tools.clone(), settings.parallel_tool_calls),
            tools,
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run one turn. `history` holds prior turns' messages.
    pub async fn run_turn(&self, history: Vec<ChatMessage>, user_input: &str) -> TurnOutcome {
        self.drive(history, user_input, None).await
    }

    /// Run one turn, reporting progress on `events`.
    ///
    /// The receiver should be drained while the turn runs; a full channel
    /// holds the turn up.
    pub async fn run_turn_with_events(
        &self,
        history: Vec<ChatMessage>,
        user_input: &str,
        events: mpsc::Sender<AgentEvent>,
    ) -> TurnOutcome {
        self.drive(history, user_input, Some(&events)).await
    }

    /// Run one turn unless `cancel` fires first.
    ///
    /// On cancellation everything gathered so far is dropped. In-flight tool
    /// calls are abandoned; their channels stay usable. Dropping the sender
    /// without sending does not cancel.
    pub async fn run_turn_cancellable(
        &self,
        history: Vec<ChatMessage>,
        user_input: &str,
        cancel: oneshot::Receiver<()>,
    ) -> Result<TurnOutcome, AgentError> {
        until_cancelled(self.drive(history, user_input, None), cancel).await
    }

    /// [`run_turn_with_events`](Self::run_turn_with_events) that `cancel`
    /// can abandon. No `Final` or `Error` event is sent for a cancelled turn.
    pub async fn run_turn_with_events_cancellable(
        &self,
        history: Vec<ChatMessage>,
        user_input: &str,
        events: mpsc::Sender<AgentEvent>,
        cancel: oneshot::Receiver<()>,
    ) -> Result<TurnOutcome, AgentError> {
        until_cancelled(self.drive(history, user_input, Some(&events)), cancel).await
    }

    async fn drive(
        &self,
        history: Vec<ChatMessage>,
        user_input: &str,
        events: Option<&mpsc::Sender<AgentEvent>>,
    ) -> TurnOutcome {
        let started = Instant::now();
        let catalog = self.tools.catalog().await;
        let turn = Turn {
            definitions: catalog.to_tool_definitions(),
            catalog,
            events,
        };

        let mut state = ConversationState::new(history, user_input);
        let mut phase = Phase::AnalyzeInput;

        while phase != Phase::Done {
            state.phase = phase;
            let (next_state, next) = match phase {
                Phase::AnalyzeInput => self.analyze_input(state, &turn).await,
                Phase::DirectResponse => self.direct_response(state, &turn).await,
                Phase::ModelWithTools => self.model_with_tools(state, &turn).await,
                Phase::ExecuteTools => self.execute_tools(state, &turn).await,
                Phase::FinalResponse => self.final_response(state, &turn).await,
                Phase::Done => (state, Phase::Done),
            };
            tracing::debug!(from = %phase, to = %next, "phase transition");
            state = next_state;
            phase = next;
        }
        state.phase = Phase::Done;

        match (&state.final_response, &state.error_message) {
            (_, Some(message)) => {
                emit(turn.events, AgentEvent::Error { message: message.clone() }).await;
            }
            (Some(response), None) => {
                emit(
                    turn.events,
                    AgentEvent::Final {
                        response: response.clone(),
                        used_tools: !state.trace.is_empty(),
                    },
                )
                .await;
            }
            (None, None) => {}
        }

        tracing::info!(
            needs_tools = state.needs_tools,
            iterations = state.iteration,
            tool_calls = state.trace.len(),
            model_calls = state.model_calls,
            failed = state.error_message.is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "turn complete"
        );
        state.into_outcome()
    }

    // ─── Transitions ────────────────────────────────────────────────────

    async fn analyze_input(
        &self,
        mut state: ConversationState,
        turn: &Turn<'_>,
    ) -> (ConversationState, Phase) {
        step(turn, Phase::AnalyzeInput, "Analyzing request").await;

        if turn.catalog.is_empty() {
            tracing::info!("no tools available, answering directly");
            state.needs_tools = false;
            return (state, Phase::DirectResponse);
        }

        if !has_tool_signal(&state.user_input, &turn.catalog) {
            tracing::info!("no tool signal in request, answering directly");
            state.needs_tools = false;
            return (state, Phase::DirectResponse);
        }

        let messages = vec![
            ChatMessage::system(prompts::analysis_prompt(&turn.catalog)),
            ChatMessage::user(format!("User request: {}", state.user_input)),
        ];
        let decision = match self.call_model(&mut state, &messages, None).await {
            Ok(reply) => parse_yes_no(reply.content_text().unwrap_or("")),
            Err(e) => {
                tracing::warn!(error = %e, "analysis call failed, using keyword heuristic");
                None
            }
        };

        state.needs_tools = decision.unwrap_or_else(|| needs_tools_heuristic(&state.user_input));
        tracing::info!(
            needs_tools = state.needs_tools,
            from_model = decision.is_some(),
            "input analyzed"
        );

        let next = if state.needs_tools {
            Phase::ModelWithTools
        } else {
            Phase::DirectResponse
        };
        (state, next)
    }

    async fn direct_response(
        &self,
        mut state: ConversationState,
        turn: &Turn<'_>,
    ) -> (ConversationState, Phase) {
        step(turn, Phase::DirectResponse, "Generating response").await;

        let mut messages = vec![ChatMessage::system(prompts::DIRECT_PROMPT)];
        messages.extend(windowed(&state.history, self.settings.history_window));
        messages.push(ChatMessage::user(state.user_input.clone()));

        match self.call_model(&mut state, &messages, None).await {
            Ok(reply) => match reply.content_text() {
                Some(text) => state.final_response = Some(text.to_string()),
                None => {
                    state.error_message = Some("The model returned an empty response.".into());
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "direct response failed");
                state.error_message = Some(format!("The model is unavailable: {e}"));
            }
        }
        (state, Phase::Done)
    }

    async fn model_with_tools(
        &self,
        mut state: ConversationState,
        turn: &Turn<'_>,
    ) -> (ConversationState, Phase) {
        step(
            turn,
            Phase::ModelWithTools,
            &format!("Consulting model (iteration {})", state.iteration + 1),
        )
        .await;

        if state.messages.is_empty() {
            state.messages.push(ChatMessage::system(prompts::tools_prompt(&turn.catalog)));
            state
                .messages
                .extend(windowed(&state.history, self.settings.history_window));
            state.messages.push(ChatMessage::user(state.user_input.clone()));
        }

        let messages = state.messages.clone();
        let reply = match self
            .call_model(&mut state, &messages, Some(turn.definitions.as_slice()))
            .await
        {
            Ok(reply) => reply,
            Err(e) if state.trace.is_empty() => {
                tracing::warn!(error = %e, "tool-enabled call failed, answering directly");
                return (state, Phase::DirectResponse);
            }
            Err(e) => {
                tracing::warn!(error = %e, "tool-enabled call failed, summarizing results");
                return (state, Phase::FinalResponse);
            }
        };

        if !reply.tool_calls.is_empty() {
            state
                .messages
                .push(ChatMessage::assistant_tool_calls(reply.content.clone(), &reply.tool_calls));
            state.pending = reply.tool_calls.iter().map(native_invocation).collect();
            for raw in &reply.unparsed_tool_calls {
                let recovered = parse_invocations(raw);
                if recovered.is_empty() {
                    state.unparseable.push(raw.clone());
                } else {
                    state.pending.extend(recovered);
                }
            }
            return (state, Phase::ExecuteTools);
        }

        let recovered = self.recover(&state, &reply, &turn.catalog);
        if !recovered.is_empty() {
            let said = reply
                .content
                .clone()
                .unwrap_or_else(|| reply.unparsed_tool_calls.join("\n"));
            state.messages.push(ChatMessage::assistant(said));
            state.pending = recovered;
            return (state, Phase::ExecuteTools);
        }

        if let Some(text) = reply.content_text() {
            state.final_response = Some(text.to_string());
        }
        (state, Phase::FinalResponse)
    }

    async fn execute_tools(
        &self,
        mut state: ConversationState,
        turn: &Turn<'_>,
    ) -> (ConversationState, Phase) {
        if state.is_terminal() || (state.pending.is_empty() && state.unparseable.is_empty()) {
            return (state, Phase::FinalResponse);
        }

        let pending = std::mem::take(&mut state.pending);
        let unparseable = std::mem::take(&mut state.unparseable);
        let iteration = state.iteration + 1;
        step(
            turn,
            Phase::ExecuteTools,
            &format!("Running {} tool call(s)", pending.len() + unparseable.len()),
        )
        .await;

        let mut entries = self
            .router
            .execute(&turn.catalog, &pending, iteration, turn.events)
            .await;
        let rejected = self
            .router
            .reject_unparseable(&unparseable, entries.len(), iteration, turn.events)
            .await;
        entries.extend(rejected);
        state.messages.extend(result_messages(&entries));
        state.trace.extend(entries);
        state.iteration = iteration;

        if state.iteration >= self.settings.max_iterations {
            let limit = AgentError::IterationLimitReached {
                max_iterations: self.settings.max_iterations,
            };
            tracing::info!(reason = %limit, "forcing final response");
            return (state, Phase::FinalResponse);
        }
        (state, Phase::ModelWithTools)
    }

    async fn final_response(
        &self,
        mut state: ConversationState,
        turn: &Turn<'_>,
    ) -> (ConversationState, Phase) {
        if state.is_terminal() {
            return (state, Phase::Done);
        }
        step(turn, Phase::FinalResponse, "Summarizing results").await;

        if state.trace.is_empty() {
            state.final_response = Some(prompts::narrate_trace(&state.trace));
            return (state, Phase::Done);
        }

        let messages = vec![
            ChatMessage::system(prompts::SYNTHESIS_PROMPT),
            ChatMessage::user(prompts::synthesis_request(&state.user_input, &state.trace)),
        ];
        let synthesized = match self.call_model(&mut state, &messages, None).await {
            Ok(reply) => reply.content_text().map(str::to_string),
            Err(e) => {
                tracing::warn!(error = %e, "synthesis failed, narrating trace");
                None
            }
        };

        state.final_response =
            Some(synthesized.unwrap_or_else(|| prompts::narrate_trace(&state.trace)));
        (state, Phase::Done)
    }

    // ─── Helpers ────────────────────────────────────────────────────────

    /// One model call under the configured timeout.
    async fn call_model(
        &self,
        state: &mut ConversationState,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ModelReply, AgentError> {
        state.model_calls += 1;
        let timeout = self.settings.model_timeout;
        match tokio::time::timeout(timeout, self.model.complete(messages, tools)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(AgentError::ModelTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Invocations hidden in a reply without native tool calls.
    ///
    /// Unparsed tool-call payloads get the full recovery, keyword defaults
    /// included. Plain text only counts when it holds JSON naming a tool
    /// that exists.
    fn recover(
        &self,
        state: &ConversationState,
        reply: &ModelReply,
        catalog: &ToolCatalog,
    ) -> Vec<Invocation> {
        if !reply.unparsed_tool_calls.is_empty() {
            let mut text = reply.content.clone().unwrap_or_default();
            for raw in &reply.unparsed_tool_calls {
                text.push('\n');
                text.push_str(raw);
            }
            return recover_invocations(&text, &state.user_input, catalog);
        }

        reply
            .content_text()
            .map(parse_invocations)
            .unwrap_or_default()
            .into_iter()
            .filter(|inv| catalog.resolve(&inv.name, 1.0).is_resolved())
            .collect()
    }
}

async fn until_cancelled(
    turn: impl Future<Output = TurnOutcome>,
    cancel: oneshot::Receiver<()>,
) -> Result<TurnOutcome, AgentError> {
    tokio::pin!(turn);

    let cancelled = tokio::select! {
        outcome = &mut turn => return Ok(outcome),
        signal = cancel => signal.is_ok(),
    };
    if cancelled {
        tracing::info!("turn cancelled");
        return Err(AgentError::Cancelled);
    }
    Ok(turn.await)
}

fn native_invocation(call: &ToolCall) -> Invocation {
    Invocation {
        call_id: Some(call.id.clone()),
        name: call.name.clone(),
        arguments: call.arguments.clone(),
        recovered: false,
    }
}

async fn step(turn: &Turn<'_>, phase: Phase, message: &str) {
    emit(
        turn.events,
        AgentEvent::Step {
            phase,
            message: message.to_string(),
        },
    )
    .await;
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::tool_router::tests::FakeTools;
    use crate::inference::model::scripted::{ScriptedModel, Step};
    use crate::inference::types::Role;
    use serde_json::json;

    fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    fn text(s: &str) -> Step {
        Step::Reply(ModelReply::text(s))
    }

    fn tools(calls: Vec<ToolCall>) -> Step {
        Step::Reply(ModelReply::with_tool_calls(calls))
    }

    fn calculator() -> Arc<FakeTools> {
        Arc::new(FakeTools::new(&["calculator", "filesystem", "brave-search"], |_, tool, args| {
            match tool {
                "add" => Ok(format!("{} + {} = 5.0", args["a"], args["b"])),
                "search" => Ok("Rust 2024 edition released".to_string()),
                "write_file" => Ok(format!("wrote {}", args["path"].as_str().unwrap_or(""))),
                other => Err(format!("no handler for {other}")),
            }
        }))
    }

    fn orchestrator(
        model: Arc<ScriptedModel>,
        tools: Arc<FakeTools>,
        settings: OrchestratorSettings,
    ) -> Orchestrator {
        Orchestrator::new(model, tools, settings)
    }

    #[tokio::test]
    async fn test_small_talk_is_one_model_call() {
        let model = Arc::new(ScriptedModel::new(vec![text("I'm doing well, thanks!")]));
        let tools = calculator();
        let agent = orchestrator(model.clone(), tools.clone(), OrchestratorSettings::default());

        let outcome = agent.run_turn(Vec::new(), "hello, how are you").await;

        assert_eq!(outcome.final_response.as_deref(), Some("I'm doing well, thanks!"));
        assert_eq!(model.call_count(), 1);
        assert_eq!(outcome.model_calls, 1);
        assert!(!model.had_tools(0));
        assert_eq!(tools.call_count(), 0);
        assert!(outcome.trace.is_empty());
        assert!(!outcome.used_tools);
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let model = Arc::new(ScriptedModel::new(vec![
            text("YES"),
            tools(vec![call("call_1", "calculator__add", json!({"a": 2, "b": 3}))]),
            text("2 + 3 is 5."),
        ]));
        let tools = calculator();
        let agent = orchestrator(model.clone(), tools.clone(), OrchestratorSettings::default());

        let outcome = agent.run_turn(Vec::new(), "add 2 and 3").await;

        assert_eq!(outcome.final_response.as_deref(), Some("2 + 3 is 5."));
        assert_eq!(outcome.trace.len(), 1);
        assert_eq!(outcome.trace[0].render(), "2 + 3 = 5.0");
        assert_eq!(outcome.iterations, 1);
        assert!(model.had_tools(1));

        // the follow-up request carries the assistant call and its result
        let followup = model.messages(2);
        let tool_msg = followup.iter().find(|m| m.role == Role::Tool).unwrap();
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_msg.text(), "2 + 3 = 5.0");
        assert_eq!(outcome.transcript.len(), 2);
    }

    #[tokio::test]
    async fn test_two_sequential_tool_calls() {
        let model = Arc::new(ScriptedModel::new(vec![
            text("YES"),
            tools(vec![call("c1", "brave-search__search", json!({"query": "rust news"}))]),
            tools(vec![call(
                "c2",
                "filesystem__write_file",
                json!({"path": "news.txt", "content": "Rust 2024 edition released"}),
            )]),
            text("Found: Rust 2024 edition released. Saved to news.txt."),
        ]));
        let tools = calculator();
        let agent = orchestrator(model.clone(), tools.clone(), OrchestratorSettings::default());

        let outcome = agent
            .run_turn(Vec::new(), "search rust news then save the result to a file")
            .await;

        assert_eq!(outcome.trace.len(), 2);
        assert_eq!(outcome.trace[0].tool, "search");
        assert_eq!(outcome.trace[0].iteration, 1);
        assert_eq!(outcome.trace[1].tool, "write_file");
        assert_eq!(outcome.trace[1].iteration, 2);
        assert!(outcome.iterations <= 5);
        let answer = outcome.final_response.unwrap();
        assert!(answer.contains("Rust 2024") && answer.contains("news.txt"));
        assert_eq!(tools.call_count(), 2);
    }

    #[tokio::test]
    async fn test_iteration_bound_forces_synthesis() {
        let model = Arc::new(ScriptedModel::new(vec![
            text("YES"),
            tools(vec![call("c1", "calculator__add", json!({"a": 1, "b": 1}))]),
            tools(vec![call("c2", "calculator__add", json!({"a": 2, "b": 2}))]),
            text("Both sums are done."),
        ]));
        let tools = calculator();
        let settings = OrchestratorSettings::default().with_max_iterations(2);
        let agent = orchestrator(model.clone(), tools.clone(), settings);

        let outcome = agent.run_turn(Vec::new(), "add 1+1, then 2+2").await;

        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.trace.len(), 2);
        assert_eq!(outcome.final_response.as_deref(), Some("Both sums are done."));
        // the synthesis call carries no tool declarations
        assert!(!model.had_tools(3));
        assert_eq!(model.call_count(), 4);
    }

    #[tokio::test]
    async fn test_hanging_tool_still_reaches_final_response() {
        let model = Arc::new(ScriptedModel::new(vec![
            text("YES"),
            tools(vec![call("c1", "filesystem__list_directory", json!({"path": "."}))]),
            Step::Fail,
            Step::Fail,
        ]));
        let tools = Arc::new(FakeTools::new(&["filesystem"], |_, _, _| {
            Err("no matching response".to_string())
        }));
        let agent = orchestrator(model.clone(), tools.clone(), OrchestratorSettings::default());

        let outcome = agent.run_turn(Vec::new(), "list files here").await;

        assert!(outcome.error_message.is_none());
        let answer = outcome.final_response.unwrap();
        assert!(answer.contains("filesystem.list_directory failed: no matching response"));
        assert_eq!(outcome.trace.len(), 1);
        assert!(!outcome.trace[0].success);
    }

    #[tokio::test]
    async fn test_unusable_model_sets_error_message() {
        let model = Arc::new(ScriptedModel::new(vec![Step::Fail, Step::Fail, Step::Fail]));
        let tools = calculator();
        let agent = orchestrator(model.clone(), tools.clone(), OrchestratorSettings::default());

        let outcome = agent.run_turn(Vec::new(), "list files please").await;

        // analysis fails -> heuristic -> tools call fails -> direct fails
        assert_eq!(model.call_count(), 3);
        assert!(outcome.final_response.is_none());
        assert!(outcome.error_message.unwrap().contains("model is unavailable"));
        assert_eq!(tools.call_count(), 0);
    }

    #[tokio::test]
    async fn test_model_timeout_falls_back() {
        let model = Arc::new(ScriptedModel::new(vec![
            Step::Hang,
            Step::Hang,
            text("Here is a direct answer."),
        ]));
        let tools = calculator();
        let settings = OrchestratorSettings {
            model_timeout: Duration::from_millis(50),
            ..OrchestratorSettings::default()
        };
        let agent = orchestrator(model.clone(), tools, settings);

        let outcome = agent.run_turn(Vec::new(), "search the web for rust").await;

        assert_eq!(outcome.final_response.as_deref(), Some("Here is a direct answer."));
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn test_recovered_invocations_from_text() {
        let model = Arc::new(ScriptedModel::new(vec![
            text("YES"),
            text(r#"[{"server": "calculator", "tool": "add", "arguments": {"a": 2, "b": 3}}]"#),
            text("The sum is 5."),
        ]));
        let tools = calculator();
        let agent = orchestrator(model.clone(), tools.clone(), OrchestratorSettings::default());

        let outcome = agent.run_turn(Vec::new(), "calculate 2 + 3").await;

        assert_eq!(outcome.trace.len(), 1);
        assert!(outcome.trace[0].recovered);
        assert_eq!(outcome.final_response.as_deref(), Some("The sum is 5."));
        let followup = model.messages(2);
        let last = followup.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(last.text().starts_with("Tool results:"));
    }

    #[tokio::test]
    async fn test_unparsed_tool_calls_use_keyword_defaults() {
        let model = Arc::new(ScriptedModel::new(vec![
            text("YES"),
            Step::Reply(ModelReply {
                content: None,
                tool_calls: Vec::new(),
                unparsed_tool_calls: vec![r#"{"name": "filesystem__list_directory", "arguments": path=.}"#.into()],
            }),
            text("The directory has 3 entries."),
        ]));
        let tools = Arc::new(FakeTools::new(&["filesystem"], |_, _, _| Ok("a\nb\nc".into())));
        let agent = orchestrator(model, tools.clone(), OrchestratorSettings::default());

        let outcome = agent.run_turn(Vec::new(), "list the directory").await;

        assert_eq!(outcome.trace.len(), 1);
        assert_eq!(outcome.trace[0].tool, "list_directory");
        assert_eq!(outcome.trace[0].arguments, json!({"path": "."}));
        assert!(outcome.trace[0].recovered);
    }

    #[tokio::test]
    async fn test_mixed_reply_keeps_unparsed_calls() {
        let model = Arc::new(ScriptedModel::new(vec![
            text("YES"),
            Step::Reply(ModelReply {
                content: None,
                tool_calls: vec![call("c1", "calculator__add", json!({"a": 2, "b": 3}))],
                unparsed_tool_calls: vec![
                    r#"{"name": "calculator__add", "arguments": {"a": 1, "b": 1}}"#.into(),
                    r#"{"name": "calculator__multiply", "arguments": a=2 b=}"#.into(),
                ],
            }),
            text("2 + 3 is 5; the multiplication could not be read."),
        ]));
        let tools = calculator();
        let agent = orchestrator(model.clone(), tools.clone(), OrchestratorSettings::default());

        let outcome = agent.run_turn(Vec::new(), "add 2 and 3, then multiply 2 by 4").await;

        assert_eq!(outcome.trace.len(), 3);
        assert_eq!(outcome.trace[0].call_id.as_deref(), Some("c1"));
        assert!(outcome.trace[0].success);
        assert!(outcome.trace[1].recovered);
        assert_eq!(outcome.trace[1].arguments, json!({"a": 1, "b": 1}));

        let rejected = &outcome.trace[2];
        assert_eq!(rejected.index, 2);
        assert_eq!((rejected.server.as_str(), rejected.tool.as_str()), ("calculator", "multiply"));
        assert!(!rejected.success);
        assert!(rejected.error.as_deref().unwrap().starts_with("unparseable tool call: "));
        assert_eq!(tools.call_count(), 2);

        // the model hears about the rejected payload
        let followup = model.messages(2);
        let tool_msg = followup.iter().find(|m| m.role == Role::Tool).unwrap();
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("c1"));
        let last = followup.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(last.text().contains("calculator.multiply: Error: unparseable tool call"));
    }

    #[tokio::test]
    async fn test_history_window_is_applied() {
        let history: Vec<ChatMessage> = (0..10)
            .map(|i| ChatMessage::user(format!("old message {i}")))
            .collect();
        let model = Arc::new(ScriptedModel::new(vec![text("ok")]));
        let settings = OrchestratorSettings {
            history_window: 2,
            ..OrchestratorSettings::default()
        };
        let agent = orchestrator(model.clone(), calculator(), settings);

        let outcome = agent.run_turn(history, "thanks").await;

        // system + 2 history + user
        let sent = model.messages(0);
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[1].text(), "old message 8");
        assert_eq!(outcome.transcript.len(), 12);
    }

    #[tokio::test]
    async fn test_cancellation() {
        let model = Arc::new(ScriptedModel::new(vec![Step::Hang]));
        let agent = orchestrator(model, calculator(), OrchestratorSettings::default());

        let (tx, rx) = oneshot::channel();
        let handle = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(());
        };
        let (result, _) = tokio::join!(agent.run_turn_cancellable(Vec::new(), "hello", rx), handle);
        assert!(matches!(result, Err(AgentError::Cancelled)));
    }

    #[tokio::test]
    async fn test_dropped_cancel_sender_does_not_cancel() {
        let model = Arc::new(ScriptedModel::new(vec![text("hi!")]));
        let agent = orchestrator(model, calculator(), OrchestratorSettings::default());

        let (tx, rx) = oneshot::channel::<()>();
        drop(tx);
        let outcome = agent.run_turn_cancellable(Vec::new(), "hello", rx).await.unwrap();
        assert_eq!(outcome.final_response.as_deref(), Some("hi!"));
    }

    #[tokio::test]
    async fn test_events_sequence() {
        let model = Arc::new(ScriptedModel::new(vec![
            text("YES"),
            tools(vec![call("c1", "calculator__add", json!({"a": 2, "b": 3}))]),
            text("5"),
        ]));
        let agent = orchestrator(model, calculator(), OrchestratorSettings::default());
        let (tx, mut rx) = mpsc::channel(64);

        let outcome = agent.run_turn_with_events(Vec::new(), "add 2 and 3", tx).await;
        assert_eq!(outcome.final_response.as_deref(), Some("5"));

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(serde_json::to_value(&event).unwrap()["type"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds.first().map(String::as_str), Some("step"));
        assert!(kinds.contains(&"tool_started".to_string()));
        assert!(kinds.contains(&"tool_finished".to_string()));
        assert_eq!(kinds.last().map(String::as_str), Some("final"));
    }

    #[tokio::test]
    async fn test_cancel_with_events_stops_the_stream() {
        let model = Arc::new(ScriptedModel::new(vec![
            text("YES"),
            tools(vec![call("c1", "calculator__add", json!({"a": 2, "b": 3}))]),
            Step::Hang,
        ]));
        let agent = orchestrator(model, calculator(), OrchestratorSettings::default());
        let (tx, mut rx) = mpsc::channel(64);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let watcher = async {
            let mut kinds = Vec::new();
            let mut cancel_tx = Some(cancel_tx);
            while let Some(event) = rx.recv().await {
                if let AgentEvent::ToolFinished { .. } = event {
                    if let Some(tx) = cancel_tx.take() {
                        let _ = tx.send(());
                    }
                }
                kinds.push(serde_json::to_value(&event).unwrap()["type"].as_str().unwrap().to_string());
            }
            kinds
        };
        let (result, kinds) = tokio::join!(
            agent.run_turn_with_events_cancellable(Vec::new(), "add 2 and 3", tx, cancel_rx),
            watcher
        );

        assert!(matches!(result, Err(AgentError::Cancelled)));
        assert!(kinds.contains(&"tool_finished".to_string()));
        assert!(!kinds.contains(&"final".to_string()));
    }

    #[tokio::test]
    async fn test_no_tools_skips_analysis() {
        let model = Arc::new(ScriptedModel::new(vec![text("Sure, here is how to list files.")]));
        let empty = Arc::new(FakeTools::new(&[], |_, _, _| Ok(String::new())));
        let agent = orchestrator(model.clone(), empty, OrchestratorSettings::default());

        let outcome = agent.run_turn(Vec::new(), "list files").await;

        assert_eq!(model.call_count(), 1);
        assert!(outcome.final_response.is_some());
    }

    #[test]
    fn test_max_iterations_clamped() {
        assert_eq!(OrchestratorSettings::default().with_max_iterations(0).max_iterations, 1);
        assert_eq!(OrchestratorSettings::default().with_max_iterations(50).max_iterations, 10);
    }
}
