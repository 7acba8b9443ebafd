//! ToolRouter: dispatches model tool calls to tool servers.
//!
//! The bridge between the model's tool call decisions and the registry:
//! - Resolution of the requested name against the catalog (prefix repair,
//!   `.` vs `__`, near-miss correction)
//! - Structural argument validation
//! - Execution through the [`ToolProvider`], concurrently or in order
//! - One trace entry per invocation, in request order
//! - The tool-result messages fed back to the model

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::mpsc;

use crate::inference::types::ChatMessage;
use crate::mcp_client::catalog::split_qualified;
use crate::mcp_client::types::ToolCallResult;
use crate::mcp_client::{ToolCatalog, ToolProvider, ToolResolution};

use super::recovery::payload_tool_name;
use super::types::{AgentEvent, Invocation, TraceEntry};

/// Minimum similarity for correcting a misspelled tool name.
const MIN_NAME_SIMILARITY: f64 = 0.75;

/// Longest slice of an unparseable payload quoted back to the model, in bytes.
const MAX_PAYLOAD_ECHO_BYTES: usize = 200;

/// Longest tool output fed back to the model, in bytes.
pub const MAX_RESULT_BYTES: usize = 8_000;

/// Dispatches invocations through a [`ToolProvider`].
pub struct ToolRouter {
    tools: Arc<dyn ToolProvider>,
    parallel: bool,
}

impl ToolRouter {
    pub fn new(tools: Arc<dyn ToolProvider>, parallel: bool) -> Self {
        Self { tools, parallel }
    }

    /// Execute every invocation and return one trace entry each, in the
    /// order they were requested.
    ///
    /// Failures (unknown tool, bad arguments, tool errors) become failed
    /// entries; nothing here aborts the batch.
    pub async fn execute(
        &self,
        catalog: &ToolCatalog,
        invocations: &[Invocation],
        iteration: u32,
        events: Option<&mpsc::Sender<AgentEvent>>,
    ) -> Vec<TraceEntry> {
        let jobs = invocations
            .iter()
            .enumerate()
            .map(|(index, inv)| self.execute_one(catalog, index, inv, iteration, events));

        if self.parallel {
            join_all(jobs).await
        } else {
            let mut entries = Vec::with_capacity(invocations.len());
            for job in jobs {
                entries.push(job.await);
            }
            entries
        }
    }

    /// Failed entries for tool-call payloads that could not be recovered,
    /// numbered from `first_index` so they follow the executed invocations.
    pub async fn reject_unparseable(
        &self,
        payloads: &[String],
        first_index: usize,
        iteration: u32,
        events: Option<&mpsc::Sender<AgentEvent>>,
    ) -> Vec<TraceEntry> {
        let mut entries = Vec::with_capacity(payloads.len());
        for (offset, raw) in payloads.iter().enumerate() {
            let name = payload_tool_name(raw).unwrap_or("unknown");
            let (server, tool) = split_qualified(name).unwrap_or(("", name));
            let invocation = Invocation {
                call_id: None,
                name: name.to_string(),
                arguments: serde_json::Value::Null,
                recovered: false,
            };
            let error = format!(
                "unparseable tool call: {}",
                truncate_utf8(raw, MAX_PAYLOAD_ECHO_BYTES)
            );
            tracing::warn!(requested = name, "tool call payload could not be parsed");
            let result = ToolCallResult::failed(server, tool, error, 0);
            entries.push(
                self.finish(first_index + offset, iteration, &invocation, result, events)
                    .await,
            );
        }
        entries
    }

    async fn execute_one(
        &self,
        catalog: &ToolCatalog,
        index: usize,
        invocation: &Invocation,
        iteration: u32,
        events: Option<&mpsc::Sender<AgentEvent>>,
    ) -> TraceEntry {
        let start = Instant::now();

        let resolution = catalog.resolve(&invocation.name, MIN_NAME_SIMILARITY);
        let Some((server, tool)) = resolution.target() else {
            let (server, tool) = split_qualified(&invocation.name)
                .unwrap_or(("", invocation.name.as_str()));
            let mut error = format!("unknown tool '{}'", invocation.name);
            if let ToolResolution::NotFound { suggestions, .. } = &resolution {
                if !suggestions.is_empty() {
                    error.push_str(&format!(". Did you mean: {}?", suggestions.join(", ")));
                }
            }
            tracing::warn!(requested = %invocation.name, "tool not found in catalog");
            let result = ToolCallResult::failed(server, tool, error, elapsed_ms(start));
            return self.finish(index, iteration, invocation, result, events).await;
        };

        match &resolution {
            ToolResolution::Corrected { original, score, .. } => {
                tracing::info!(requested = %original, server, tool, score, "corrected tool name");
            }
            ToolResolution::Unprefixed { original, .. } => {
                tracing::info!(requested = %original, server, tool, "added server prefix");
            }
            _ => {}
        }

        if let Err(e) = catalog.validate_tool_call(server, tool, &invocation.arguments) {
            tracing::warn!(server, tool, error = %e, "tool call rejected");
            let result = ToolCallResult::failed(server, tool, e.to_string(), elapsed_ms(start));
            return self.finish(index, iteration, invocation, result, events).await;
        }

        emit(
            events,
            AgentEvent::ToolStarted {
                server: server.to_string(),
                tool: tool.to_string(),
                arguments: invocation.arguments.clone(),
                iteration,
            },
        )
        .await;

        let arguments = if invocation.arguments.is_null() {
            serde_json::json!({})
        } else {
            invocation.arguments.clone()
        };
        let result = self.tools.call(server, tool, arguments).await;
        self.finish(index, iteration, invocation, result, events).await
    }

    async fn finish(
        &self,
        index: usize,
        iteration: u32,
        invocation: &Invocation,
        result: ToolCallResult,
        events: Option<&mpsc::Sender<AgentEvent>>,
    ) -> TraceEntry {
        let entry = TraceEntry::from_result(index, iteration, invocation, result);
        tracing::info!(
            server = %entry.server,
            tool = %entry.tool,
            iteration,
            success = entry.success,
            elapsed_ms = entry.execution_time_ms,
            "tool call finished"
        );
        emit(events, AgentEvent::ToolFinished { entry: entry.clone() }).await;
        entry
    }
}

/// Messages that hand `entries` back to the model.
///
/// Native calls get one `tool` message each, answering their call id.
/// Recovered calls have no id; their results go back together in a single
/// user message.
pub fn result_messages(entries: &[TraceEntry]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut untracked = Vec::new();

    for entry in entries {
        let text = truncate_utf8(&entry.render(), MAX_RESULT_BYTES).to_string();
        match &entry.call_id {
            Some(id) => messages.push(ChatMessage::tool_result(id.clone(), text)),
            None => untracked.push(format!("{}: {}", entry.label(), text)),
        }
    }

    if !untracked.is_empty() {
        messages.push(ChatMessage::user(format!(
            "Tool results:\n{}",
            untracked.join("\n")
        )));
    }
    messages
}

/// Truncate to at most `max_bytes`, on a char boundary.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    // Walk backward to find a valid char boundary
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

pub(crate) async fn emit(events: Option<&mpsc::Sender<AgentEvent>>, event: AgentEvent) {
    if let Some(tx) = events {
        // A dropped receiver only means nobody is watching.
        let _ = tx.send(event).await;
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mcp_client::fallback_tools::fallback_tools;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// A [`ToolProvider`] over the fallback catalog that answers from a
    /// closure and records every call.
    pub(crate) struct FakeTools {
        catalog: ToolCatalog,
        pub(crate) calls: Mutex<Vec<(String, String, serde_json::Value)>>,
        answer: Box<dyn Fn(&str, &str, &serde_json::Value) -> Result<String, String> + Send + Sync>,
        delay: Box<dyn Fn(&str) -> Duration + Send + Sync>,
    }

    impl FakeTools {
        pub(crate) fn new<F>(servers: &[&str], answer: F) -> Self
        where
            F: Fn(&str, &str, &serde_json::Value) -> Result<String, String> + Send + Sync + 'static,
        {
            let map: BTreeMap<String, _> = servers
                .iter()
                .map(|s| (s.to_string(), fallback_tools(s)))
                .collect();
            Self {
                catalog: ToolCatalog::from_servers(&map),
                calls: Mutex::new(Vec::new()),
                answer: Box::new(answer),
                delay: Box::new(|_| Duration::ZERO),
            }
        }

        pub(crate) fn with_delay<D>(mut self, delay: D) -> Self
        where
            D: Fn(&str) -> Duration + Send + Sync + 'static,
        {
            self.delay = Box::new(delay);
            self
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ToolProvider for FakeTools {
        async fn catalog(&self) -> ToolCatalog {
            self.catalog.clone()
        }

        async fn call(&self, server: &str, tool: &str, arguments: serde_json::Value) -> ToolCallResult {
            self.calls
                .lock()
                .unwrap()
                .push((server.to_string(), tool.to_string(), arguments.clone()));
            tokio::time::sleep((self.delay)(tool)).await;
            match (self.answer)(server, tool, &arguments) {
                Ok(text) => ToolCallResult::ok(
                    server,
                    tool,
                    json!({"content": [{"type": "text", "text": text}]}),
                    1,
                ),
                Err(e) => ToolCallResult::failed(server, tool, e, 1),
            }
        }
    }

    fn inv(id: Option<&str>, name: &str, arguments: serde_json::Value) -> Invocation {
        Invocation {
            call_id: id.map(String::from),
            name: name.to_string(),
            arguments,
            recovered: id.is_none(),
        }
    }

    #[tokio::test]
    async fn test_trace_keeps_request_order_when_parallel() {
        let fake = Arc::new(
            FakeTools::new(&["calculator"], |_, tool, _| Ok(format!("{tool} done")))
                .with_delay(|tool| match tool {
                    "add" => Duration::from_millis(60),
                    _ => Duration::ZERO,
                }),
        );
        let catalog = fake.catalog().await;
        let router = ToolRouter::new(fake.clone(), true);

        let entries = router
            .execute(
                &catalog,
                &[
                    inv(Some("c1"), "calculator__add", json!({"a": 1, "b": 2})),
                    inv(Some("c2"), "calculator.multiply", json!({"a": 1, "b": 2})),
                ],
                1,
                None,
            )
            .await;

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].tool, "add");
        assert_eq!(entries[0].index, 0);
        assert_eq!(entries[1].tool, "multiply");
        assert_eq!(entries[1].index, 1);
        assert!(entries.iter().all(|e| e.success && e.iteration == 1));
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_arguments_are_recorded() {
        let fake = Arc::new(FakeTools::new(&["calculator"], |_, _, _| Ok("ok".into())));
        let catalog = fake.catalog().await;
        let router = ToolRouter::new(fake.clone(), false);

        let entries = router
            .execute(
                &catalog,
                &[
                    inv(Some("c1"), "ghost__anything", json!({})),
                    inv(Some("c2"), "calculator__add", json!({"a": 1})),
                    inv(Some("c3"), "calculator__multipy", json!({"a": 1, "b": 2})),
                ],
                2,
                None,
            )
            .await;

        assert!(!entries[0].success);
        assert!(entries[0].error.as_deref().unwrap().contains("unknown tool"));
        assert_eq!(entries[0].server, "ghost");
        assert!(!entries[1].success);
        assert!(entries[1].error.as_deref().unwrap().contains("'b'"));
        // misspelling corrected
        assert!(entries[2].success);
        assert_eq!(entries[2].tool, "multiply");
        // only the corrected call reached the provider
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let fake = Arc::new(FakeTools::new(&["calculator"], |_, _, _| Err("boom".into())));
        let catalog = fake.catalog().await;
        let router = ToolRouter::new(fake, true);
        let (tx, mut rx) = mpsc::channel(16);

        let entries = router
            .execute(
                &catalog,
                &[inv(Some("c1"), "calculator__add", json!({"a": 1, "b": 2}))],
                1,
                Some(&tx),
            )
            .await;
        drop(tx);

        assert_eq!(entries[0].error.as_deref(), Some("boom"));
        assert!(matches!(rx.recv().await, Some(AgentEvent::ToolStarted { .. })));
        assert!(matches!(rx.recv().await, Some(AgentEvent::ToolFinished { .. })));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_result_messages() {
        let ok = ToolCallResult::ok(
            "calculator",
            "add",
            json!({"content": [{"type": "text", "text": "2 + 3 = 5.0"}]}),
            1,
        );
        let failed = ToolCallResult::failed("filesystem", "list_directory", "no matching response", 1);
        let entries = vec![
            TraceEntry::from_result(0, 1, &inv(Some("c1"), "calculator__add", json!({})), ok),
            TraceEntry::from_result(1, 1, &inv(None, "filesystem__list_directory", json!({})), failed),
        ];

        let messages = result_messages(&entries);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(messages[0].text(), "2 + 3 = 5.0");
        assert!(messages[1].text().starts_with("Tool results:\n"));
        assert!(messages[1]
            .text()
            .contains("filesystem.list_directory: Error: no matching response"));
    }

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate_utf8("hello", 10), "hello");
        assert_eq!(truncate_utf8("héllo", 2), "h");
    }
}
