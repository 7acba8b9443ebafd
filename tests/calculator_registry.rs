//! End-to-end: a registry over the real `calculator-server` binary.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;

use mcp_agent::agent_core::{Orchestrator, OrchestratorSettings};
use mcp_agent::inference::{
    ChatMessage, ChatModel, InferenceError, ModelReply, Role, ToolCall, ToolDefinition,
};
use mcp_agent::mcp_client::{
    ChannelSettings, McpError, RegistrySettings, ServerConfig, ServerStatus, ToolRegistry,
};

fn calculator_config() -> ServerConfig {
    ServerConfig::new(env!("CARGO_BIN_EXE_calculator-server"))
}

fn servers() -> BTreeMap<String, ServerConfig> {
    BTreeMap::from([
        ("calculator".to_string(), calculator_config()),
        (
            "ghost".to_string(),
            ServerConfig::new("/nonexistent/definitely-not-a-tool-server"),
        ),
    ])
}

#[tokio::test]
async fn test_missing_server_is_excluded() {
    let registry = ToolRegistry::default();
    let failures = registry.initialize(&servers()).await;

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "ghost");

    let catalog = registry.catalog().await;
    let mut names = catalog.qualified_names();
    names.sort();
    assert_eq!(
        names,
        vec!["calculator__add", "calculator__divide", "calculator__multiply"]
    );

    let statuses = registry.server_statuses().await;
    let ghost = statuses.iter().find(|s| s.name == "ghost").unwrap();
    assert_eq!(ghost.status, ServerStatus::Failed);
    let calculator = statuses.iter().find(|s| s.name == "calculator").unwrap();
    assert_eq!(calculator.status, ServerStatus::Connected);
    assert_eq!(calculator.tool_count, 3);

    let result = registry.call("ghost", "anything", json!({})).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("server not connected"));

    registry.close().await;
}

/// Starts, then never says a word.
fn silent_config() -> ServerConfig {
    let mut config = ServerConfig::new("sh");
    config.args = vec!["-c".into(), "sleep 30".into()];
    config
}

fn with_silent_server() -> BTreeMap<String, ServerConfig> {
    BTreeMap::from([
        ("calculator".to_string(), calculator_config()),
        ("mute".to_string(), silent_config()),
    ])
}

#[tokio::test]
async fn test_silent_server_hits_handshake_timeout() {
    let registry = ToolRegistry::new(RegistrySettings {
        init_timeout: Duration::from_secs(5),
        server_timeout: Duration::from_secs(3),
        channel: ChannelSettings {
            handshake_timeout: Duration::from_millis(300),
            shutdown_grace: Duration::from_millis(100),
            ..ChannelSettings::default()
        },
    });

    let started = Instant::now();
    let failures = registry.initialize(&with_silent_server()).await;
    assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "mute");
    assert!(matches!(failures[0].1, McpError::HandshakeTimeout { .. }), "{:?}", failures[0].1);

    let statuses = registry.server_statuses().await;
    let mute = statuses.iter().find(|s| s.name == "mute").unwrap();
    assert_eq!(mute.status, ServerStatus::Failed);
    let calculator = statuses.iter().find(|s| s.name == "calculator").unwrap();
    assert_eq!(calculator.status, ServerStatus::Connected);

    let result = registry.call("calculator", "add", json!({"a": 2, "b": 3})).await;
    assert!(result.success);
    registry.close().await;
}

#[tokio::test]
async fn test_startup_deadline_cuts_off_slow_servers() {
    // the handshake would wait far longer than the overall deadline
    let registry = ToolRegistry::new(RegistrySettings {
        init_timeout: Duration::from_millis(1500),
        server_timeout: Duration::from_secs(20),
        channel: ChannelSettings {
            handshake_timeout: Duration::from_secs(20),
            shutdown_grace: Duration::from_millis(100),
            ..ChannelSettings::default()
        },
    });

    let started = Instant::now();
    let failures = registry.initialize(&with_silent_server()).await;
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1500), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");

    assert_eq!(failures.len(), 1);
    match &failures[0] {
        (name, McpError::HandshakeTimeout { timeout_ms, .. }) => {
            assert_eq!(name, "mute");
            assert_eq!(*timeout_ms, 1500);
        }
        other => panic!("unexpected failure: {other:?}"),
    }

    let catalog = registry.catalog().await;
    assert_eq!(catalog.len(), 3);
    registry.close().await;
}

#[tokio::test]
async fn test_calculator_calls() {
    let registry = ToolRegistry::default();
    registry.initialize(&servers()).await;

    let result = registry.call("calculator", "add", json!({"a": 2, "b": 3})).await;
    assert!(result.success, "add failed: {:?}", result.error);
    assert_eq!(result.render(), "2 + 3 = 5.0");

    // the channel is reused for the next call
    let result = registry
        .call("calculator", "multiply", json!({"a": 4, "b": 2.5}))
        .await;
    assert!(result.success);
    assert!(result.render().ends_with("= 10.0"));

    let result = registry.call("calculator", "divide", json!({"a": 1, "b": 0})).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("zero"));

    registry.close().await;
    assert!(registry.available_tools().await.is_empty());
    registry.close().await;
    assert!(registry.available_tools().await.is_empty());
    assert!(registry.catalog().await.is_empty());

    let result = registry.call("calculator", "add", json!({"a": 1, "b": 1})).await;
    assert!(!result.success);
}

/// Asks for `calculator__add` once, then answers with the tool's output.
struct AddThenAnswer {
    calls: Mutex<u32>,
}

#[async_trait]
impl ChatModel for AddThenAnswer {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ModelReply, InferenceError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        match (n, tools.is_some()) {
            (1, false) => Ok(ModelReply::text("YES")),
            (2, true) => Ok(ModelReply::with_tool_calls(vec![ToolCall {
                id: "call_add".into(),
                name: "calculator__add".into(),
                arguments: json!({"a": 2, "b": 3}),
            }])),
            (_, true) => {
                let result = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::Tool)
                    .map(|m| m.text().to_string())
                    .unwrap_or_default();
                Ok(ModelReply::text(format!("The answer is: {result}")))
            }
            _ => Err(InferenceError::MalformedResponse {
                reason: format!("unexpected call {n}"),
            }),
        }
    }
}

#[tokio::test]
async fn test_turn_through_real_server() {
    let registry = Arc::new(ToolRegistry::default());
    registry.initialize(&servers()).await;

    let model = Arc::new(AddThenAnswer {
        calls: Mutex::new(0),
    });
    let agent = Orchestrator::new(model, registry.clone(), OrchestratorSettings::default());

    let outcome = agent.run_turn(Vec::new(), "add 2 and 3").await;

    assert_eq!(outcome.final_response.as_deref(), Some("The answer is: 2 + 3 = 5.0"));
    assert_eq!(outcome.trace.len(), 1);
    assert!(outcome.trace[0].success);
    assert_eq!(outcome.trace[0].server, "calculator");

    registry.close().await;
}
