//! Process channel: one tool-server subprocess and the JSON-RPC exchange
//! over its stdio.
//!
//! A channel is launched, handshaken, then used for any number of
//! `tools/list` and `tools/call` exchanges, and finally closed. Calls are
//! serialized per channel; concurrency across servers comes from owning one
//! channel per server.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::fallback_tools::fallback_tools;
use super::transport::{extract_result, BoxedReader, BoxedWriter, LineTransport};
use super::types::{
    content_text, InitializeResult, ServerConfig, ToolCallRequest, ToolCallResult,
    ToolDescriptor, ToolsListResult, PROTOCOL_VERSION,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// How many trailing stderr lines are kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

// ─── Settings ────────────────────────────────────────────────────────────────

/// Timeouts and limits applied to one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSettings {
    /// Bound on the `initialize` exchange.
    pub handshake_timeout: Duration,
    /// Bound on each `tools/list` and `tools/call` exchange.
    pub call_timeout: Duration,
    /// How long `close()` waits for a voluntary exit before killing.
    pub shutdown_grace: Duration,
    /// Non-matching lines tolerated per exchange.
    pub max_attempts: u32,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            max_attempts: super::transport::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

// ─── State ───────────────────────────────────────────────────────────────────

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unstarted,
    Launching,
    Handshaking,
    Ready,
    Calling,
    Closed,
    Failed,
}

type SharedState = Arc<StdMutex<ChannelState>>;

fn read_state(state: &SharedState) -> ChannelState {
    *state.lock().unwrap_or_else(|p| p.into_inner())
}

/// `Closed` is final; only `close()` puts a channel there.
fn write_state(state: &SharedState, next: ChannelState) {
    let mut guard = state.lock().unwrap_or_else(|p| p.into_inner());
    if *guard != ChannelState::Closed {
        *guard = next;
    }
}

/// Puts the channel back to `Ready` when a call finishes or its future is
/// dropped mid-flight, unless the call moved it elsewhere.
struct CallingGuard<'a> {
    state: &'a SharedState,
}

impl<'a> CallingGuard<'a> {
    /// `None` when the channel is `Failed` or `Closed`; the state is left as is.
    fn enter(state: &'a SharedState) -> Option<Self> {
        let mut guard = state.lock().unwrap_or_else(|p| p.into_inner());
        match *guard {
            ChannelState::Failed | ChannelState::Closed => None,
            _ => {
                *guard = ChannelState::Calling;
                Some(Self { state })
            }
        }
    }
}

impl Drop for CallingGuard<'_> {
    fn drop(&mut self) {
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if *guard == ChannelState::Calling {
            *guard = ChannelState::Ready;
        }
    }
}

// ─── ProcessChannel ──────────────────────────────────────────────────────────

/// A tool-server subprocess plus its line transport.
pub struct ProcessChannel {
    name: String,
    transport: LineTransport,
    child: Mutex<Option<Child>>,
    state: SharedState,
    /// At most one in-flight call.
    call_lock: Mutex<()>,
    stderr_tail: Arc<StdMutex<VecDeque<String>>>,
    stderr_task: Option<JoinHandle<()>>,
    settings: ChannelSettings,
}

impl ProcessChannel {
    /// Spawn the server process described by `config`.
    ///
    /// The child's stdin and stdout carry the protocol. Its stderr is drained
    /// by a background task into the log so the child can never block on a
    /// full stderr pipe. The child is killed if the channel is dropped
    /// without being closed.
    pub fn launch(
        name: &str,
        config: &ServerConfig,
        settings: ChannelSettings,
    ) -> Result<Self, McpError> {
        if config.command.trim().is_empty() {
            return Err(McpError::ConfigError {
                reason: format!("server '{name}' has an empty command"),
            });
        }

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(dir) = config.cwd.as_deref() {
            cmd.current_dir(dir);
        }

        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => McpError::ExecutableNotFound {
                name: name.to_string(),
                command: config.command.clone(),
            },
            _ => McpError::SpawnFailed {
                name: name.to_string(),
                reason: e.to_string(),
            },
        })?;

        let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;

        let stderr_tail = Arc::new(StdMutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| spawn_stderr_drain(name, stderr, Arc::clone(&stderr_tail)));

        tracing::info!(
            server = name,
            command = %config.command,
            pid = ?child.id(),
            "tool server launched"
        );

        let transport = LineTransport::new(name, Box::new(stdin), Box::new(stdout))
            .with_max_attempts(settings.max_attempts);

        Ok(Self {
            name: name.to_string(),
            transport,
            child: Mutex::new(Some(child)),
            state: Arc::new(StdMutex::new(ChannelState::Launching)),
            call_lock: Mutex::new(()),
            stderr_tail,
            stderr_task,
            settings,
        })
    }

    /// Build a channel over already-connected streams, for servers that run
    /// in-process or behind some other pipe. `close()` only closes the
    /// writer.
    pub fn from_streams(
        name: &str,
        writer: BoxedWriter,
        reader: BoxedReader,
        settings: ChannelSettings,
    ) -> Self {
        Self {
            name: name.to_string(),
            transport: LineTransport::new(name, writer, reader)
                .with_max_attempts(settings.max_attempts),
            child: Mutex::new(None),
            state: Arc::new(StdMutex::new(ChannelState::Unstarted)),
            call_lock: Mutex::new(()),
            stderr_tail: Arc::new(StdMutex::new(VecDeque::new())),
            stderr_task: None,
            settings,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ChannelState {
        read_state(&self.state)
    }

    /// Perform the `initialize` handshake, then send the
    /// `notifications/initialized` notification.
    pub async fn handshake(&self) -> Result<InitializeResult, McpError> {
        let _call = self.call_lock.lock().await;
        write_state(&self.state, ChannelState::Handshaking);

        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let outcome = async {
            let response = self
                .transport
                .request("initialize", Some(params), self.settings.handshake_timeout)
                .await
                .map_err(|e| self.handshake_error(e))?;

            let result = extract_result(response).map_err(|e| McpError::MalformedHandshake {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;

            let init: InitializeResult =
                serde_json::from_value(result).map_err(|e| McpError::MalformedHandshake {
                    name: self.name.clone(),
                    reason: format!("failed to parse initialize response: {e}"),
                })?;

            self.transport
                .notify("notifications/initialized", None)
                .await
                .map_err(|e| self.handshake_error(e))?;

            Ok(init)
        }
        .await;

        match &outcome {
            Ok(init) => {
                write_state(&self.state, ChannelState::Ready);
                tracing::info!(
                    server = %self.name,
                    protocol = %init.protocol_version,
                    server_name = ?init.server_info.as_ref().and_then(|i| i.name.as_deref()),
                    "handshake complete"
                );
            }
            Err(e) => {
                write_state(&self.state, ChannelState::Failed);
                tracing::warn!(server = %self.name, error = %e, "handshake failed");
            }
        }
        outcome
    }

    fn handshake_error(&self, e: McpError) -> McpError {
        match e {
            McpError::ResponseTimeout { .. } => McpError::HandshakeTimeout {
                name: self.name.clone(),
                timeout_ms: self.settings.handshake_timeout.as_millis() as u64,
            },
            McpError::ProcessTerminated { .. } => McpError::ProcessExited {
                name: self.name.clone(),
                stderr: self.stderr_suffix(),
            },
            other => McpError::MalformedHandshake {
                name: self.name.clone(),
                reason: other.to_string(),
            },
        }
    }

    /// Ask the server for its tools.
    ///
    /// Any failure falls back to the built-in catalog for this server name,
    /// and so does a `Failed` or `Closed` channel, without touching the pipe.
    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        let _call = self.call_lock.lock().await;
        let Some(_guard) = CallingGuard::enter(&self.state) else {
            tracing::debug!(server = %self.name, state = ?self.state(), "channel unusable, using built-in tool list");
            return fallback_tools(&self.name);
        };

        let listed = async {
            let response = self
                .transport
                .request("tools/list", None, self.settings.call_timeout)
                .await?;
            let result = extract_result(response)?;
            serde_json::from_value::<ToolsListResult>(result).map_err(|e| {
                McpError::TransportError {
                    server: self.name.clone(),
                    reason: format!("failed to parse tools/list response: {e}"),
                }
            })
        }
        .await;

        match listed {
            Ok(list) => list
                .tools
                .into_iter()
                .map(|def| ToolDescriptor::from_definition(&self.name, def))
                .collect(),
            Err(e) => {
                if e.is_process_death() {
                    write_state(&self.state, ChannelState::Failed);
                }
                let fallback = fallback_tools(&self.name);
                tracing::warn!(
                    server = %self.name,
                    error = %e,
                    fallback_count = fallback.len(),
                    "tools/list failed, using built-in tool list"
                );
                fallback
            }
        }
    }

    /// Invoke one tool. Never fails: every error becomes an unsuccessful
    /// `ToolCallResult`.
    pub async fn call(&self, tool: &str, arguments: serde_json::Value) -> ToolCallResult {
        let start = Instant::now();
        let elapsed = || start.elapsed().as_millis() as u64;

        match self.state() {
            ChannelState::Failed | ChannelState::Closed => {
                return ToolCallResult::failed(&self.name, tool, "process terminated", elapsed());
            }
            _ => {}
        }

        // Re-checked under the lock: a queued call may find the channel closed.
        let _call = self.call_lock.lock().await;
        let Some(_guard) = CallingGuard::enter(&self.state) else {
            return ToolCallResult::failed(&self.name, tool, "process terminated", elapsed());
        };

        let request = ToolCallRequest {
            id: self.transport.next_request_id(),
            server: self.name.clone(),
            tool: tool.to_string(),
            arguments,
        };
        tracing::debug!(server = %request.server, tool = %request.tool, id = request.id, "tools/call");

        let params = serde_json::json!({
            "name": request.tool,
            "arguments": request.arguments,
        });
        let response = self
            .transport
            .request_with_id(request.id, "tools/call", Some(params), self.settings.call_timeout)
            .await
            .and_then(extract_result);

        let result = match response {
            Ok(value) if value.get("isError").and_then(|v| v.as_bool()) == Some(true) => {
                let message =
                    content_text(&value).unwrap_or_else(|| "tool reported an error".to_string());
                ToolCallResult::failed(&self.name, tool, message, elapsed())
            }
            Ok(value) => ToolCallResult::ok(&self.name, tool, value, elapsed()),
            Err(e) => {
                if e.is_process_death() {
                    write_state(&self.state, ChannelState::Failed);
                    tracing::error!(
                        server = %self.name,
                        tool,
                        stderr = %self.stderr_suffix(),
                        "tool server terminated during call"
                    );
                }
                ToolCallResult::failed(&self.name, tool, e.to_string(), elapsed())
            }
        };

        tracing::info!(
            server = %self.name,
            tool,
            success = result.success,
            elapsed_ms = result.execution_time_ms,
            "tool call finished"
        );
        result
    }

    /// Shut the server down: close its stdin, wait out the grace period,
    /// then kill it. Safe to call more than once.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if *state == ChannelState::Closed {
                return;
            }
            *state = ChannelState::Closed;
        }

        let grace = self.settings.shutdown_grace;
        if tokio::time::timeout(grace, self.transport.close_writer())
            .await
            .is_err()
        {
            tracing::debug!(server = %self.name, "writer busy at close, killing");
        }

        let mut child_slot = self.child.lock().await;
        if let Some(mut child) = child_slot.take() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::info!(server = %self.name, %status, "tool server exited");
                }
                _ => {
                    tracing::warn!(server = %self.name, "tool server did not exit in time, killing");
                    let _ = child.kill().await;
                }
            }
        }

        if let Some(task) = &self.stderr_task {
            task.abort();
        }
    }

    /// Last captured stderr lines, formatted as an error-message suffix.
    fn stderr_suffix(&self) -> String {
        let tail = self.stderr_tail.lock().unwrap_or_else(|p| p.into_inner());
        if tail.is_empty() {
            String::new()
        } else {
            let joined: Vec<&str> = tail.iter().map(String::as_str).collect();
            format!(" | stderr: {}", joined.join(" / "))
        }
    }
}

impl Drop for ProcessChannel {
    fn drop(&mut self) {
        if let Some(task) = &self.stderr_task {
            task.abort();
        }
    }
}

fn spawn_stderr_drain(
    name: &str,
    stderr: tokio::process::ChildStderr,
    tail: Arc<StdMutex<VecDeque<String>>>,
) -> JoinHandle<()> {
    let server = name.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %server, "stderr: {line}");
            let mut tail = tail.lock().unwrap_or_else(|p| p.into_inner());
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
