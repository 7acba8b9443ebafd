//! Tool registry: owns one process channel per configured server and
//! exposes a uniform, never-failing `call(server, tool, args)`.
//!
//! Servers are launched concurrently at `initialize()`. A server that fails
//! to launch, handshake, or list its tools in time is marked `Failed` and
//! never retried during the registry's lifetime.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{Mutex, RwLock};

use super::catalog::ToolCatalog;
use super::channel::{ChannelSettings, ChannelState, ProcessChannel};
use super::errors::McpError;
use super::types::{ServerConfig, ServerStatus, ToolCallResult, ToolDescriptor};

// ─── ToolProvider ────────────────────────────────────────────────────────────

/// Anything that can advertise and execute tools.
///
/// The orchestrator depends on this seam rather than on `ToolRegistry`
/// directly.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Snapshot of the currently callable tools.
    async fn catalog(&self) -> ToolCatalog;

    /// Invoke a tool. Failures are reported in the result, never raised.
    async fn call(&self, server: &str, tool: &str, arguments: serde_json::Value)
        -> ToolCallResult;
}

// ─── Settings ────────────────────────────────────────────────────────────────

/// Startup bounds for the registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistrySettings {
    /// Deadline for the whole concurrent startup.
    pub init_timeout: Duration,
    /// Bound on one server's launch + handshake + tool listing.
    pub server_timeout: Duration,
    pub channel: ChannelSettings,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(10),
            server_timeout: Duration::from_secs(8),
            channel: ChannelSettings::default(),
        }
    }
}

// ─── ServerConnection ────────────────────────────────────────────────────────

/// A configured server and what the registry knows about it.
pub struct ServerConnection {
    pub name: String,
    pub status: ServerStatus,
    pub tools: Vec<ToolDescriptor>,
    pub failure: Option<String>,
    channel: Option<Arc<ProcessChannel>>,
}

impl ServerConnection {
    fn unconnected(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: ServerStatus::Unconnected,
            tools: Vec::new(),
            failure: None,
            channel: None,
        }
    }

    fn failed(name: &str, reason: String) -> Self {
        Self {
            name: name.to_string(),
            status: ServerStatus::Failed,
            tools: Vec::new(),
            failure: Some(reason),
            channel: None,
        }
    }

    fn connected(name: &str, channel: Arc<ProcessChannel>, tools: Vec<ToolDescriptor>) -> Self {
        Self {
            name: name.to_string(),
            status: ServerStatus::Connected,
            tools,
            failure: None,
            channel: Some(channel),
        }
    }
}

/// Diagnostic view of one server.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ServerReport {
    pub name: String,
    pub status: ServerStatus,
    pub tool_count: usize,
    pub failure: Option<String>,
}

#[derive(Default)]
struct RegistryInner {
    initialized: bool,
    connections: BTreeMap<String, ServerConnection>,
    catalog: ToolCatalog,
}

impl RegistryInner {
    fn rebuild_catalog(&mut self) {
        let connected: BTreeMap<String, Vec<ToolDescriptor>> = self
            .connections
            .values()
            .filter(|c| c.status == ServerStatus::Connected)
            .map(|c| (c.name.clone(), c.tools.clone()))
            .collect();
        self.catalog = ToolCatalog::from_servers(&connected);
    }
}

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Catalog of configured tool servers and their live channels.
pub struct ToolRegistry {
    settings: RegistrySettings,
    inner: RwLock<RegistryInner>,
    /// Serializes `initialize`, `attach` and `close`.
    lifecycle: Mutex<()>,
}

impl ToolRegistry {
    pub fn new(settings: RegistrySettings) -> Self {
        Self {
            settings,
            inner: RwLock::new(RegistryInner::default()),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Launch every configured server concurrently and build the catalog.
    ///
    /// Each server gets its own timeout and all of them share one overall
    /// deadline; servers still starting when it passes are marked failed.
    /// Returns the servers that failed. Calling again before `close()` is a
    /// no-op.
    pub async fn initialize(
        &self,
        configs: &BTreeMap<String, ServerConfig>,
    ) -> Vec<(String, McpError)> {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut inner = self.inner.write().await;
            if inner.initialized {
                tracing::debug!("tool registry already initialized");
                return Vec::new();
            }
            inner.initialized = true;
            for name in configs.keys() {
                inner
                    .connections
                    .insert(name.clone(), ServerConnection::unconnected(name));
            }
        }

        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.settings.init_timeout;
        let server_timeout = self.settings.server_timeout;
        let channel_settings = self.settings.channel;

        let mut pending: FuturesUnordered<_> = configs
            .iter()
            .map(|(name, config)| async move {
                let outcome = tokio::time::timeout(
                    server_timeout,
                    connect_process(name, config, channel_settings),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(McpError::HandshakeTimeout {
                        name: name.clone(),
                        timeout_ms: server_timeout.as_millis() as u64,
                    })
                });
                (name.clone(), outcome)
            })
            .collect();

        let mut finished: Vec<(String, Result<(Arc<ProcessChannel>, Vec<ToolDescriptor>), McpError>)> =
            Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some(done)) => finished.push(done),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        still_starting = pending.len(),
                        "tool server startup deadline passed"
                    );
                    break;
                }
            }
        }
        // Dropping the stragglers kills their processes.
        drop(pending);

        let mut failures = Vec::new();
        let mut inner = self.inner.write().await;
        let done: HashSet<String> = finished.iter().map(|(name, _)| name.clone()).collect();

        for (name, outcome) in finished {
            match outcome {
                Ok((channel, tools)) => {
                    tracing::info!(server = %name, tool_count = tools.len(), "tool server connected");
                    inner
                        .connections
                        .insert(name.clone(), ServerConnection::connected(&name, channel, tools));
                }
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "tool server unavailable");
                    inner
                        .connections
                        .insert(name.clone(), ServerConnection::failed(&name, e.to_string()));
                    failures.push((name, e));
                }
            }
        }

        for name in configs.keys().filter(|n| !done.contains(*n)) {
            let e = McpError::HandshakeTimeout {
                name: name.clone(),
                timeout_ms: self.settings.init_timeout.as_millis() as u64,
            };
            inner
                .connections
                .insert(name.clone(), ServerConnection::failed(name, e.to_string()));
            failures.push((name.clone(), e));
        }

        inner.rebuild_catalog();
        tracing::info!(
            configured = configs.len(),
            connected = configs.len() - failures.len(),
            tools = inner.catalog.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tool registry initialized"
        );
        failures
    }

    /// Connect a server over an already-open channel (e.g. one served
    /// in-process). Replaces any server with the same name.
    pub async fn attach(&self, channel: ProcessChannel) -> Result<usize, McpError> {
        let _lifecycle = self.lifecycle.lock().await;
        let name = channel.name().to_string();
        let (channel, tools) = connect_channel(channel).await?;
        let count = tools.len();

        let previous = {
            let mut inner = self.inner.write().await;
            inner.initialized = true;
            let previous = inner
                .connections
                .insert(name.clone(), ServerConnection::connected(&name, channel, tools))
                .and_then(|c| c.channel);
            inner.rebuild_catalog();
            previous
        };
        if let Some(old) = previous {
            old.close().await;
        }
        Ok(count)
    }

    /// Close every live channel and forget all servers. Safe to call more
    /// than once; the registry can be initialized again afterwards.
    pub async fn close(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let channels: Vec<Arc<ProcessChannel>> = {
            let mut inner = self.inner.write().await;
            let taken = std::mem::take(&mut *inner);
            taken
                .connections
                .into_values()
                .filter_map(|c| c.channel)
                .collect()
        };

        if channels.is_empty() {
            return;
        }
        tracing::info!(count = channels.len(), "closing tool servers");
        futures::future::join_all(channels.iter().map(|c| c.close())).await;
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    /// Tools of every connected server, keyed by server name.
    pub async fn available_tools(&self) -> BTreeMap<String, Vec<ToolDescriptor>> {
        let inner = self.inner.read().await;
        inner
            .connections
            .values()
            .filter(|c| c.status == ServerStatus::Connected)
            .map(|c| (c.name.clone(), c.tools.clone()))
            .collect()
    }

    /// Snapshot of the catalog built from connected servers.
    pub async fn catalog(&self) -> ToolCatalog {
        self.inner.read().await.catalog.clone()
    }

    /// Status of every configured server.
    pub async fn server_statuses(&self) -> Vec<ServerReport> {
        let inner = self.inner.read().await;
        inner
            .connections
            .values()
            .map(|c| ServerReport {
                name: c.name.clone(),
                status: c.status,
                tool_count: c.tools.len(),
                failure: c.failure.clone(),
            })
            .collect()
    }

    // ─── Tool Execution ──────────────────────────────────────────────────

    /// Invoke `tool` on `server`.
    ///
    /// Servers that are not connected fail fast with
    /// `"server not connected"`. If the call reveals that the process died,
    /// the server is marked failed and its tools leave the catalog.
    pub async fn call(
        &self,
        server: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> ToolCallResult {
        let channel = {
            let inner = self.inner.read().await;
            inner
                .connections
                .get(server)
                .filter(|c| c.status == ServerStatus::Connected)
                .and_then(|c| c.channel.clone())
        };

        let Some(channel) = channel else {
            tracing::debug!(server, tool, "call to unavailable server");
            let err = McpError::ServerUnavailable {
                name: server.to_string(),
            };
            return ToolCallResult::failed(server, tool, err.to_string(), 0);
        };

        let result = channel.call(tool, arguments).await;

        if channel.state() == ChannelState::Failed {
            self.mark_failed(server, &channel, "process terminated").await;
        }
        result
    }

    async fn mark_failed(&self, server: &str, channel: &Arc<ProcessChannel>, reason: &str) {
        let detached = {
            let mut inner = self.inner.write().await;
            let Some(conn) = inner.connections.get_mut(server) else {
                return;
            };
            // Only if the connection still holds this very channel.
            let same = conn
                .channel
                .as_ref()
                .map(|c| Arc::ptr_eq(c, channel))
                .unwrap_or(false);
            if !same {
                return;
            }
            conn.status = ServerStatus::Failed;
            conn.failure = Some(reason.to_string());
            conn.tools.clear();
            let detached = conn.channel.take();
            inner.rebuild_catalog();
            detached
        };

        tracing::error!(server, reason, "tool server marked failed");
        if let Some(channel) = detached {
            channel.close().await;
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(RegistrySettings::default())
    }
}

#[async_trait]
impl ToolProvider for ToolRegistry {
    async fn catalog(&self) -> ToolCatalog {
        ToolRegistry::catalog(self).await
    }

    async fn call(
        &self,
        server: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> ToolCallResult {
        ToolRegistry::call(self, server, tool, arguments).await
    }
}

// ─── Connecting ──────────────────────────────────────────────────────────────

async fn connect_process(
    name: &str,
    config: &ServerConfig,
    settings: ChannelSettings,
) -> Result<(Arc<ProcessChannel>, Vec<ToolDescriptor>), McpError> {
    let channel = ProcessChannel::launch(name, config, settings)?;
    connect_channel(channel).await
}

/// Handshake and list tools; close the channel on failure.
async fn connect_channel(
    channel: ProcessChannel,
) -> Result<(Arc<ProcessChannel>, Vec<ToolDescriptor>), McpError> {
    if let Err(e) = channel.handshake().await {
        channel.close().await;
        return Err(e);
    }

    let tools = channel.list_tools().await;
    if channel.state() == ChannelState::Failed {
        channel.close().await;
        return Err(McpError::ProcessExited {
            name: channel.name().to_string(),
            stderr: String::new(),
        });
    }

    Ok((Arc::new(channel), tools))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_server::{serve, CalculatorServer};
    use tokio::io::{duplex, BufReader};

    fn fast_settings() -> RegistrySettings {
        RegistrySettings {
            init_timeout: Duration::from_secs(2),
            server_timeout: Duration::from_secs(1),
            channel: ChannelSettings {
                handshake_timeout: Duration::from_millis(500),
                call_timeout: Duration::from_millis(500),
                shutdown_grace: Duration::from_millis(100),
                max_attempts: 10,
            },
        }
    }

    /// In-process calculator; returns the channel and a handle whose abort
    /// simulates the server process dying.
    fn calculator_channel(name: &str) -> (ProcessChannel, tokio::task::JoinHandle<()>) {
        let (client_out, server_in) = duplex(64 * 1024);
        let (server_out, client_in) = duplex(64 * 1024);
        let task = tokio::spawn(async move {
            let _ = serve(BufReader::new(server_in), server_out, CalculatorServer).await;
        });
        let channel = ProcessChannel::from_streams(
            name,
            Box::new(client_out),
            Box::new(client_in),
            fast_settings().channel,
        );
        (channel, task)
    }

    #[tokio::test]
    async fn test_empty_before_initialize() {
        let registry = ToolRegistry::new(fast_settings());
        assert!(registry.available_tools().await.is_empty());
        assert!(registry.catalog().await.is_empty());
        let result = registry.call("calculator", "add", serde_json::json!({})).await;
        assert_eq!(result.error.as_deref(), Some("server not connected"));
    }

    #[tokio::test]
    async fn test_missing_executable_is_excluded() {
        let registry = ToolRegistry::new(fast_settings());
        let mut configs = BTreeMap::new();
        configs.insert(
            "ghost".to_string(),
            ServerConfig::new("/nonexistent/path/to/ghost-server"),
        );

        let failures = registry.initialize(&configs).await;
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].1, McpError::ExecutableNotFound { .. }));
        assert!(registry.available_tools().await.is_empty());

        let statuses = registry.server_statuses().await;
        assert_eq!(statuses[0].status, ServerStatus::Failed);

        let result = registry.call("ghost", "echo", serde_json::json!({})).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("server not connected"));

        // Second initialize is a no-op.
        assert!(registry.initialize(&configs).await.is_empty());
        registry.close().await;
    }

    #[tokio::test]
    async fn test_attach_and_call() {
        let registry = ToolRegistry::new(fast_settings());
        let (channel, _task) = calculator_channel("calculator");
        assert_eq!(registry.attach(channel).await.unwrap(), 3);

        let tools = registry.available_tools().await;
        let names: Vec<&str> = tools["calculator"].iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["add", "multiply", "divide"]);

        let result = registry
            .call("calculator", "add", serde_json::json!({"a": 2, "b": 3}))
            .await;
        assert!(result.success);
        assert_eq!(result.server, "calculator");
        assert_eq!(result.render(), "2 + 3 = 5.0");

        let provider: &dyn ToolProvider = &registry;
        assert_eq!(provider.catalog().await.len(), 3);
    }

    #[tokio::test]
    async fn test_dead_server_is_marked_failed() {
        let registry = ToolRegistry::new(fast_settings());
        let (channel, task) = calculator_channel("calculator");
        registry.attach(channel).await.unwrap();

        task.abort();
        let _ = task.await;

        let result = registry
            .call("calculator", "add", serde_json::json!({"a": 1, "b": 1}))
            .await;
        assert_eq!(result.error.as_deref(), Some("process terminated"));

        let statuses = registry.server_statuses().await;
        assert_eq!(statuses[0].status, ServerStatus::Failed);
        assert!(registry.catalog().await.is_empty());

        let again = registry
            .call("calculator", "add", serde_json::json!({"a": 1, "b": 1}))
            .await;
        assert_eq!(again.error.as_deref(), Some("server not connected"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let registry = ToolRegistry::new(fast_settings());
        let (channel, _task) = calculator_channel("calculator");
        registry.attach(channel).await.unwrap();

        registry.close().await;
        registry.close().await;
        assert!(registry.available_tools().await.is_empty());
        assert!(registry.server_statuses().await.is_empty());

        let result = registry
            .call("calculator", "add", serde_json::json!({"a": 1, "b": 1}))
            .await;
        assert_eq!(result.error.as_deref(), Some("server not connected"));
    }
}
