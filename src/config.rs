//! Agent configuration file (`mcp-agent.yaml`).
//!
//! One YAML document with four sections: `models` (required), `servers`,
//! `registry` and `agent`. String values may reference the environment as
//! `${VAR}` or `${VAR:-default}`; a default starting with `~` is expanded to
//! the home directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::agent_core::OrchestratorSettings;
use crate::inference::ModelsConfig;
use crate::mcp_client::{ChannelSettings, RegistrySettings, ServerConfig};

/// File searched for when no path is given.
pub const CONFIG_FILE_NAME: &str = "mcp-agent.yaml";

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "MCP_AGENT_CONFIG";

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not find mcp-agent.yaml (pass a path or set MCP_AGENT_CONFIG)")]
    NotFound,

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── Sections ───────────────────────────────────────────────────────────────

/// The whole configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub models: ModelsConfig,
    /// Tool servers by name. Empty is allowed: the agent then answers directly.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Registry and channel timeouts, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub init_timeout_ms: u64,
    pub server_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub call_timeout_ms: u64,
    pub max_response_attempts: u32,
    pub shutdown_grace_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let defaults = RegistrySettings::default();
        Self {
            init_timeout_ms: millis(defaults.init_timeout),
            server_timeout_ms: millis(defaults.server_timeout),
            handshake_timeout_ms: millis(defaults.channel.handshake_timeout),
            call_timeout_ms: millis(defaults.channel.call_timeout),
            max_response_attempts: defaults.channel.max_attempts,
            shutdown_grace_ms: millis(defaults.channel.shutdown_grace),
        }
    }
}

impl RegistryConfig {
    pub fn settings(&self) -> RegistrySettings {
        RegistrySettings {
            init_timeout: Duration::from_millis(self.init_timeout_ms),
            server_timeout: Duration::from_millis(self.server_timeout_ms),
            channel: ChannelSettings {
                handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
                call_timeout: Duration::from_millis(self.call_timeout_ms),
                shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
                max_attempts: self.max_response_attempts.max(1),
            },
        }
    }
}

/// Orchestrator knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_iterations: u32,
    pub parallel_tool_calls: bool,
    pub history_window: usize,
    pub model_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let defaults = OrchestratorSettings::default();
        Self {
            max_iterations: defaults.max_iterations,
            parallel_tool_calls: defaults.parallel_tool_calls,
            history_window: defaults.history_window,
            model_timeout_ms: millis(defaults.model_timeout),
        }
    }
}

impl AgentConfig {
    /// Settings with `max_iterations` clamped to `1..=10`.
    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            max_iterations: self.max_iterations,
            parallel_tool_calls: self.parallel_tool_calls,
            history_window: self.history_window,
            model_timeout: Duration::from_millis(self.model_timeout_ms),
        }
        .with_max_iterations(self.max_iterations)
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

// ─── Loading ────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Locate and load the config: `explicit`, else `$MCP_AGENT_CONFIG`, else
    /// the nearest `mcp-agent.yaml` at or above the working directory.
    pub fn load(explicit: Option<&Path>) -> Result<(PathBuf, Self), ConfigError> {
        let path = find_config_path(explicit)?;
        let config = Self::from_file(&path)?;
        Ok((path, config))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse_yaml(&raw, path)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_paths(base);
        }
        Ok(config)
    }

    /// Parse and validate a config document. `path` is used in errors only.
    pub fn parse_yaml(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let interpolated = interpolate_env_vars(raw);
        let config: Self =
            serde_yaml::from_str(&interpolated).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.models.candidates(&self.models.active_model).is_empty() {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "active model '{}' is not defined and no fallback is available",
                    self.models.active_model
                ),
            });
        }
        if let Some((name, _)) = self
            .servers
            .iter()
            .find(|(_, server)| server.command.trim().is_empty())
        {
            return Err(ConfigError::Invalid {
                reason: format!("server '{name}' has an empty command"),
            });
        }
        Ok(())
    }

    /// Relative `cwd`s, and commands given as relative paths (`./server`),
    /// are taken relative to the config file's directory.
    fn resolve_relative_paths(&mut self, base: &Path) {
        for server in self.servers.values_mut() {
            if let Some(cwd) = server.cwd.as_mut() {
                if Path::new(cwd.as_str()).is_relative() {
                    *cwd = base.join(&*cwd).to_string_lossy().into_owned();
                }
            }
            let command = Path::new(&server.command);
            if command.is_relative() && command.components().count() > 1 {
                server.command = base.join(command).to_string_lossy().into_owned();
            }
        }
    }
}

/// Resolve which config file to load.
pub fn find_config_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let from_env = std::env::var(CONFIG_ENV_VAR)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from);
    let cwd = std::env::current_dir().unwrap_or_default();
    locate(explicit, from_env, &cwd)
}

fn locate(
    explicit: Option<&Path>,
    from_env: Option<PathBuf>,
    start: &Path,
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = from_env {
        return Ok(path);
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if !dir.pop() {
            return Err(ConfigError::NotFound);
        }
    }
}

// ─── Env-var interpolation ──────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}`. An unterminated `${` is kept as-is.
fn interpolate_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&resolve_var_expr(&after[..end]));
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// `VAR` or `VAR:-default`. Unset without a default resolves to empty.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name.trim())
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| expand_tilde(default)),
        None => std::env::var(expr.trim()).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) => format!("{}{rest}", home.display()),
        _ => path.to_string(),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
