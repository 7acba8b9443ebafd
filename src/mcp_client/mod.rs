//! Tool-server client: JSON-RPC over stdio to external tool servers.
//!
//! This module handles:
//! - Spawning tool-server child processes and draining their stderr
//! - Line-delimited JSON-RPC 2.0 with id correlation and bounded reads
//! - The `initialize` handshake and `tools/list` discovery
//! - A registry that launches all servers concurrently and routes calls
//! - Name resolution and argument validation over the aggregated catalog
//!
//! The orchestrator reaches tools only through the [`ToolProvider`] trait,
//! which [`ToolRegistry`] implements.

pub mod catalog;
pub mod channel;
pub mod errors;
pub mod fallback_tools;
pub mod registry;
pub mod transport;
pub mod types;

pub use catalog::{ToolCatalog, ToolResolution};
pub use channel::{ChannelSettings, ChannelState, ProcessChannel};
pub use errors::McpError;
pub use registry::{RegistrySettings, ServerReport, ToolProvider, ToolRegistry};
pub use types::{ServerConfig, ServerStatus, ToolCallResult, ToolDescriptor};
