//! Tool-calling LLM agent over line-delimited JSON-RPC tool servers.
//!
//! - `mcp_client`: process channels to tool servers and the registry over them
//! - `inference`: OpenAI-compatible model client with a fallback chain
//! - `agent_core`: the per-turn orchestration state machine
//! - `tool_server`: server side of the protocol, plus a calculator server
//! - `config`: the `mcp-agent.yaml` file
//! - `logging`: tracing setup for the binaries

pub mod agent_core;
pub mod config;
pub mod inference;
pub mod logging;
pub mod mcp_client;
pub mod tool_server;
