//! Model endpoint configuration.
//!
//! The `models` section of the agent config: named OpenAI-compatible
//! endpoints, the active one, and the fallback chain tried when it is down.
//! Loading and env-var interpolation live in [`crate::config`].

use std::collections::HashMap;

use serde::Deserialize;

use super::errors::InferenceError;

/// Marker in `fallback_chain` for "no model left". Skipped when resolving.
pub const STATIC_RESPONSE: &str = "static_response";

/// A single model's endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub display_name: String,
    /// Base URL up to and including the API version, e.g. `http://localhost:11434/v1`.
    pub base_url: String,
    /// Model identifier sent in the request body.
    pub model_name: String,
    /// Sent as a bearer token when present and non-empty.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}

/// The `models` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    pub active_model: String,
    pub models: HashMap<String, ModelConfig>,
    #[serde(default)]
    pub fallback_chain: Vec<String>,
}

impl ModelsConfig {
    /// Model keys to try, in order, starting from `first`.
    ///
    /// `first` leads, then the fallback chain. Unknown keys, duplicates and
    /// the static-response marker are dropped.
    pub fn candidates(&self, first: &str) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for key in std::iter::once(first).chain(self.fallback_chain.iter().map(String::as_str)) {
            if key == STATIC_RESPONSE || !self.models.contains_key(key) {
                continue;
            }
            if !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }
        keys
    }
}

/// Resolve the active model configuration, respecting the fallback chain.
///
/// Returns `(model_key, ModelConfig)` for the first configured model.
/// Connectivity is checked at request time by the client.
pub fn resolve_active_model(config: &ModelsConfig) -> Result<(String, ModelConfig), InferenceError> {
    config
        .candidates(&config.active_model)
        .into_iter()
        .next()
        .and_then(|key| config.models.get(&key).map(|m| (key, m.clone())))
        .ok_or_else(|| InferenceError::ConfigError {
            reason: format!(
                "active model '{}' not found in config and no fallback available",
                config.active_model
            ),
        })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
