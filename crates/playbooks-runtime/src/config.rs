//! Runtime configuration.
//!
//! Loaded from a TOML file when present, with defaults suitable for local
//! development.  Every knob the core consults lives here: the artifact
//! threshold, state-compression policy, durability settings, inbox bounds,
//! and the LLM endpoint.

use std::path::Path;

use playbooks_state::StateCompressionConfig;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Durability (checkpointing) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DurabilityConfig {
    /// Whether per-statement checkpointing is enabled.
    pub enabled: bool,
    /// Base directory for checkpoint storage.
    pub storage_path: String,
    /// Maximum size of a single checkpoint, in megabytes.
    pub max_checkpoint_size_mb: usize,
    /// Checkpoints retained per agent.
    pub keep_last_n: usize,
}

impl Default for DurabilityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            storage_path: ".checkpoints".to_string(),
            max_checkpoint_size_mb: 10,
            keep_last_n: 10,
        }
    }
}

/// LLM endpoint settings for the bundled OpenAI-compatible chunk source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible chat-completions endpoint.
    pub api_base: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Model identifier.
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o".to_string(),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Playbook results (and variable values) longer than this many bytes
    /// are stored as artifacts; the value itself becomes the artifact name.
    pub artifact_result_threshold: usize,
    /// Inbox queue bound per agent.
    pub inbox_capacity: usize,
    /// I/P-frame state compression policy.
    pub compression: StateCompressionConfig,
    /// Checkpointing.
    pub durability: DurabilityConfig,
    /// LLM endpoint.
    pub llm: LlmConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            artifact_result_threshold: 80,
            inbox_capacity: 1000,
            compression: StateCompressionConfig::default(),
            durability: DurabilityConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Load from a file, or defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.artifact_result_threshold, 80);
        assert_eq!(config.inbox_capacity, 1000);
        assert!(config.compression.enabled);
        assert!(!config.durability.enabled);
        assert_eq!(config.durability.keep_last_n, 10);
    }

    #[test]
    fn partial_toml_overlays_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            artifact_result_threshold = 120

            [durability]
            enabled = true
            storage_path = "/tmp/ckpts"

            [compression]
            enabled = true
            i_frame_interval = 3
            "#,
        )
        .expect("parse");

        assert_eq!(config.artifact_result_threshold, 120);
        assert!(config.durability.enabled);
        assert_eq!(config.durability.storage_path, "/tmp/ckpts");
        assert_eq!(config.durability.max_checkpoint_size_mb, 10);
        assert_eq!(config.compression.i_frame_interval, 3);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(RuntimeConfig::from_toml_str("artifact_result_threshold = \"not a number\"").is_err());
    }
}
