//! Configuration loading, validation, and management for droidpilot.
//!
//! Loads configuration from `~/.droidpilot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Languages with prompt and message tables.
pub const SUPPORTED_LANGS: &[&str] = &["cn", "en"];

/// The root configuration structure.
///
/// Maps directly to `~/.droidpilot/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Vision-language model endpoint and sampling
    #[serde(default)]
    pub model: ModelConfig,

    /// Agent loop behavior
    #[serde(default)]
    pub agent: AgentSettings,
}

/// Model endpoint and sampling parameters.
#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// OpenAI-compatible base URL (without `/chat/completions`)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_api_key")]
    pub api_key: String,

    #[serde(default = "default_model_name")]
    pub model_name: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_frequency_penalty")]
    pub frequency_penalty: f32,

    /// Whole-request timeout for one model exchange
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra fields merged verbatim into every request body
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra_body: serde_json::Map<String, serde_json::Value>,
}

fn default_base_url() -> String {
    "http://localhost:8000/v1".into()
}
fn default_api_key() -> String {
    "EMPTY".into()
}
fn default_model_name() -> String {
    "autoglm-phone-9b".into()
}
fn default_max_tokens() -> u32 {
    3000
}
fn default_top_p() -> f32 {
    0.85
}
fn default_frequency_penalty() -> f32 {
    0.2
}
fn default_timeout_secs() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: default_api_key(),
            model_name: default_model_name(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            top_p: default_top_p(),
            frequency_penalty: default_frequency_penalty(),
            timeout_secs: default_timeout_secs(),
            extra_body: serde_json::Map::new(),
        }
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model_name", &self.model_name)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("frequency_penalty", &self.frequency_penalty)
            .field("extra_body", &self.extra_body)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Agent loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Step ceiling per task
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Target device serial; `None` lets the bridge pick
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Prompt and message language: "cn" or "en"
    #[serde(default = "default_lang")]
    pub lang: String,

    /// Replaces the built-in system prompt for `lang`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Narrate steps on the console (CLI only)
    #[serde(default = "default_true")]
    pub verbose: bool,

    /// Repeat count at which the retry note escalates; 0 disables escalation
    #[serde(default = "default_retry_threshold")]
    pub retry_reminder_threshold: u32,
}

fn default_max_steps() -> u32 {
    100
}
fn default_lang() -> String {
    "cn".into()
}
fn default_true() -> bool {
    true
}
fn default_retry_threshold() -> u32 {
    3
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            device_id: None,
            lang: default_lang(),
            system_prompt: None,
            verbose: true,
            retry_reminder_threshold: default_retry_threshold(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.droidpilot/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `PHONEAGENT_API_KEY`
    /// - `PHONEAGENT_BASE_URL`
    /// - `PHONEAGENT_MODEL_NAME`
    /// - `DROIDPILOT_MAX_STEPS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in `load`).
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(key) = lookup("PHONEAGENT_API_KEY").filter(|v| !v.is_empty()) {
            self.model.api_key = key;
        }
        if let Some(url) = lookup("PHONEAGENT_BASE_URL").filter(|v| !v.is_empty()) {
            self.model.base_url = url;
        }
        if let Some(name) = lookup("PHONEAGENT_MODEL_NAME").filter(|v| !v.is_empty()) {
            self.model.model_name = name;
        }
        if let Some(raw) = lookup("DROIDPILOT_MAX_STEPS") {
            self.agent.max_steps = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("DROIDPILOT_MAX_STEPS is not a number: {raw}"))
            })?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".droidpilot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.model.top_p <= 0.0 || self.model.top_p > 1.0 {
            return Err(ConfigError::ValidationError(
                "model.top_p must be in (0.0, 1.0]".into(),
            ));
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be at least 1".into(),
            ));
        }

        if !SUPPORTED_LANGS.contains(&self.agent.lang.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "agent.lang must be one of {SUPPORTED_LANGS:?}, got {:?}",
                self.agent.lang
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
