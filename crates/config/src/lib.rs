//! Configuration loading, validation, and management for BimPilot.
//!
//! Loads configuration from `~/.bimpilot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use bimpilot_core::ToolExecutionMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.bimpilot/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the reasoning engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider name used in logs
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Captured-frame store
    #[serde(default)]
    pub frames: FrameConfig,

    /// Tool backend (MCP server) process
    #[serde(default)]
    pub mcp: McpServerConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-5.2".into()
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("agent", &self.agent)
            .field("frames", &self.frames)
            .field("mcp", &self.mcp)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Maximum inference steps per task
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Completion token budget per step
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature; unset leaves it to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// How the tool calls of one step are executed
    #[serde(default)]
    pub tool_execution: ToolExecutionMode,

    #[serde(default = "default_inference_timeout")]
    pub inference_timeout_secs: u64,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Replace the built-in navigator instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_override: Option<String>,
}

fn default_max_steps() -> u32 {
    30
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_inference_timeout() -> u64 {
    180
}
fn default_tool_timeout() -> u64 {
    60
}

impl AgentSettings {
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_tokens: default_max_tokens(),
            temperature: None,
            tool_execution: ToolExecutionMode::default(),
            inference_timeout_secs: default_inference_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            system_prompt_override: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameConfig {
    /// Persist captured images for later inspection
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Where frames go; defaults to `~/.bimpilot/frames`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// How many frames each task keeps
    #[serde(default = "default_frame_capacity")]
    pub capacity: usize,
}

fn default_frame_capacity() -> usize {
    10
}

impl FrameConfig {
    /// The configured directory, or the default under the config dir.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("frames"))
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            capacity: default_frame_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Executable that starts the server
    #[serde(default = "default_mcp_command")]
    pub command: String,

    #[serde(default = "default_mcp_args")]
    pub args: Vec<String>,

    /// Working directory of the server process
    #[serde(default = "default_mcp_cwd")]
    pub cwd: PathBuf,

    /// Extra environment for the server process
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Upper bound on any single JSON-RPC round trip
    #[serde(default = "default_mcp_timeout")]
    pub request_timeout_secs: u64,
}

fn default_mcp_command() -> String {
    "npx".into()
}
fn default_mcp_args() -> Vec<String> {
    vec!["tsx".into(), "index.ts".into()]
}
fn default_mcp_cwd() -> PathBuf {
    PathBuf::from("mcp-server")
}
fn default_mcp_timeout() -> u64 {
    180
}

impl McpServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            command: default_mcp_command(),
            args: default_mcp_args(),
            cwd: default_mcp_cwd(),
            env: HashMap::new(),
            request_timeout_secs: default_mcp_timeout(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.bimpilot/config.toml).
    ///
    /// Also checks environment variables:
    /// - `BIMPILOT_API_KEY`, then `OPENAI_API_KEY`
    /// - `BIMPILOT_API_URL`
    /// - `BIMPILOT_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
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

    /// Apply environment overrides through a lookup function.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("BIMPILOT_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(url) = lookup("BIMPILOT_API_URL") {
            self.api_url = url;
        }
        if let Some(model) = lookup("BIMPILOT_MODEL") {
            self.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".bimpilot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be greater than 0".into(),
            ));
        }

        if let Some(t) = self.agent.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::ValidationError(
                    "agent.temperature must be between 0.0 and 2.0".into(),
                ));
            }
        }

        if self.agent.inference_timeout_secs == 0
            || self.agent.tool_timeout_secs == 0
            || self.mcp.request_timeout_secs == 0
        {
            return Err(ConfigError::ValidationError(
                "timeouts must be greater than 0 seconds".into(),
            ));
        }

        if self.frames.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "frames.capacity must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            api_url: default_api_url(),
            default_model: default_model(),
            agent: AgentSettings::default(),
            frames: FrameConfig::default(),
            mcp: McpServerConfig::default(),
        }
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
