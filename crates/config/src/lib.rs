//! Configuration loading, validation, and management for switchboard.
//!
//! Loads runner defaults from `~/.switchboard/config.toml` with environment
//! variable overrides. Validates all settings before a run starts.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use switchboard_core::ConversationMemory;

/// The root configuration structure.
///
/// Maps directly to `~/.switchboard/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Turn budget for a single run (model calls, not tool calls)
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// What a failing tool does to the run
    #[serde(default)]
    pub tool_errors: ToolErrorPolicy,

    /// Capacity of the stream event channel for streamed runs
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    /// Conversation memory defaults
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Run tracing
    #[serde(default)]
    pub tracing: TracingConfig,
}

fn default_max_turns() -> u32 {
    10
}
fn default_stream_buffer() -> usize {
    128
}
fn default_true() -> bool {
    true
}
fn default_workflow_name() -> String {
    "Agent workflow".into()
}

/// How tool failures are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorPolicy {
    /// The failure becomes an error tool result the model can react to.
    #[default]
    Fold,
    /// The first failure aborts the run.
    Fatal,
}

impl std::str::FromStr for ToolErrorPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fold" => Ok(Self::Fold),
            "fatal" => Ok(Self::Fatal),
            other => Err(ConfigError::ValidationError(format!(
                "tool_errors must be 'fold' or 'fatal', got '{other}'"
            ))),
        }
    }
}

/// Which side keeps the transcript.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryMode {
    #[default]
    FullHistory,
    ServerConversation,
    ServerPreviousResponse,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub mode: MemoryMode,

    /// Required for `server_conversation`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Optional seed for `server_previous_response`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
}

impl MemoryConfig {
    /// Resolve the configured mode into the runner's memory type.
    pub fn to_conversation_memory(&self) -> Result<ConversationMemory, ConfigError> {
        match self.mode {
            MemoryMode::FullHistory => Ok(ConversationMemory::FullHistory),
            MemoryMode::ServerConversation => {
                let conversation_id = self
                    .conversation_id
                    .clone()
                    .filter(|id| !id.trim().is_empty())
                    .ok_or_else(|| {
                        ConfigError::ValidationError(
                            "memory.conversation_id is required for server_conversation".into(),
                        )
                    })?;
                Ok(ConversationMemory::ServerConversation { conversation_id })
            }
            MemoryMode::ServerPreviousResponse => Ok(ConversationMemory::ServerPreviousResponse {
                previous_response_id: self.previous_response_id.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Label of the root span of each run
    #[serde(default = "default_workflow_name")]
    pub workflow_name: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workflow_name: default_workflow_name(),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from the default path (~/.switchboard/config.toml).
    ///
    /// Environment variables override the file:
    /// - `SWITCHBOARD_MAX_TURNS`
    /// - `SWITCHBOARD_TOOL_ERRORS` (`fold` or `fatal`)
    /// - `SWITCHBOARD_TRACING_DISABLED` (`1` or `true`)
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

    /// Apply overrides from an environment lookup.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = lookup("SWITCHBOARD_MAX_TURNS") {
            self.max_turns = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "SWITCHBOARD_MAX_TURNS must be a positive integer, got '{raw}'"
                ))
            })?;
        }

        if let Some(raw) = lookup("SWITCHBOARD_TOOL_ERRORS") {
            self.tool_errors = raw.parse()?;
        }

        if let Some(raw) = lookup("SWITCHBOARD_TRACING_DISABLED") {
            let raw = raw.trim().to_ascii_lowercase();
            if raw == "1" || raw == "true" {
                self.tracing.enabled = false;
            }
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".switchboard")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "max_turns must be at least 1".into(),
            ));
        }

        if self.stream_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "stream_buffer must be at least 1".into(),
            ));
        }

        self.memory.to_conversation_memory()?;
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            tool_errors: ToolErrorPolicy::default(),
            stream_buffer: default_stream_buffer(),
            memory: MemoryConfig::default(),
            tracing: TracingConfig::default(),
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
