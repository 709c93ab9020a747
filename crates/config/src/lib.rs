//! Configuration for the Overture turn engine.
//!
//! Loads from a TOML file with every field defaulted, so an empty file (or
//! no file at all) yields a working configuration. The defaults here are the
//! single source of truth for the engine's governance numbers.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use overture_core::AccessClass;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Turn orchestration settings
    #[serde(default)]
    pub turn: TurnConfig,

    /// Per-access-class tool call caps
    #[serde(default)]
    pub tool_caps: ToolCapsConfig,

    /// Message admission rate limits
    #[serde(default)]
    pub rate: RateConfig,

    /// Streaming transport settings
    #[serde(default)]
    pub stream: StreamConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&raw)?;
        tracing::debug!(path = %path.as_ref().display(), "Configuration loaded");
        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            turn: TurnConfig::default(),
            tool_caps: ToolCapsConfig::default(),
            rate: RateConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

/// Settings governing one orchestrator turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Maximum provider round-trips per turn before the turn is aborted
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Model context window, in estimated tokens
    #[serde(default = "default_context_window")]
    pub context_window: u32,

    /// Maximum user message length, in characters
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    /// Sampling temperature for provider requests
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            context_window: default_context_window(),
            max_message_chars: default_max_message_chars(),
            temperature: default_temperature(),
        }
    }
}

fn default_max_iterations() -> u32 {
    25
}
fn default_context_window() -> u32 {
    128_000
}
fn default_max_message_chars() -> usize {
    32_000
}
fn default_temperature() -> f32 {
    0.7
}

/// Per-turn, per-tool-name call caps by access class.
///
/// Ordering invariant: delete < write-family < update < read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCapsConfig {
    #[serde(default = "default_read_cap")]
    pub read: u32,

    #[serde(default = "default_write_cap")]
    pub write: u32,

    #[serde(default = "default_create_cap")]
    pub create: u32,

    #[serde(default = "default_update_cap")]
    pub update: u32,

    #[serde(default = "default_delete_cap")]
    pub delete: u32,
}

impl ToolCapsConfig {
    /// The per-turn cap for a tool of the given class.
    pub fn cap_for(&self, class: AccessClass) -> u32 {
        match class {
            AccessClass::Read => self.read,
            AccessClass::Write => self.write,
            AccessClass::Create => self.create,
            AccessClass::Update => self.update,
            AccessClass::Delete => self.delete,
        }
    }
}

impl Default for ToolCapsConfig {
    fn default() -> Self {
        Self {
            read: default_read_cap(),
            write: default_write_cap(),
            create: default_create_cap(),
            update: default_update_cap(),
            delete: default_delete_cap(),
        }
    }
}

fn default_read_cap() -> u32 {
    500
}
fn default_write_cap() -> u32 {
    50
}
fn default_create_cap() -> u32 {
    50
}
fn default_update_cap() -> u32 {
    100
}
fn default_delete_cap() -> u32 {
    5
}

/// Message admission limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateConfig {
    /// Messages per user per minute
    #[serde(default = "default_user_per_minute")]
    pub user_per_minute: usize,

    /// Messages per user per hour
    #[serde(default = "default_user_per_hour")]
    pub user_per_hour: usize,

    /// Messages per tenant per minute
    #[serde(default = "default_tenant_per_minute")]
    pub tenant_per_minute: usize,

    /// How often the limiter sweeps decayed windows, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            user_per_minute: default_user_per_minute(),
            user_per_hour: default_user_per_hour(),
            tenant_per_minute: default_tenant_per_minute(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_user_per_minute() -> usize {
    10
}
fn default_user_per_hour() -> usize {
    100
}
fn default_tenant_per_minute() -> usize {
    50
}
fn default_sweep_interval_secs() -> u64 {
    300
}

/// Streaming transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Keep-alive ping interval, in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Upstream stream read deadline, in seconds
    #[serde(default = "default_read_deadline_secs")]
    pub read_deadline_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: default_keepalive_secs(),
            read_deadline_secs: default_read_deadline_secs(),
        }
    }
}

fn default_keepalive_secs() -> u64 {
    15
}
fn default_read_deadline_secs() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_keep_cap_ordering() {
        let caps = ToolCapsConfig::default();
        assert!(caps.delete < caps.write);
        assert!(caps.delete < caps.create);
        assert!(caps.write < caps.update);
        assert!(caps.update < caps.read);
    }

    #[test]
    fn cap_lookup_by_class() {
        let caps = ToolCapsConfig::default();
        assert_eq!(caps.cap_for(AccessClass::Delete), 5);
        assert_eq!(caps.cap_for(AccessClass::Update), 100);
        assert_eq!(caps.cap_for(AccessClass::Read), 500);
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.turn.max_iterations, 25);
        assert_eq!(config.turn.context_window, 128_000);
        assert_eq!(config.rate.user_per_minute, 10);
        assert_eq!(config.stream.keepalive_secs, 15);
    }

    #[test]
    fn partial_toml_overrides_one_field() {
        let config: AppConfig = toml::from_str(
            r#"
            [turn]
            max_iterations = 4

            [tool_caps]
            delete = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.turn.max_iterations, 4);
        assert_eq!(config.tool_caps.delete, 2);
        // Untouched fields keep their defaults
        assert_eq!(config.tool_caps.read, 500);
        assert_eq!(config.rate.tenant_per_minute, 50);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rate]\nuser_per_hour = 7").unwrap();
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.rate.user_per_hour, 7);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = AppConfig::load("/nonexistent/overture.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
