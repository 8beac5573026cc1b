//! Configuration for the device-control link client
//!
//! Every timing knob has a documented default so a minimal config only needs
//! the controller URL. Files are TOML with a `[client]` identity section and
//! a `[link]` transport section.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Top-level configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkConfig {
    pub client: ClientSection,
    #[serde(default)]
    pub link: LinkSection,
}

/// Client identity section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// Client identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    /// Description of this client, for logging only
    #[serde(default)]
    pub description: Option<String>,
}

/// Transport and resilience tuning section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkSection {
    /// Controller WebSocket URL (ws:// or wss://)
    #[serde(default = "default_url")]
    pub url: String,
    /// Reconnection attempts before the session goes terminal
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    /// Base reconnection backoff delay in milliseconds
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Backoff cap in milliseconds
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,
    /// Interval between outbound heartbeat envelopes in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Per-command response timeout in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Interval between inbound-staleness checks in milliseconds
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    /// Inbound silence tolerated before the connection is declared dead
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
}

fn default_url() -> String {
    "ws://127.0.0.1:8765/ws".to_string()
}

fn default_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

fn default_health_check_interval_ms() -> u64 {
    5000
}

fn default_message_timeout_ms() -> u64 {
    60_000
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            url: default_url(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            message_timeout_ms: default_message_timeout_ms(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid client ID format: {0}")]
    InvalidClientId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LinkConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: LinkConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate identity and timing constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_client_id(&self.client.id)?;
        self.link.validate()
    }
}

impl LinkSection {
    /// Validate timing constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(ConfigError::InvalidConfig(format!(
                "url must use ws:// or wss:// scheme, got: {}",
                self.url
            )));
        }
        if self.reconnect_delay_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_reconnect_delay_ms < self.reconnect_delay_ms {
            return Err(ConfigError::InvalidConfig(
                "max_reconnect_delay_ms must be >= reconnect_delay_ms".to_string(),
            ));
        }
        if self.command_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "command_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == 0 || self.health_check_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "heartbeat_interval_ms and health_check_interval_ms must be greater than 0"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Validate client ID against the allowed character set
fn validate_client_id(id: &str) -> Result<(), ConfigError> {
    if id.is_empty()
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(ConfigError::InvalidClientId(id.to_string()));
    }
    Ok(())
}
