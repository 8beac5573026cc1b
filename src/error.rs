//! Error types for device-link operations
//!
//! Failures are isolated to their causing unit of work: a failed command
//! surfaces only to its caller, transport errors are recovered by the
//! reconnection logic, and only an exhausted reconnection cycle becomes a
//! terminal session error.

use crate::transport::ws::ConnectionState;
use thiserror::Error;

/// Main error type for device-link operations
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Invalid controller URL: {0}")]
    InvalidUrl(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Command '{action}' timed out")]
    CommandTimeout { action: String },

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Link task is not running")]
    ChannelClosed,

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl LinkError {
    /// Create a transport error from any underlying cause
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a peer-reported command failure
    pub fn command_failed<S: Into<String>>(message: S) -> Self {
        Self::CommandFailed {
            message: message.into(),
        }
    }

    /// Create a per-command timeout error
    pub fn command_timeout<S: Into<String>>(action: S) -> Self {
        Self::CommandTimeout {
            action: action.into(),
        }
    }
}

/// Result type for device-link operations
pub type LinkResult<T> = Result<T, LinkError>;
