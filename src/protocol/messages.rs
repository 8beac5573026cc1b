//! Wire message types for the device-control link protocol
//!
//! This module defines the JSON envelope exchanged with the remote device
//! controller, plus the typed payloads carried for commands, responses and
//! subscription control.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Message type discriminator carried in the envelope `type` field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Telemetry pushed by the controller for subscribed topics
    StatusUpdate,
    /// Outbound command addressed to a device
    ControlCommand,
    /// Controller's reply correlated to a `ControlCommand`
    CommandResponse,
    /// Liveness probe, sent in both directions and never echoed
    Heartbeat,
    /// Controller-reported fault outside any command context
    Error,
    /// Request for status updates on a set of topics
    Subscribe,
    /// Withdrawal of a previous subscription
    Unsubscribe,
}

/// Envelope wrapping every message on the wire
///
/// Envelopes are immutable once constructed; `id` is unique per message for
/// the lifetime of the process and doubles as the correlation id for
/// commands.
///
/// # Examples
/// ```
/// use devlink::protocol::{Envelope, MessageType};
/// use serde_json::json;
///
/// let envelope = Envelope::new(
///     MessageType::ControlCommand,
///     Some("mount-1".to_string()),
///     json!({"action": "park", "parameters": {}, "response_expected": true}),
/// );
/// assert_eq!(envelope.message_type, MessageType::ControlCommand);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Unique message identifier (UUID v4)
    pub id: Uuid,
    /// Message type discriminator
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Target or source device, absent for session-level messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    /// Milliseconds since the Unix epoch at construction time
    pub timestamp: i64,
    /// Type-specific payload
    pub payload: Value,
}

impl Envelope {
    /// Construct an envelope with a fresh id and the current timestamp.
    pub fn new(message_type: MessageType, peer_id: Option<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type,
            peer_id,
            timestamp: Utc::now().timestamp_millis(),
            payload,
        }
    }

    /// Build a `control_command` envelope from a typed payload.
    pub fn command(
        payload: &CommandPayload,
        peer_id: Option<String>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            MessageType::ControlCommand,
            peer_id,
            serde_json::to_value(payload)?,
        ))
    }

    /// Build a heartbeat envelope (empty payload).
    pub fn heartbeat() -> Self {
        Self::new(
            MessageType::Heartbeat,
            None,
            Value::Object(serde_json::Map::new()),
        )
    }

    /// Build a `subscribe` envelope for a set of topics.
    pub fn subscribe(topics: &[String], peer_id: Option<String>) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            MessageType::Subscribe,
            peer_id,
            serde_json::to_value(SubscriptionPayload {
                topics: topics.to_vec(),
            })?,
        ))
    }

    /// Build an `unsubscribe` envelope for a set of topics.
    pub fn unsubscribe(
        topics: &[String],
        peer_id: Option<String>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            MessageType::Unsubscribe,
            peer_id,
            serde_json::to_value(SubscriptionPayload {
                topics: topics.to_vec(),
            })?,
        ))
    }

    /// Parse an inbound text frame into an envelope.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Serialize for transmission.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Payload of an outbound `control_command` envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandPayload {
    /// Device action identifier (e.g. "goto", "park")
    pub action: String,
    /// Action-specific parameters
    pub parameters: Value,
    /// Whether the controller is expected to send a `command_response`
    pub response_expected: bool,
}

/// Payload of an inbound `command_response` envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResponsePayload {
    /// Correlation id: the `id` of the originating `control_command` envelope
    pub command_id: Uuid,
    /// Whether the command succeeded on the controller
    pub success: bool,
    /// Result data on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure description on error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of `subscribe` / `unsubscribe` envelopes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionPayload {
    /// Topics the caller wants status updates for
    pub topics: Vec<String>,
}
