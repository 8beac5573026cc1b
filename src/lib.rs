//! devlink - Resilient device-control link client
//!
//! A persistent, bidirectional control-and-telemetry client that maintains a
//! single logical session with a remote device controller over an unreliable
//! WebSocket transport, while presenting callers a reliable request/response
//! and publish/subscribe API.
//!
//! # Overview
//!
//! This crate provides:
//! - Connection lifecycle management with exponential-backoff reconnection
//! - Heartbeat-based liveness detection independent of transport close events
//! - Command/response correlation with per-command timeouts
//! - Subscription-state restoration after reconnection
//! - Outbound message buffering during transient disconnection
//!
//! # Quick Start
//!
//! ```no_run
//! use devlink::config::LinkSection;
//! use devlink::transport::ws::WsClient;
//! use serde_json::json;
//!
//! # async fn example() -> devlink::error::LinkResult<()> {
//! let config = LinkSection {
//!     url: "ws://controller.local:8765/ws".to_string(),
//!     ..Default::default()
//! };
//!
//! let client = WsClient::new(config).await?;
//! client.connect().await?;
//!
//! client.subscribe(vec!["position".to_string()], None).await?;
//! let result = client.send_command("park", json!({}), Some("mount-1")).await?;
//! println!("parked: {result}");
//!
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod transport;

pub use config::{ClientSection, LinkConfig, LinkSection};
pub use error::{LinkError, LinkResult};
pub use protocol::{CommandPayload, CommandResponsePayload, Envelope, MessageType};
pub use transport::ws::{ConnectionState, LinkEvent, WsClient};
