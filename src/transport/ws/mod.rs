//! WebSocket link implementation
//!
//! Pure decision logic (connection state, reconnect policy, health,
//! correlation bookkeeping, subscription intent, queueing) lives in its own
//! modules; `client` holds the one task performing I/O.

pub mod client;
pub mod connection;
pub mod correlator;
pub mod events;
pub mod health;
pub mod queue;
pub mod subscriptions;

pub use client::WsClient;
pub use connection::{ConnectionState, ReconnectDecision, ReconnectPolicy};
pub use correlator::CommandCorrelator;
pub use events::{EventBus, LinkEvent};
pub use health::HealthTracker;
pub use queue::OutboundQueue;
pub use subscriptions::{Subscription, SubscriptionSet};
