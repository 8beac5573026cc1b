//! Typed lifecycle and message events
//!
//! Callers observe the session through a broadcast channel of typed events
//! instead of string-keyed callbacks. Inbound envelopes are delivered as
//! [`LinkEvent::Message`]; consumers filter on `message_type` and `peer_id`.

use super::connection::ConnectionState;
use crate::protocol::Envelope;
use tokio::sync::broadcast;

/// Capacity of the event fan-out channel. Slow receivers observe a
/// `Lagged` error rather than backpressuring the link task.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the link session
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// The connection state machine moved
    StateChanged {
        previous: ConnectionState,
        current: ConnectionState,
    },
    /// An inbound envelope of any type
    Message(Envelope),
    /// A reconnection cycle succeeded; subscriptions have been replayed
    Reconnected,
    /// Reconnection attempts are exhausted; the session is terminal
    ReconnectFailed { attempts: u32 },
    /// The health monitor declared the connection dead
    HealthCheckFailed { reason: String },
}

/// Broadcast-based event fan-out owned by the link task
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LinkEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Open a new receiver; events emitted before this call are not seen.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Having no receivers is not an error.
    pub fn emit(&self, event: LinkEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
