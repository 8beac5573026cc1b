//! Pure connection state management for the WebSocket link
//!
//! Connection state, reconnection policy, and endpoint handling live here as
//! plain data and pure functions; all I/O stays in the client module.

use crate::config::LinkSection;
use url::Url;

/// Connection state for the link session
///
/// Exactly one instance exists per session, held behind a watch channel by
/// the link task. It is the sole authority for whether sends are permitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session; explicit state after construction or `disconnect()`
    Disconnected,
    /// `connect()` accepted, transport dial in progress
    Connecting,
    /// Transport open, commands and telemetry flowing
    Connected,
    /// Transport lost, automatic re-establishment in progress (attempt count)
    Reconnecting(u32),
    /// Terminal failure; a fresh `connect()` is required to recover
    Error(String),
}

impl ConnectionState {
    /// Whether an envelope may be transmitted immediately.
    pub fn allows_send(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether outbound sends are buffered for later transmission.
    ///
    /// Queuing is a transient-outage accommodation only; explicit
    /// disconnection and terminal failure fail sends immediately.
    pub fn queues_sends(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting(_)
        )
    }
}

/// Exponential-backoff reconnection policy
///
/// Delay for attempt `n` (zero-based) is `min(base_delay_ms * 2^n,
/// max_delay_ms)`. Once `max_attempts` cycles have failed the session goes
/// terminal and no further automatic retries happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Base delay in milliseconds
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds
    pub max_delay_ms: u64,
}

impl ReconnectPolicy {
    /// Extract the policy from the link configuration.
    pub fn from_config(config: &LinkSection) -> Self {
        Self {
            max_attempts: config.reconnect_attempts,
            base_delay_ms: config.reconnect_delay_ms,
            max_delay_ms: config.max_reconnect_delay_ms,
        }
    }

    /// Backoff delay for the given zero-based attempt counter.
    pub fn delay_ms(&self, attempts: u32) -> u64 {
        let factor = 2u64.saturating_pow(attempts);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&LinkSection::default())
    }
}

/// Decision result for a reconnection cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay_ms`, then dial; `attempt` is the one-based attempt number
    Proceed { attempt: u32, delay_ms: u64 },
    /// Attempts exhausted; the session becomes terminal
    AbortMaxAttemptsExceeded,
}

/// Build the controller endpoint, appending session identity as query
/// parameters when present.
pub fn build_endpoint(
    base_url: &str,
    peer_id: Option<&str>,
    client_id: Option<&str>,
) -> Result<Url, String> {
    let mut url =
        Url::parse(base_url).map_err(|e| format!("invalid controller URL {base_url}: {e}"))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(format!("unsupported URL scheme: {other}")),
    }

    if peer_id.is_some() || client_id.is_some() {
        let mut pairs = url.query_pairs_mut();
        if let Some(client_id) = client_id {
            pairs.append_pair("client_id", client_id);
        }
        if let Some(peer_id) = peer_id {
            pairs.append_pair("peer_id", peer_id);
        }
    }

    Ok(url)
}
