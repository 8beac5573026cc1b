//! Pure health monitoring and reconnection decision logic
//!
//! A half-open TCP/WebSocket connection can look open while silently dead,
//! so liveness is tracked from observed traffic rather than transport close
//! events. All functions here are pure decisions; the link task applies them.

use super::connection::{ReconnectDecision, ReconnectPolicy};
use std::time::Duration;
use tokio::time::Instant;

/// Traffic samples for staleness detection
///
/// Updated on every inbound frame; never persisted.
#[derive(Debug, Clone, Default)]
pub struct HealthTracker {
    /// When any inbound message was last observed
    last_message: Option<Instant>,
    /// When a protocol heartbeat was last received from the peer
    last_heartbeat: Option<Instant>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset samples to the given baseline, called when a transport opens.
    pub fn reset(&mut self, now: Instant) {
        self.last_message = Some(now);
        self.last_heartbeat = None;
    }

    /// Clear all samples, called on teardown.
    pub fn clear(&mut self) {
        self.last_message = None;
        self.last_heartbeat = None;
    }

    /// Record an inbound message of any type.
    pub fn record_message(&mut self, now: Instant) {
        self.last_message = Some(now);
    }

    /// Record an inbound heartbeat. Heartbeats also count as messages.
    pub fn record_heartbeat(&mut self, now: Instant) {
        self.last_heartbeat = Some(now);
        self.last_message = Some(now);
    }

    /// Time since the last inbound message, if a baseline exists.
    pub fn silence(&self, now: Instant) -> Option<Duration> {
        self.last_message.map(|t| now.duration_since(t))
    }

    /// Time since the last inbound heartbeat, if any arrived.
    pub fn heartbeat_silence(&self, now: Instant) -> Option<Duration> {
        self.last_heartbeat.map(|t| now.duration_since(t))
    }

    /// Whether inbound silence has exceeded the tolerated window.
    ///
    /// Without a baseline sample there is nothing to compare against, so an
    /// untracked connection is never reported stale.
    pub fn is_stale(&self, now: Instant, message_timeout: Duration) -> bool {
        match self.silence(now) {
            Some(silence) => silence > message_timeout,
            None => false,
        }
    }
}

/// Decide whether another reconnection cycle should run.
pub fn should_attempt_reconnection(
    current_attempts: u32,
    policy: &ReconnectPolicy,
) -> ReconnectDecision {
    if current_attempts >= policy.max_attempts {
        return ReconnectDecision::AbortMaxAttemptsExceeded;
    }

    ReconnectDecision::Proceed {
        attempt: current_attempts + 1,
        delay_ms: policy.delay_ms(current_attempts),
    }
}
