//! Outbound buffering during transient disconnection
//!
//! While the session is re-establishing its transport, outbound envelopes
//! land here instead of failing. The queue drains strictly FIFO the moment
//! the transport opens, ahead of any send submitted afterwards, preserving
//! the causal order of commands issued during an outage.

use crate::protocol::Envelope;
use std::collections::VecDeque;

/// FIFO buffer of envelopes awaiting transport availability
#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: VecDeque<Envelope>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an envelope to the back of the queue.
    pub fn push(&mut self, envelope: Envelope) {
        self.entries.push_back(envelope);
    }

    /// Remove and return the oldest queued envelope.
    pub fn pop(&mut self) -> Option<Envelope> {
        self.entries.pop_front()
    }

    /// Put an envelope back at the front after a failed drain write, so the
    /// next drain preserves the original order.
    pub fn push_front(&mut self, envelope: Envelope) {
        self.entries.push_front(envelope);
    }

    /// Discard all queued envelopes without transmitting them.
    ///
    /// Used on explicit disconnect: queuing is a transient-outage
    /// accommodation, not a durability guarantee.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
