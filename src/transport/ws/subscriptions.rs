//! Durable subscription intent
//!
//! Subscriptions are modeled as intent rather than one-shot messages so the
//! full set can be replayed transparently after a reconnection. The set is
//! idempotent and preserves insertion order, which keeps replay
//! deterministic.

use crate::protocol::Envelope;

/// A `(peer, topics)` subscription key
///
/// Topics are stored sorted and deduplicated so two subscriptions to the
/// same set compare equal regardless of call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Target device, `None` meaning all peers
    pub peer_id: Option<String>,
    /// Canonicalized topic set
    pub topics: Vec<String>,
}

impl Subscription {
    /// Build a canonical key from caller input.
    pub fn new(topics: &[String], peer_id: Option<String>) -> Self {
        let mut topics = topics.to_vec();
        topics.sort();
        topics.dedup();
        Self { peer_id, topics }
    }

    /// The subscribe envelope for this key.
    pub fn to_subscribe_envelope(&self) -> Result<Envelope, serde_json::Error> {
        Envelope::subscribe(&self.topics, self.peer_id.clone())
    }
}

/// Ordered, idempotent set of subscription intent
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    entries: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record intent. Returns `false` when the key was already tracked
    /// (subscribing twice has no additional effect).
    pub fn insert(&mut self, subscription: Subscription) -> bool {
        if self.entries.contains(&subscription) {
            return false;
        }
        self.entries.push(subscription);
        true
    }

    /// Remove intent. Returns `false` when the key was not tracked.
    pub fn remove(&mut self, subscription: &Subscription) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry != subscription);
        self.entries.len() != before
    }

    /// Entries in insertion order, for replay after reconnection.
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    /// Drop all intent, called when the session ends for good.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
