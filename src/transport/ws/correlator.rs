//! Command/response correlation over a response-less transport
//!
//! Every outbound command registers a pending entry keyed by its envelope id.
//! An entry leaves the table on exactly one of three paths: a matching
//! response, its deadline, or session teardown. Expiry is deadline-driven
//! from the link task's select loop, so no timer can outlive the session.

use crate::error::{LinkError, LinkResult};
use crate::protocol::CommandResponsePayload;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// A command awaiting its correlated response
struct PendingCommand {
    /// Action name, kept for timeout diagnostics
    action: String,
    /// Caller waiting on the outcome
    respond_to: oneshot::Sender<LinkResult<Value>>,
    /// When the command times out
    deadline: Instant,
}

/// Pending-command table keyed by correlation id
#[derive(Default)]
pub struct CommandCorrelator {
    pending: HashMap<Uuid, PendingCommand>,
}

impl CommandCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command before transmission.
    ///
    /// The deadline starts counting immediately, even while the envelope
    /// waits in the outbound queue for the transport to come back.
    pub fn register(
        &mut self,
        id: Uuid,
        action: String,
        respond_to: oneshot::Sender<LinkResult<Value>>,
        deadline: Instant,
    ) {
        self.pending.insert(
            id,
            PendingCommand {
                action,
                respond_to,
                deadline,
            },
        );
    }

    /// Resolve a pending command from an inbound response payload.
    ///
    /// Returns `false` for unknown ids: a response can legitimately arrive
    /// after its command already timed out, so this is not an error.
    pub fn resolve(&mut self, response: CommandResponsePayload) -> bool {
        let Some(entry) = self.pending.remove(&response.command_id) else {
            debug!(
                command_id = %response.command_id,
                "Dropping response for unknown or already-settled command"
            );
            return false;
        };

        let outcome = if response.success {
            Ok(response.result.unwrap_or(Value::Null))
        } else {
            Err(LinkError::command_failed(
                response
                    .error
                    .unwrap_or_else(|| "controller reported failure".to_string()),
            ))
        };

        // The caller may have stopped waiting; that is not our problem
        let _ = entry.respond_to.send(outcome);
        true
    }

    /// The earliest pending deadline, used to arm the expiry sleep.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|entry| entry.deadline).min()
    }

    /// Reject every command whose deadline has passed.
    ///
    /// Removal happens before rejection, so a late response for an expired
    /// command finds nothing and is a no-op.
    pub fn expire_due(&mut self, now: Instant) -> Vec<String> {
        let due: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut actions = Vec::with_capacity(due.len());
        for id in due {
            if let Some(entry) = self.pending.remove(&id) {
                let _ = entry
                    .respond_to
                    .send(Err(LinkError::command_timeout(entry.action.clone())));
                actions.push(entry.action);
            }
        }
        actions
    }

    /// Reject everything still pending with `ConnectionClosed`.
    ///
    /// Called on explicit disconnect and on terminal reconnect failure so no
    /// caller is left hanging.
    pub fn reject_all(&mut self) -> usize {
        let count = self.pending.len();
        for (_, entry) in self.pending.drain() {
            let _ = entry.respond_to.send(Err(LinkError::ConnectionClosed));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
