//! Protocol message definitions shared by the transport layer and callers

pub mod messages;

pub use messages::{
    CommandPayload, CommandResponsePayload, Envelope, MessageType, SubscriptionPayload,
};
