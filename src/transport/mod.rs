//! Transport layer for controller communication
//!
//! The socket is exclusively owned by the link task in [`ws::client`];
//! every other component reaches the wire only through its command channel.

pub mod ws;

/// Type alias for the WebSocket transport client
pub type WsTransport = ws::WsClient;
