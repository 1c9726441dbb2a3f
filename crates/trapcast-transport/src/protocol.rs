//! Wire protocol for the push channel.
//!
//! Server-to-client traffic is JSON text frames carrying an `EventMessage`.
//! Client-to-server traffic is limited to the plain-text keepalive.

use axum::extract::ws::Utf8Bytes;
use trapcast_core::EventMessage;

/// Keepalive probe sent by clients.
pub const PING: &str = "ping";

/// Keepalive reply.
pub const PONG: &str = "pong";

/// Close code for a handshake with a missing or invalid token.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;

/// Inbound text frame from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFrame {
    /// Keepalive probe.
    Ping,
    /// Anything else; ignored.
    Unrecognized,
}

impl ClientFrame {
    /// Classify an inbound text payload. Only the exact literal is a ping.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        if text == PING {
            Self::Ping
        } else {
            Self::Unrecognized
        }
    }
}

/// Serialize an event into a shareable text frame.
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode(message: &EventMessage) -> Result<Utf8Bytes, serde_json::Error> {
    message.to_json().map(Utf8Bytes::from)
}
