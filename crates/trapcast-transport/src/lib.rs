//! Real-time push transport for trapcast.
//!
//! Provides:
//! - `ConnectionRegistry` - Active connections with bounded per-connection queues
//! - `HandshakeGate` - Token validation ahead of admission
//! - WebSocket endpoint with snapshot-on-connect and ping/pong keepalive
//! - `EventBridge` / `BridgeEmitter` - Loopback UDP side-channel from worker processes

pub mod bridge;
pub mod gate;
pub mod protocol;
pub mod registry;
pub mod snapshot;
pub mod websocket;

pub use bridge::{
    BridgeConfig, BridgeEmitter, BridgeError, BridgeHandle, DecodeError, EventBridge,
    decode_datagram,
};
pub use gate::{AuthFailure, AuthenticatedAttempt, HandshakeGate};
pub use protocol::ClientFrame;
pub use registry::{
    Admission, ConnectionId, ConnectionRegistry, ConnectionState, Mailbox, RegistryConfig,
    RegistryError, Replier,
};
pub use websocket::{WsQuery, WsState, create_ws_router, ws_handler};
