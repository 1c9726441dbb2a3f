//! Loopback event bridge.
//!
//! Worker processes emit events as JSON datagrams to a loopback UDP port;
//! the bridge decodes each one and hands it to the broadcaster. Delivery is
//! at most once: nothing is acknowledged, retried or replayed.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::Arc,
};

use thiserror::Error;
use tokio::{net::UdpSocket, sync::oneshot, task::JoinHandle};
use trapcast_core::{Broadcaster, EventMessage};

/// Default bridge port.
pub const DEFAULT_BRIDGE_PORT: u16 = 19876;

/// Largest UDP payload.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Bridge listener configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Listen address. Must be loopback.
    pub addr: SocketAddr,
}

impl BridgeConfig {
    /// Loopback listener on `port`.
    #[must_use]
    pub const fn with_port(port: u16) -> Self {
        Self {
            addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::with_port(DEFAULT_BRIDGE_PORT)
    }
}

/// Bridge startup error. Fatal to the bridge only.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge address {0} is not loopback")]
    NotLoopback(SocketAddr),
    #[error("failed to bind bridge on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Why a datagram was discarded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed datagram: {0}")]
    Json(#[from] serde_json::Error),
    #[error("full_state datagrams are not accepted")]
    Snapshot,
}

/// Decode one datagram.
///
/// Accepts a tagged event envelope or a bare trap record, which is wrapped
/// as a `trap` event.
///
/// # Errors
/// Returns error for malformed payloads and for `full_state` envelopes.
pub fn decode_datagram(payload: &[u8]) -> Result<EventMessage, DecodeError> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    let event = if value.get("type").is_some() {
        serde_json::from_value(value)?
    } else {
        EventMessage::trap(serde_json::from_value(value)?)
    };

    match event {
        EventMessage::FullState { .. } => Err(DecodeError::Snapshot),
        event => Ok(event),
    }
}

/// Bound bridge listener, not yet running.
pub struct EventBridge {
    socket: UdpSocket,
    local_addr: SocketAddr,
    broadcaster: Arc<dyn Broadcaster>,
}

impl EventBridge {
    /// Bind the listener. Call before starting any producer.
    ///
    /// # Errors
    /// Returns error for a non-loopback address or if the port is taken.
    pub async fn bind(
        config: &BridgeConfig,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Result<Self, BridgeError> {
        if !config.addr.ip().is_loopback() {
            return Err(BridgeError::NotLoopback(config.addr));
        }

        let bind_err = |source| BridgeError::Bind {
            addr: config.addr,
            source,
        };
        let socket = UdpSocket::bind(config.addr).await.map_err(bind_err)?;
        let local_addr = socket.local_addr().map_err(bind_err)?;

        tracing::info!("Event bridge listening on udp://{local_addr}");
        Ok(Self {
            socket,
            local_addr,
            broadcaster,
        })
    }

    /// Address the listener is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the receive loop on its own task.
    #[must_use]
    pub fn spawn(self) -> BridgeHandle {
        let local_addr = self.local_addr;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(shutdown_rx));
        BridgeHandle {
            local_addr,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut received: u64 = 0;
        let mut discarded: u64 = 0;

        loop {
            let (len, peer) = tokio::select! {
                _ = &mut shutdown => break,
                res = self.socket.recv_from(&mut buf) => match res {
                    Ok(datagram) => datagram,
                    Err(e) => {
                        tracing::warn!("Event bridge receive error: {e}");
                        continue;
                    }
                },
            };
            received += 1;

            match decode_datagram(&buf[..len]) {
                Ok(event) => {
                    let delivered = self.broadcaster.broadcast(&event);
                    tracing::debug!(%peer, kind = event.kind(), delivered, "Bridged event");
                }
                Err(e) => {
                    discarded += 1;
                    tracing::debug!(%peer, "Discarding bridge datagram: {e}");
                }
            }
        }

        tracing::info!(received, discarded, "Event bridge stopped");
    }
}

/// Handle to a running bridge. Dropping it also stops the bridge.
pub struct BridgeHandle {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl BridgeHandle {
    /// Address the listener is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the receive loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::error!("Event bridge task failed: {e}");
        }
    }
}

/// Producer side of the bridge, used by worker processes.
///
/// Fire and forget: `emit` never fails and never waits for a listener.
pub struct BridgeEmitter {
    socket: std::net::UdpSocket,
    target: SocketAddr,
}

impl BridgeEmitter {
    /// Emitter sending to `target` from an ephemeral loopback port.
    ///
    /// # Errors
    /// Returns error if the local socket cannot be created.
    pub fn new(target: SocketAddr) -> io::Result<Self> {
        let socket = std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket, target })
    }

    /// Send one event. Failures are logged at debug level and dropped.
    pub fn emit(&self, event: &EventMessage) {
        let payload = match event.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!("Failed to encode bridge event: {e}");
                return;
            }
        };
        if let Err(e) = self.socket.send_to(payload.as_bytes(), self.target) {
            tracing::debug!(target = %self.target, "Bridge emit dropped: {e}");
        }
    }
}
