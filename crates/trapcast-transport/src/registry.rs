//! Connection registry and fan-out.
//!
//! Every admitted connection owns a bounded event queue drained by its own
//! writer task, so `broadcast` never waits on a socket. A connection whose
//! queue is full or gone is evicted on the spot.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use axum::extract::ws::Utf8Bytes;
use thiserror::Error;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};
use trapcast_core::{Broadcaster, EventMessage, SessionIdentity, StateSource};
use uuid::Uuid;

use crate::{
    gate::AuthenticatedAttempt,
    protocol::{self, PONG},
    snapshot,
};

/// Internal connection identifier.
pub type ConnectionId = Uuid;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport accepted, token not yet checked.
    Pending,
    /// Token accepted, not yet in the registry.
    Authenticated,
    /// In the registry and receiving broadcasts.
    Active,
    /// Being evicted or shut down.
    Closing,
    /// No longer known to the registry.
    Closed,
}

/// Registry tuning.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Per-connection event queue depth. Overflow evicts the connection.
    pub queue_depth: usize,
    /// Per-connection keepalive reply queue depth.
    pub reply_depth: usize,
    /// Upper bound on a single socket write.
    pub send_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            queue_depth: 64,
            reply_depth: 8,
            send_timeout: Duration::from_secs(10),
        }
    }
}

/// Registry error.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry is shutting down")]
    ShuttingDown,
    #[error("connection queue rejected the snapshot")]
    QueueRejected,
    #[error("failed to encode snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// Outbound side of one connection, drained by its writer.
pub struct Mailbox {
    events: mpsc::Receiver<Utf8Bytes>,
    replies: mpsc::Receiver<Utf8Bytes>,
    evicted: oneshot::Receiver<()>,
    closed: bool,
}

impl Mailbox {
    /// Next frame to write, or `None` once the connection left the registry.
    ///
    /// Keepalive replies overtake queued events.
    pub async fn recv(&mut self) -> Option<Utf8Bytes> {
        if self.closed {
            return None;
        }
        tokio::select! {
            biased;
            _ = &mut self.evicted => {
                self.closed = true;
                None
            }
            Some(reply) = self.replies.recv() => Some(reply),
            event = self.events.recv() => event,
        }
    }

    /// Non-blocking variant of [`Mailbox::recv`].
    pub fn try_recv(&mut self) -> Option<Utf8Bytes> {
        if self.closed {
            return None;
        }
        if !matches!(self.evicted.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
            self.closed = true;
            return None;
        }
        self.replies
            .try_recv()
            .or_else(|_| self.events.try_recv())
            .ok()
    }
}

/// Inbound side's handle for answering keepalives.
#[derive(Clone)]
pub struct Replier {
    replies: mpsc::Sender<Utf8Bytes>,
}

impl Replier {
    /// Queue a `pong`. Returns false if the reply queue is full or closed.
    pub fn pong(&self) -> bool {
        self.replies.try_send(Utf8Bytes::from(PONG)).is_ok()
    }
}

/// Handles for a freshly admitted connection.
pub struct Admission {
    pub id: ConnectionId,
    pub session: SessionIdentity,
    pub mailbox: Mailbox,
    pub replier: Replier,
}

struct Connection {
    session: SessionIdentity,
    events: mpsc::Sender<Utf8Bytes>,
    _evict: oneshot::Sender<()>,
}

impl Connection {
    /// Consumes a connection already taken out of the map, which drops its
    /// eviction signal and ends the writer.
    fn close(self, id: ConnectionId, reason: &str) {
        tracing::debug!(
            %id,
            session = %self.session,
            state = ?ConnectionState::Closing,
            "Closing connection: {reason}"
        );
    }
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    shutting_down: bool,
}

/// Process-wide set of active connections.
///
/// Constructed once at startup and shared by handle; `shutdown` tears it
/// down and refuses further admissions.
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
    source: Arc<dyn StateSource>,
    config: RegistryConfig,
}

impl ConnectionRegistry {
    /// Create an empty registry that snapshots `source` on admission.
    #[must_use]
    pub fn new(source: Arc<dyn StateSource>, config: RegistryConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            source,
            config,
        }
    }

    /// Registry tuning.
    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Admit an authenticated attempt.
    ///
    /// The `full_state` snapshot is taken and queued while the registry lock
    /// is held, so it precedes every broadcast the connection will see.
    ///
    /// # Errors
    /// Returns error after `shutdown` or if the snapshot cannot be encoded.
    pub fn add(&self, attempt: AuthenticatedAttempt) -> Result<Admission, RegistryError> {
        let session = attempt.into_session();
        let id = Uuid::new_v4();
        let (events_tx, events_rx) = mpsc::channel(self.config.queue_depth.max(1));
        let (replies_tx, replies_rx) = mpsc::channel(self.config.reply_depth.max(1));
        let (evict_tx, evict_rx) = oneshot::channel();

        let mut inner = self.lock();
        if inner.shutting_down {
            return Err(RegistryError::ShuttingDown);
        }

        let frame = protocol::encode(&snapshot::full_state(self.source.as_ref()))?;
        events_tx
            .try_send(frame)
            .map_err(|_| RegistryError::QueueRejected)?;

        inner.connections.insert(
            id,
            Connection {
                session: session.clone(),
                events: events_tx,
                _evict: evict_tx,
            },
        );
        let count = inner.connections.len();
        drop(inner);

        tracing::info!(%id, %session, count, "Connection admitted");
        Ok(Admission {
            id,
            session,
            mailbox: Mailbox {
                events: events_rx,
                replies: replies_rx,
                evicted: evict_rx,
                closed: false,
            },
            replier: Replier {
                replies: replies_tx,
            },
        })
    }

    /// Remove a connection. Returns whether it was present.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let removed = self.lock().connections.remove(&id);
        removed.is_some_and(|conn| {
            conn.close(id, "removed");
            true
        })
    }

    /// Deliver `message` to every active connection.
    ///
    /// Serializes once, enqueues without waiting, and evicts every
    /// connection whose queue is full or closed. Returns the number of
    /// connections the message was queued for.
    pub fn broadcast(&self, message: &EventMessage) -> usize {
        let frame = match protocol::encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to encode {} event: {e}", message.kind());
                return 0;
            }
        };

        let targets: Vec<(ConnectionId, mpsc::Sender<Utf8Bytes>)> = self
            .lock()
            .connections
            .iter()
            .map(|(id, conn)| (*id, conn.events.clone()))
            .collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, events) in targets {
            match events.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => failed.push((id, "send queue full")),
                Err(TrySendError::Closed(_)) => failed.push((id, "send queue closed")),
            }
        }

        if !failed.is_empty() {
            let evicted: Vec<_> = {
                let mut inner = self.lock();
                failed
                    .into_iter()
                    .filter_map(|(id, reason)| {
                        inner.connections.remove(&id).map(|conn| (id, reason, conn))
                    })
                    .collect()
            };
            for (id, reason, conn) in evicted {
                tracing::warn!(%id, "Evicting connection: {reason}");
                conn.close(id, reason);
            }
        }

        delivered
    }

    /// Number of active connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().connections.len()
    }

    /// Whether no connection is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current state of a connection: `Active` while it is in the registry,
    /// `Closed` once it has left or was never admitted.
    #[must_use]
    pub fn state(&self, id: ConnectionId) -> ConnectionState {
        if self.lock().connections.contains_key(&id) {
            ConnectionState::Active
        } else {
            ConnectionState::Closed
        }
    }

    /// Close every connection and refuse further admissions.
    pub fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut inner = self.lock();
            inner.shutting_down = true;
            inner.connections.drain().collect()
        };
        tracing::info!(count = drained.len(), "Connection registry shut down");
        for (id, conn) in drained {
            conn.close(id, "shutdown");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Broadcaster for ConnectionRegistry {
    fn broadcast(&self, message: &EventMessage) -> usize {
        Self::broadcast(self, message)
    }
}
