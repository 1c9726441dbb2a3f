//! Collaborator traits consumed by the push core.

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    EventMessage,
    state::{MibSummary, SimulatorSnapshot, Stats, TrapReceiverStatus},
};

/// Identity of the session a token belongs to (the logged-in user).
pub type SessionIdentity = String;

/// Session validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Session store unavailable: {0}")]
    Unavailable(String),
}

/// Trait for the external session store.
///
/// The push core never interprets tokens; it only asks whether one
/// identifies a live session.
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Validate an opaque token.
    ///
    /// Returns the session identity for a live session, `None` otherwise.
    async fn validate(&self, token: &str) -> Result<Option<SessionIdentity>, ValidationError>;
}

/// Read-only view over the state the push core snapshots.
///
/// Implementations must be cheap and non-blocking: they are queried
/// while the connection registry holds its lock.
pub trait StateSource: Send + Sync {
    /// Simulator status including uptime.
    fn simulator(&self) -> SimulatorSnapshot;

    /// Trap receiver status.
    fn trap_receiver(&self) -> TrapReceiverStatus;

    /// Aggregate counters.
    fn stats(&self) -> Stats;

    /// MIB summary.
    fn mibs(&self) -> MibSummary {
        MibSummary::default()
    }
}

/// Fan-out sink for server-push events.
///
/// Delivery is best effort: failures are handled by the implementation
/// and never reported back to the caller.
pub trait Broadcaster: Send + Sync {
    /// Deliver `message` to every active consumer.
    ///
    /// Returns how many consumers the message was handed to.
    fn broadcast(&self, message: &EventMessage) -> usize;
}
