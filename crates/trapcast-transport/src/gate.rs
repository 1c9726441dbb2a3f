//! Handshake gate: token validation ahead of admission.

use std::sync::Arc;

use thiserror::Error;
use trapcast_core::{SessionIdentity, SessionValidator, ValidationError};

use crate::registry::ConnectionState;

/// Why a connection attempt was refused.
#[derive(Debug, Error)]
pub enum AuthFailure {
    #[error("missing session token")]
    MissingToken,
    #[error("invalid session token")]
    InvalidToken,
    #[error("session validation failed: {0}")]
    Validator(#[from] ValidationError),
}

/// A connection attempt whose token identified a live session.
///
/// Consumed by `ConnectionRegistry::add`, so one attempt is admitted at most once.
#[derive(Debug)]
pub struct AuthenticatedAttempt {
    session: SessionIdentity,
}

impl AuthenticatedAttempt {
    pub(crate) const fn new(session: SessionIdentity) -> Self {
        Self { session }
    }

    /// Session the attempt belongs to.
    #[must_use]
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Always `Authenticated`.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        ConnectionState::Authenticated
    }

    pub(crate) fn into_session(self) -> SessionIdentity {
        self.session
    }
}

/// Validates connection attempts against the external session store.
pub struct HandshakeGate {
    validator: Arc<dyn SessionValidator>,
}

impl HandshakeGate {
    /// Create a gate backed by `validator`.
    #[must_use]
    pub fn new(validator: Arc<dyn SessionValidator>) -> Self {
        Self { validator }
    }

    /// Check the token carried by a connection attempt.
    ///
    /// An empty token counts as missing.
    ///
    /// # Errors
    /// Returns the reason the attempt must be refused.
    pub async fn check(&self, token: Option<&str>) -> Result<AuthenticatedAttempt, AuthFailure> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(AuthFailure::MissingToken)?;

        self.validator
            .validate(token)
            .await?
            .map(AuthenticatedAttempt::new)
            .ok_or(AuthFailure::InvalidToken)
    }
}
