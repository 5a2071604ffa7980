//! Error types for the session layer.

use sightwire_protocol::{Failure, FailureCategory, ProtocolError};
use sightwire_transport::TransportError;

/// Errors returned by sessions, producers, and consumers.
///
/// A [`Failure`] means the request was refused, either by the broker
/// through a return code or by the client before anything was sent. A
/// [`TransportError`] means the connection itself is gone.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A categorized failure with a stable code.
    #[error(transparent)]
    Failure(#[from] Failure),

    /// The connection failed underneath the request.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// The failure, if this is one.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failure(f) => Some(f),
            Self::Transport(_) => None,
        }
    }

    /// The failure category. Encoding problems that surfaced through the
    /// transport count as [`FailureCategory::MessageFormat`].
    pub fn category(&self) -> Option<FailureCategory> {
        match self {
            Self::Failure(f) => Some(f.category()),
            Self::Transport(TransportError::Protocol(_)) => Some(FailureCategory::MessageFormat),
            Self::Transport(_) => None,
        }
    }

    /// Returns `true` when the connection is gone.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::Transport(TransportError::ConnectionClosed(_)))
    }
}

impl From<ProtocolError> for SessionError {
    fn from(err: ProtocolError) -> Self {
        Self::Failure(Failure::from(err))
    }
}
