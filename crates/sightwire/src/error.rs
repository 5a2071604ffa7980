//! Unified error type for Sightwire.

use sightwire_protocol::{Failure, FailureCategory, ProtocolError};
use sightwire_session::SessionError;
use sightwire_transport::TransportError;

use crate::config::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attributes let `?` convert sub-crate errors
/// automatically.
#[derive(Debug, thiserror::Error)]
pub enum SightwireError {
    /// The link failed or was closed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A value could not be encoded or a frame could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A request was refused, by the broker or by the client.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SightwireError {
    /// The categorized failure behind this error, if there is one.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Session(e) => e.failure(),
            _ => None,
        }
    }

    pub fn category(&self) -> Option<FailureCategory> {
        match self {
            Self::Session(e) => e.category(),
            Self::Protocol(_) => Some(FailureCategory::MessageFormat),
            Self::Transport(_) | Self::Config(_) => None,
        }
    }
}

impl From<Failure> for SightwireError {
    fn from(failure: Failure) -> Self {
        Self::Session(SessionError::Failure(failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err: SightwireError = TransportError::ConnectionClosed("gone".into()).into();
        assert!(matches!(err, SightwireError::Transport(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err: SightwireError = ProtocolError::InvalidMessage("bad".into()).into();
        assert!(matches!(err, SightwireError::Protocol(_)));
        assert_eq!(err.category(), Some(FailureCategory::MessageFormat));
    }

    #[test]
    fn test_from_failure_exposes_code() {
        let err: SightwireError = sightwire_session::failures::reentrant_close().into();
        assert_eq!(err.failure().map(Failure::code), Some("CWLNC0102"));
        assert_eq!(err.category(), Some(FailureCategory::IllegalState));
    }

    #[test]
    fn test_from_config_error() {
        let err: SightwireError = ConfigError::Invalid("priority 12".into()).into();
        assert!(matches!(err, SightwireError::Config(_)));
        assert_eq!(err.failure(), None);
    }
}
