use sightwire_protocol::ProtocolError;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed, or closed while a request was waiting.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Establishing the connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// An action could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
