//! Error types for the protocol layer.
//!
//! Each crate in Sightwire defines its own error enum. A `ProtocolError`
//! always means the bytes themselves are wrong: a value that cannot be
//! represented on the wire, or a frame that cannot be parsed back. It never
//! describes a broker decision; those arrive as return codes and become
//! [`Failure`](crate::Failure)s.

/// Errors that can occur while encoding or decoding actions.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The input ended before a complete value could be read.
    #[error("frame truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the next value required.
        needed: usize,
        /// Bytes that were actually left.
        remaining: usize,
    },

    /// A value tag that this codec does not know.
    #[error("unknown value tag 0x{0:02x}")]
    UnknownTag(u8),

    /// An action type code that this codec does not know.
    #[error("unknown action type {0}")]
    UnknownActionType(u8),

    /// A string on the wire was not valid UTF-8.
    #[error("string is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A string handed to the encoder was not valid UTF-16.
    #[error("string is not valid UTF-16: {0}")]
    InvalidUtf16(#[from] std::string::FromUtf16Error),

    /// A string, byte array, or map is too large for a 4-byte length prefix.
    #[error("length {0} exceeds the wire limit")]
    TooLong(usize),

    /// A negative length other than the null sentinel.
    #[error("negative length {0}")]
    NegativeLength(i32),

    /// Property names must be non-empty.
    #[error("property name must not be empty")]
    EmptyPropertyName,

    /// The declared header count does not match the fields written.
    #[error("header count mismatch: declared {declared}, written {written}")]
    HeaderCountMismatch {
        /// Count set with `set_header_count`.
        declared: u8,
        /// Fields actually written.
        written: u8,
    },

    /// The frame is structurally invalid in some other way.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
