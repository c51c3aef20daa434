//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while decoding or encoding wire frames.
///
/// Every variant is fatal for the connection that produced the frame: the
/// live protocol has no error frame, so a peer sending garbage is dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame exceeds [`crate::MAX_FRAME_SIZE`]
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Size of the rejected frame
        size: usize,
        /// Maximum accepted size
        max: usize,
    },

    /// Frame is not valid JSON for the expected shape
    #[error("JSON decode error: {0}")]
    JsonDecode(String),

    /// Frame could not be serialized
    #[error("JSON encode error: {0}")]
    JsonEncode(String),

    /// Frame parsed but violates a protocol rule
    #[error("protocol violation: {0}")]
    Violation(String),
}

impl ProtocolError {
    /// Whether the error came from the peer (as opposed to a local bug).
    pub fn is_peer_fault(&self) -> bool {
        !matches!(self, Self::JsonEncode(_))
    }
}
