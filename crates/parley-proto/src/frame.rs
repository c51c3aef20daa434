//! Frame encoding and decoding.
//!
//! A frame is exactly one JSON object. Inbound frames are always
//! [`ClientMessage`]s; outbound frames are one of the [`ServerFrame`] shapes.
//! The outbound shapes carry no common envelope, so decoding (used by clients
//! and tests) relies on their disjoint required fields.

use serde::{Deserialize, Serialize};

use crate::{
    Connected, MessageBroadcast, PresenceStatus, StatusUpdate, UserId,
    errors::{ProtocolError, Result},
    payloads::message::ClientMessage,
};

/// Largest inbound frame accepted from a client (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

impl ClientMessage {
    /// Decode an inbound frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if `bytes` exceeds [`MAX_FRAME_SIZE`]
    /// - `ProtocolError::JsonDecode` if the frame is not a valid message
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge { size: bytes.len(), max: MAX_FRAME_SIZE });
        }

        serde_json::from_slice(bytes).map_err(|e| ProtocolError::JsonDecode(e.to_string()))
    }

    /// Encode as a JSON frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::JsonEncode(e.to_string()))
    }
}

/// Every frame the server writes to a live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// Presence change of another user
    Status(StatusUpdate),
    /// Persisted message fanned out to participants
    Message(MessageBroadcast),
    /// Connection acknowledgment
    Connected(Connected),
}

impl ServerFrame {
    /// Acknowledgment frame sent on connect.
    pub fn connected() -> Self {
        Self::Connected(Connected::default())
    }

    /// Presence frame for `user_id`.
    pub fn status(user_id: UserId, new_status: PresenceStatus) -> Self {
        Self::Status(StatusUpdate::new(user_id, new_status))
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::JsonEncode(e.to_string()))
    }

    /// Decode a frame written by the server.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ProtocolError::JsonDecode(e.to_string()))
    }
}

impl From<MessageBroadcast> for ServerFrame {
    fn from(message: MessageBroadcast) -> Self {
        Self::Message(message)
    }
}
