//! Delivery error types.

use parley_proto::{ConversationId, ProtocolError, UserId};
use thiserror::Error;

use crate::storage::StorageError;

/// Reasons an inbound message failed to be persisted and delivered.
///
/// Every variant is terminal for the message: nothing is retried, and no
/// frame for it reaches any connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Conversation has no participants (unknown id)
    #[error("conversation {0} not found")]
    ConversationNotFound(ConversationId),

    /// Sender is not a participant of the conversation
    #[error("user {sender_id} is not a participant of conversation {conversation_id}")]
    NotParticipant {
        /// Target conversation
        conversation_id: ConversationId,
        /// Rejected sender
        sender_id: UserId,
    },

    /// Persisting the message or a status row failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The broadcast frame could not be encoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The delivery worker has shut down
    #[error("delivery worker stopped")]
    WorkerStopped,
}

impl DeliveryError {
    /// Whether the failure was caused by the request rather than the server.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::ConversationNotFound(_) | Self::NotParticipant { .. })
    }
}
