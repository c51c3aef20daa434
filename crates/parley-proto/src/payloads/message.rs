//! Chat message payloads.

use serde::{Deserialize, Serialize};

use super::MessageType;
use crate::{ConversationId, MessageId, ProtocolError, Result, UserId};

/// Message submitted by a client over its live connection.
///
/// `sender_id` may be omitted: the connection already knows who is speaking.
/// When present it must match the connection's user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Target conversation
    pub conversation_id: ConversationId,
    /// Claimed sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    /// Message body
    pub content: String,
    /// Content kind, `text` when omitted
    #[serde(default)]
    pub message_type: MessageType,
}

impl ClientMessage {
    /// Resolve the effective sender for a message read from `connection_user`'s
    /// connection.
    ///
    /// # Errors
    ///
    /// `ProtocolError::Violation` if the frame claims a different sender.
    pub fn sender_for(&self, connection_user: UserId) -> Result<UserId> {
        match self.sender_id {
            Some(claimed) if claimed != connection_user => Err(ProtocolError::Violation(format!(
                "sender_id {claimed} does not match connection user {connection_user}"
            ))),
            _ => Ok(connection_user),
        }
    }
}

/// Message fanned out to every live participant of a conversation.
///
/// `created_at` is stamped at broadcast time as an RFC 3339 string in the
/// server's configured offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBroadcast {
    /// Storage-assigned id
    pub id: MessageId,
    /// Conversation the message belongs to
    pub conversation_id: ConversationId,
    /// Author
    pub sender_id: UserId,
    /// Message body
    pub content: String,
    /// Content kind
    pub message_type: MessageType,
    /// Every participant of the conversation, sender included
    pub recipient_ids: Vec<UserId>,
    /// Broadcast timestamp (RFC 3339)
    pub created_at: String,
}
