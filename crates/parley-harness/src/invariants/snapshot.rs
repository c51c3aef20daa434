//! Observable delivery state for invariant checking.

use std::collections::{BTreeMap, BTreeSet};

use parley_proto::{ConversationId, MessageBroadcast, MessageId, UserId};
use parley_server::{Storage, StorageError};

use crate::RecordingConnection;

/// A broadcast as seen by one receiving connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedBroadcast {
    /// User whose connection received the frame
    pub receiver: UserId,
    /// The decoded frame
    pub broadcast: MessageBroadcast,
}

impl ObservedBroadcast {
    /// Every broadcast recorded by `connection`, attributed to `receiver`.
    pub fn from_connection(receiver: UserId, connection: &RecordingConnection) -> Vec<Self> {
        connection.broadcasts().into_iter().map(|broadcast| Self { receiver, broadcast }).collect()
    }
}

/// One stored message with its status rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSnapshot {
    /// Storage id
    pub message_id: MessageId,
    /// Conversation it belongs to
    pub conversation_id: ConversationId,
    /// Participants of that conversation
    pub participant_ids: BTreeSet<UserId>,
    /// Users with a status row for this message
    pub status_user_ids: BTreeSet<UserId>,
}

/// Stored messages plus observed broadcasts.
#[derive(Debug, Clone, Default)]
pub struct DeliverySnapshot {
    /// Stored messages by id
    pub messages: BTreeMap<MessageId, MessageSnapshot>,
    /// Participants per captured conversation
    pub conversations: BTreeMap<ConversationId, BTreeSet<UserId>>,
    /// Every frame observed by a recording connection
    pub observed: Vec<ObservedBroadcast>,
}

impl DeliverySnapshot {
    /// Capture the messages of `conversation_ids` from `storage`.
    ///
    /// Pass the inner storage when the core runs on a fault-injecting
    /// wrapper, so capturing itself cannot fail spuriously.
    pub fn capture<S: Storage>(
        storage: &S,
        conversation_ids: &[ConversationId],
        observed: Vec<ObservedBroadcast>,
    ) -> Result<Self, StorageError> {
        let mut snapshot = Self { observed, ..Self::default() };

        for &conversation_id in conversation_ids {
            let Some(conversation) = storage.load_conversation(conversation_id)? else {
                continue;
            };
            let participant_ids: BTreeSet<_> = conversation.participant_ids.into_iter().collect();

            for message in storage.load_messages(conversation_id)? {
                let status_user_ids = storage
                    .load_delivery_statuses(message.id)?
                    .into_iter()
                    .map(|row| row.user_id)
                    .collect();

                snapshot.messages.insert(message.id, MessageSnapshot {
                    message_id: message.id,
                    conversation_id,
                    participant_ids: participant_ids.clone(),
                    status_user_ids,
                });
            }

            snapshot.conversations.insert(conversation_id, participant_ids);
        }

        Ok(snapshot)
    }
}
