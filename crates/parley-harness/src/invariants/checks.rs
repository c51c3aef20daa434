//! Standard delivery invariants.

use std::collections::BTreeSet;

use super::{DeliverySnapshot, Invariant, InvariantResult, Violation};

/// No connection observes a message before all of its status rows exist.
///
/// Every observed broadcast must refer to a stored message whose status rows
/// cover every participant.
pub struct BroadcastsBackedByStatus;

impl Invariant for BroadcastsBackedByStatus {
    fn name(&self) -> &'static str {
        "broadcasts_backed_by_status"
    }

    fn check(&self, state: &DeliverySnapshot) -> InvariantResult {
        for observed in &state.observed {
            let id = observed.broadcast.id;
            let Some(message) = state.messages.get(&id) else {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("user {} observed message {id} which is not stored", observed.receiver),
                });
            };

            if message.status_user_ids != message.participant_ids {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "message {id} was broadcast with status rows for {:?}, participants {:?}",
                        message.status_user_ids, message.participant_ids
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Broadcast recipient lists equal the conversation's participants, and
/// only participants receive them.
pub struct RecipientsMatchParticipants;

impl Invariant for RecipientsMatchParticipants {
    fn name(&self) -> &'static str {
        "recipients_match_participants"
    }

    fn check(&self, state: &DeliverySnapshot) -> InvariantResult {
        for observed in &state.observed {
            let broadcast = &observed.broadcast;
            let Some(participants) = state.conversations.get(&broadcast.conversation_id) else {
                continue;
            };

            let recipients: BTreeSet<_> = broadcast.recipient_ids.iter().copied().collect();
            if &recipients != participants || recipients.len() != broadcast.recipient_ids.len() {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "message {} lists recipients {:?}, conversation {} has {:?}",
                        broadcast.id, broadcast.recipient_ids, broadcast.conversation_id, participants
                    ),
                });
            }

            if !participants.contains(&observed.receiver) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "non-participant {} received message {}",
                        observed.receiver, broadcast.id
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Every stored message has exactly one status row per participant.
///
/// Holds only while storage never fails mid-event.
pub struct StatusRowsComplete;

impl Invariant for StatusRowsComplete {
    fn name(&self) -> &'static str {
        "status_rows_complete"
    }

    fn check(&self, state: &DeliverySnapshot) -> InvariantResult {
        for message in state.messages.values() {
            if message.status_user_ids != message.participant_ids {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "message {} in conversation {} has rows for {:?}, participants {:?}",
                        message.message_id,
                        message.conversation_id,
                        message.status_user_ids,
                        message.participant_ids
                    ),
                });
            }
        }
        Ok(())
    }
}
