//! Persistence gateway for Parley.
//!
//! Trait-based abstraction over users, conversations, messages and
//! per-recipient delivery status. The trait is synchronous: the delivery core
//! calls it from its own worker thread, and HTTP handlers call it through
//! `spawn_blocking`.

mod chaotic;
mod error;
mod memory;
mod redb;

use chrono::{DateTime, Utc};
pub use chaotic::ChaoticStorage;
pub use error::StorageError;
pub use memory::MemoryStorage;
use parley_proto::{
    ConversationId, DeliveryStatus, MessageId, MessageType, PresenceStatus, UserId,
};
use serde::{Deserialize, Serialize};

pub use self::redb::RedbStorage;

/// Registered account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Storage-assigned id
    pub id: UserId,
    /// Unique, trimmed username
    pub username: String,
    /// Current presence
    pub status: PresenceStatus,
    /// Last presence change, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    /// Registration time
    pub created_at: DateTime<Utc>,
}

/// A conversation and its participant set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Storage-assigned id
    pub id: ConversationId,
    /// Display name (group conversations only)
    #[serde(default)]
    pub name: Option<String>,
    /// Group flag. Non-group two-party conversations are deduplicated.
    pub is_group: bool,
    /// Distinct participants, in the order they were given at creation
    pub participant_ids: Vec<UserId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Whether `user_id` participates in this conversation.
    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participant_ids.contains(&user_id)
    }
}

/// Request to create a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    /// Display name
    pub name: Option<String>,
    /// Group flag
    pub is_group: bool,
    /// Participants; duplicates are removed on creation
    pub participant_ids: Vec<UserId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl NewConversation {
    /// Participant ids with duplicates removed, first occurrence kept.
    pub fn distinct_participants(&self) -> Vec<UserId> {
        let mut seen = Vec::with_capacity(self.participant_ids.len());
        for &id in &self.participant_ids {
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
        seen
    }

    /// Canonical `(low, high)` pair if this is a one-to-one conversation.
    pub fn direct_pair(&self) -> Option<(UserId, UserId)> {
        if self.is_group {
            return None;
        }

        match self.distinct_participants().as_slice() {
            &[a, b] => Some(canonical_pair(a, b)),
            _ => None,
        }
    }
}

/// Result of [`Storage::create_conversation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateConversation {
    /// A new conversation was stored
    Created(Conversation),
    /// A one-to-one conversation for the same pair already existed
    Existing(Conversation),
}

impl CreateConversation {
    /// The stored conversation, new or existing.
    pub fn conversation(&self) -> &Conversation {
        match self {
            Self::Created(c) | Self::Existing(c) => c,
        }
    }

    /// Consume into the stored conversation.
    pub fn into_conversation(self) -> Conversation {
        match self {
            Self::Created(c) | Self::Existing(c) => c,
        }
    }
}

/// A message about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Target conversation
    pub conversation_id: ConversationId,
    /// Author
    pub sender_id: UserId,
    /// Body
    pub content: String,
    /// Content kind
    pub message_type: MessageType,
    /// When the server received it; becomes the stored creation time
    pub received_at: DateTime<Utc>,
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Storage-assigned id
    pub id: MessageId,
    /// Conversation the message belongs to
    pub conversation_id: ConversationId,
    /// Author
    pub sender_id: UserId,
    /// Body
    pub content: String,
    /// Content kind
    pub message_type: MessageType,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Stored form of `message` under `id`.
    pub fn from_new(id: MessageId, message: &NewMessage) -> Self {
        Self {
            id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content.clone(),
            message_type: message.message_type,
            created_at: message.received_at,
        }
    }
}

/// A conversation participant with their stored presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participant {
    /// Participant id
    pub user_id: UserId,
    /// Presence at the time of the query
    pub presence: PresenceStatus,
}

/// One delivery-status row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Message the row belongs to
    pub message_id: MessageId,
    /// Recipient
    pub user_id: UserId,
    /// Status for that recipient
    pub status: DeliveryStatus,
}

/// Order a user pair so `(a, b)` and `(b, a)` map to the same key.
pub fn canonical_pair(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Storage abstraction for users, conversations, messages and delivery
/// status.
///
/// Must be Clone (shared by the delivery worker and HTTP handlers), Send +
/// Sync, and synchronous. Implementations share internal state via Arc, so
/// clones access the same underlying storage.
///
/// # Panics
///
/// Implementations may panic if internal synchronization primitives are
/// poisoned (a thread panicked while holding a lock).
pub trait Storage: Clone + Send + Sync + 'static {
    /// Register a user with an already-hashed password.
    ///
    /// Returns `StorageError::Conflict` if the username is taken. The hash is
    /// kept apart from [`User`] and only readable through
    /// [`Storage::load_password_hash`].
    fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<User, StorageError>;

    /// Password hash stored for `user_id`.
    fn load_password_hash(&self, user_id: UserId) -> Result<Option<String>, StorageError>;

    /// Look a user up by exact username.
    fn find_user_by_name(&self, username: &str) -> Result<Option<User>, StorageError>;

    /// Load a user by id.
    fn load_user(&self, user_id: UserId) -> Result<Option<User>, StorageError>;

    /// All users, ordered by username.
    fn list_users(&self) -> Result<Vec<User>, StorageError>;

    /// Update a user's presence and last-seen time.
    ///
    /// Returns `StorageError::NotFound` for unknown users.
    fn set_presence(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        last_seen: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Create a conversation.
    ///
    /// # Invariants
    ///
    /// - Post: for a non-group conversation with exactly two distinct
    ///   participants, at most one conversation exists per unordered pair. A
    ///   second request for the same pair returns
    ///   [`CreateConversation::Existing`] and writes nothing.
    fn create_conversation(
        &self,
        conversation: &NewConversation,
    ) -> Result<CreateConversation, StorageError>;

    /// Load a conversation by id.
    fn load_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<Conversation>, StorageError>;

    /// One-to-one conversation between `a` and `b`, in either order.
    fn find_direct_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<ConversationId>, StorageError>;

    /// Conversations `user_id` participates in, ordered by id.
    fn list_conversations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Conversation>, StorageError>;

    /// Participants of a conversation with their current presence.
    ///
    /// Returns an empty list for unknown conversations. Participants whose
    /// user record is missing are reported offline.
    fn list_participants(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Participant>, StorageError>;

    /// Durably store a message and assign its id.
    ///
    /// # Invariants
    ///
    /// - Pre: the conversation exists (`StorageError::NotFound` otherwise)
    /// - Post: ids are assigned sequentially from 1 and never reused
    fn insert_message(&self, message: &NewMessage) -> Result<MessageId, StorageError>;

    /// Store a message together with its status rows in one atomic write.
    ///
    /// # Invariants
    ///
    /// - Pre: the conversation exists (`StorageError::NotFound` otherwise)
    /// - Post: either the message and every row in `statuses` are stored, or
    ///   nothing is
    fn insert_message_with_statuses(
        &self,
        message: &NewMessage,
        statuses: &[(UserId, DeliveryStatus)],
    ) -> Result<MessageId, StorageError>;

    /// Messages of a conversation, ordered by creation time.
    fn load_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<StoredMessage>, StorageError>;

    /// Record the delivery status of `message_id` for `user_id`.
    ///
    /// Overwrites an existing row for the same pair, so each (message, user)
    /// pair has exactly one row.
    fn record_delivery_status(
        &self,
        message_id: MessageId,
        user_id: UserId,
        status: DeliveryStatus,
    ) -> Result<(), StorageError>;

    /// All status rows for a message, ordered by user id.
    fn load_delivery_statuses(
        &self,
        message_id: MessageId,
    ) -> Result<Vec<DeliveryRecord>, StorageError>;
}
