use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use parley_proto::{
    ConversationId, DeliveryStatus, MessageId, PresenceStatus, UserId,
};

use super::{
    Conversation, CreateConversation, DeliveryRecord, NewConversation, NewMessage, Participant,
    Storage, StorageError, StoredMessage, User, canonical_pair,
};

/// In-memory storage implementation for tests and `--storage memory`.
///
/// All state is wrapped in `Arc<Mutex<>>` to allow Clone and concurrent
/// access. Uses `lock().expect()` which will panic if the mutex is poisoned.
/// Ordered maps keep listing operations deterministic.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    users: BTreeMap<UserId, User>,
    /// username -> user id (uniqueness index)
    usernames: HashMap<String, UserId>,
    password_hashes: HashMap<UserId, String>,
    conversations: BTreeMap<ConversationId, Conversation>,
    /// canonical (low, high) pair -> one-to-one conversation
    direct_pairs: HashMap<(UserId, UserId), ConversationId>,
    messages: BTreeMap<MessageId, StoredMessage>,
    /// (message id, user id) -> status
    statuses: BTreeMap<(MessageId, UserId), DeliveryStatus>,
    next_user_id: UserId,
    next_conversation_id: ConversationId,
    next_message_id: MessageId,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStorageInner {
                next_user_id: 1,
                next_conversation_id: 1,
                next_message_id: 1,
                ..MemoryStorageInner::default()
            })),
        }
    }

    /// Total number of stored messages.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn message_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").messages.len()
    }

    /// Total number of delivery-status rows.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn status_row_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").statuses.len()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    #[allow(clippy::expect_used)]
    fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<User, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        if inner.usernames.contains_key(username) {
            return Err(StorageError::Conflict(format!("username {username} already exists")));
        }

        let id = inner.next_user_id;
        inner.next_user_id += 1;

        let user = User {
            id,
            username: username.to_string(),
            status: PresenceStatus::Offline,
            last_seen: None,
            created_at,
        };
        inner.usernames.insert(user.username.clone(), id);
        inner.password_hashes.insert(id, password_hash.to_string());
        inner.users.insert(id, user.clone());

        Ok(user)
    }

    #[allow(clippy::expect_used)]
    fn load_password_hash(&self, user_id: UserId) -> Result<Option<String>, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").password_hashes.get(&user_id).cloned())
    }

    #[allow(clippy::expect_used)]
    fn find_user_by_name(&self, username: &str) -> Result<Option<User>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner.usernames.get(username).and_then(|id| inner.users.get(id)).cloned())
    }

    #[allow(clippy::expect_used)]
    fn load_user(&self, user_id: UserId) -> Result<Option<User>, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").users.get(&user_id).cloned())
    }

    #[allow(clippy::expect_used)]
    fn list_users(&self) -> Result<Vec<User>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        let mut users: Vec<User> = inner.users.values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    #[allow(clippy::expect_used)]
    fn set_presence(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        last_seen: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let user = inner.users.get_mut(&user_id).ok_or(StorageError::user(user_id))?;
        user.status = status;
        user.last_seen = Some(last_seen);

        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn create_conversation(
        &self,
        conversation: &NewConversation,
    ) -> Result<CreateConversation, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let pair = conversation.direct_pair();
        if let Some(pair) = pair
            && let Some(existing) =
                inner.direct_pairs.get(&pair).and_then(|id| inner.conversations.get(id))
        {
            return Ok(CreateConversation::Existing(existing.clone()));
        }

        let id = inner.next_conversation_id;
        inner.next_conversation_id += 1;

        let stored = Conversation {
            id,
            name: conversation.name.clone(),
            is_group: conversation.is_group,
            participant_ids: conversation.distinct_participants(),
            created_at: conversation.created_at,
        };
        inner.conversations.insert(id, stored.clone());
        if let Some(pair) = pair {
            inner.direct_pairs.insert(pair, id);
        }

        Ok(CreateConversation::Created(stored))
    }

    #[allow(clippy::expect_used)]
    fn load_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<Conversation>, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").conversations.get(&conversation_id).cloned())
    }

    #[allow(clippy::expect_used)]
    fn find_direct_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<ConversationId>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner.direct_pairs.get(&canonical_pair(a, b)).copied())
    }

    #[allow(clippy::expect_used)]
    fn list_conversations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Conversation>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner.conversations.values().filter(|c| c.has_participant(user_id)).cloned().collect())
    }

    #[allow(clippy::expect_used)]
    fn list_participants(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Participant>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        let Some(conversation) = inner.conversations.get(&conversation_id) else {
            return Ok(Vec::new());
        };

        Ok(conversation
            .participant_ids
            .iter()
            .map(|&user_id| Participant {
                user_id,
                presence: inner.users.get(&user_id).map_or(PresenceStatus::Offline, |u| u.status),
            })
            .collect())
    }

    #[allow(clippy::expect_used)]
    fn insert_message(&self, message: &NewMessage) -> Result<MessageId, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        if !inner.conversations.contains_key(&message.conversation_id) {
            return Err(StorageError::conversation(message.conversation_id));
        }

        let id = inner.next_message_id;
        inner.next_message_id += 1;
        inner.messages.insert(id, StoredMessage::from_new(id, message));

        debug_assert!(inner.messages.contains_key(&id));

        Ok(id)
    }

    #[allow(clippy::expect_used)]
    fn insert_message_with_statuses(
        &self,
        message: &NewMessage,
        statuses: &[(UserId, DeliveryStatus)],
    ) -> Result<MessageId, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        if !inner.conversations.contains_key(&message.conversation_id) {
            return Err(StorageError::conversation(message.conversation_id));
        }

        let id = inner.next_message_id;
        inner.next_message_id += 1;
        inner.messages.insert(id, StoredMessage::from_new(id, message));
        for &(user_id, status) in statuses {
            inner.statuses.insert((id, user_id), status);
        }

        Ok(id)
    }

    #[allow(clippy::expect_used)]
    fn load_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        let mut messages: Vec<StoredMessage> = inner
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| (m.created_at, m.id));
        Ok(messages)
    }

    #[allow(clippy::expect_used)]
    fn record_delivery_status(
        &self,
        message_id: MessageId,
        user_id: UserId,
        status: DeliveryStatus,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        if !inner.messages.contains_key(&message_id) {
            return Err(StorageError::message(message_id));
        }

        inner.statuses.insert((message_id, user_id), status);
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn load_delivery_statuses(
        &self,
        message_id: MessageId,
    ) -> Result<Vec<DeliveryRecord>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner
            .statuses
            .range((message_id, UserId::MIN)..=(message_id, UserId::MAX))
            .map(|(&(message_id, user_id), &status)| DeliveryRecord { message_id, user_id, status })
            .collect())
    }
}
