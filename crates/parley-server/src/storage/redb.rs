//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety.
//! All state survives server restarts. Every operation runs in a single
//! transaction, so a failed multi-table write leaves nothing behind.

use std::{fmt::Display, path::Path, sync::Arc};

use chrono::{DateTime, Utc};
use parley_proto::{
    ConversationId, DeliveryStatus, MessageId, PresenceStatus, UserId,
};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};

use super::{
    Conversation, CreateConversation, DeliveryRecord, NewConversation, NewMessage, Participant,
    Storage, StorageError, StoredMessage, User, canonical_pair,
};

/// Table: users
/// Key: user_id as big-endian bytes [8 bytes]
/// Value: CBOR-encoded User
const USERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("users");

/// Table: usernames
/// Key: UTF-8 username
/// Value: user_id as big-endian bytes [8 bytes]
const USERNAMES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("usernames");

/// Table: password_hashes
/// Key: user_id as big-endian bytes [8 bytes]
/// Value: UTF-8 bcrypt hash
const PASSWORD_HASHES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("password_hashes");

/// Table: conversations
/// Key: conversation_id as big-endian bytes [8 bytes]
/// Value: CBOR-encoded Conversation
const CONVERSATIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("conversations");

/// Table: user_conversations
/// Key: (user_id, conversation_id) as big-endian bytes [16 bytes]
/// Value: empty
const USER_CONVERSATIONS: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("user_conversations");

/// Table: direct_pairs
/// Key: canonical (low, high) user pair as big-endian bytes [16 bytes]
/// Value: conversation_id as big-endian bytes [8 bytes]
const DIRECT_PAIRS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("direct_pairs");

/// Table: messages
/// Key: message_id as big-endian bytes [8 bytes]
/// Value: CBOR-encoded StoredMessage
const MESSAGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("messages");

/// Table: conversation_messages
/// Key: (conversation_id, message_id) as big-endian bytes [16 bytes]
/// Value: empty
const CONVERSATION_MESSAGES: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("conversation_messages");

/// Table: delivery_status
/// Key: (message_id, user_id) as big-endian bytes [16 bytes]
/// Value: CBOR-encoded DeliveryStatus
const DELIVERY_STATUS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("delivery_status");

const EMPTY: &[u8] = &[];

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates all tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        for table in [
            USERS,
            USERNAMES,
            PASSWORD_HASHES,
            CONVERSATIONS,
            USER_CONVERSATIONS,
            DIRECT_PAIRS,
            MESSAGES,
            CONVERSATION_MESSAGES,
            DELIVERY_STATUS,
        ] {
            let _ = txn.open_table(table).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl Storage for RedbStorage {
    fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<User, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        let user = {
            let mut users = txn.open_table(USERS).map_err(io)?;
            let mut names = txn.open_table(USERNAMES).map_err(io)?;
            let mut hashes = txn.open_table(PASSWORD_HASHES).map_err(io)?;

            if names.get(username.as_bytes()).map_err(io)?.is_some() {
                return Err(StorageError::Conflict(format!("username {username} already exists")));
            }

            let id = next_id(&users)?;
            let user = User {
                id,
                username: username.to_string(),
                status: PresenceStatus::Offline,
                last_seen: None,
                created_at,
            };

            users.insert(encode_id(id).as_slice(), encode(&user)?.as_slice()).map_err(io)?;
            names.insert(username.as_bytes(), encode_id(id).as_slice()).map_err(io)?;
            hashes.insert(encode_id(id).as_slice(), password_hash.as_bytes()).map_err(io)?;
            user
        };

        txn.commit().map_err(io)?;

        Ok(user)
    }

    fn load_password_hash(&self, user_id: UserId) -> Result<Option<String>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let hashes = txn.open_table(PASSWORD_HASHES).map_err(io)?;

        hashes
            .get(encode_id(user_id).as_slice())
            .map_err(io)?
            .map(|v| {
                String::from_utf8(v.value().to_vec())
                    .map_err(|e| StorageError::Serialization(e.to_string()))
            })
            .transpose()
    }

    fn find_user_by_name(&self, username: &str) -> Result<Option<User>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let names = txn.open_table(USERNAMES).map_err(io)?;
        let users = txn.open_table(USERS).map_err(io)?;

        let id = names.get(username.as_bytes()).map_err(io)?.map(|v| decode_id(v.value()));
        match id.transpose()? {
            Some(id) => get_record(&users, id),
            None => Ok(None),
        }
    }

    fn load_user(&self, user_id: UserId) -> Result<Option<User>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let users = txn.open_table(USERS).map_err(io)?;

        get_record(&users, user_id)
    }

    fn list_users(&self) -> Result<Vec<User>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(USERS).map_err(io)?;

        let mut users = Vec::new();
        for result in table.iter().map_err(io)? {
            let (_, value) = result.map_err(io)?;
            users.push(decode::<User>(value.value())?);
        }

        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    fn set_presence(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        last_seen: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        {
            let mut users = txn.open_table(USERS).map_err(io)?;

            let mut user: User =
                get_record(&users, user_id)?.ok_or(StorageError::user(user_id))?;
            user.status = status;
            user.last_seen = Some(last_seen);

            users.insert(encode_id(user_id).as_slice(), encode(&user)?.as_slice()).map_err(io)?;
        }

        txn.commit().map_err(io)?;

        Ok(())
    }

    fn create_conversation(
        &self,
        conversation: &NewConversation,
    ) -> Result<CreateConversation, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        let stored = {
            let mut conversations = txn.open_table(CONVERSATIONS).map_err(io)?;
            let mut pairs = txn.open_table(DIRECT_PAIRS).map_err(io)?;
            let mut memberships = txn.open_table(USER_CONVERSATIONS).map_err(io)?;

            let pair = conversation.direct_pair();
            if let Some((low, high)) = pair {
                let existing = pairs
                    .get(encode_pair_key(low, high).as_slice())
                    .map_err(io)?
                    .map(|v| decode_id(v.value()))
                    .transpose()?;

                if let Some(id) = existing {
                    let found: Conversation = get_record(&conversations, id)?
                        .ok_or(StorageError::conversation(id))?;
                    // Nothing written; dropping the transaction aborts it.
                    return Ok(CreateConversation::Existing(found));
                }
            }

            let id = next_id(&conversations)?;
            let stored = Conversation {
                id,
                name: conversation.name.clone(),
                is_group: conversation.is_group,
                participant_ids: conversation.distinct_participants(),
                created_at: conversation.created_at,
            };

            conversations.insert(encode_id(id).as_slice(), encode(&stored)?.as_slice()).map_err(io)?;
            for &user_id in &stored.participant_ids {
                memberships.insert(encode_pair_key(user_id, id).as_slice(), EMPTY).map_err(io)?;
            }
            if let Some((low, high)) = pair {
                pairs
                    .insert(encode_pair_key(low, high).as_slice(), encode_id(id).as_slice())
                    .map_err(io)?;
            }

            stored
        };

        txn.commit().map_err(io)?;

        Ok(CreateConversation::Created(stored))
    }

    fn load_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<Conversation>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(CONVERSATIONS).map_err(io)?;

        get_record(&table, conversation_id)
    }

    fn find_direct_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<ConversationId>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(DIRECT_PAIRS).map_err(io)?;

        let (low, high) = canonical_pair(a, b);
        table
            .get(encode_pair_key(low, high).as_slice())
            .map_err(io)?
            .map(|v| decode_id(v.value()))
            .transpose()
    }

    fn list_conversations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Conversation>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let memberships = txn.open_table(USER_CONVERSATIONS).map_err(io)?;
        let conversations = txn.open_table(CONVERSATIONS).map_err(io)?;

        let start_key = encode_pair_key(user_id, 0);
        let end_key = encode_pair_key(user_id, u64::MAX);

        let mut result = Vec::new();
        for entry in memberships.range(start_key.as_slice()..=end_key.as_slice()).map_err(io)? {
            let (key, _) = entry.map_err(io)?;
            let (_, conversation_id) = decode_pair_key(key.value())?;

            if let Some(conversation) = get_record(&conversations, conversation_id)? {
                result.push(conversation);
            }
        }

        Ok(result)
    }

    fn list_participants(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Participant>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let conversations = txn.open_table(CONVERSATIONS).map_err(io)?;
        let users = txn.open_table(USERS).map_err(io)?;

        let Some(conversation) = get_record::<Conversation, _>(&conversations, conversation_id)?
        else {
            return Ok(Vec::new());
        };

        let mut participants = Vec::with_capacity(conversation.participant_ids.len());
        for user_id in conversation.participant_ids {
            let presence = get_record::<User, _>(&users, user_id)?
                .map_or(PresenceStatus::Offline, |u| u.status);
            participants.push(Participant { user_id, presence });
        }

        Ok(participants)
    }

    fn insert_message(&self, message: &NewMessage) -> Result<MessageId, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        let id = {
            let conversations = txn.open_table(CONVERSATIONS).map_err(io)?;
            let mut messages = txn.open_table(MESSAGES).map_err(io)?;
            let mut index = txn.open_table(CONVERSATION_MESSAGES).map_err(io)?;

            let key = encode_id(message.conversation_id);
            if conversations.get(key.as_slice()).map_err(io)?.is_none() {
                return Err(StorageError::conversation(message.conversation_id));
            }

            let id = next_id(&messages)?;
            let stored = StoredMessage::from_new(id, message);

            messages.insert(encode_id(id).as_slice(), encode(&stored)?.as_slice()).map_err(io)?;
            index
                .insert(encode_pair_key(message.conversation_id, id).as_slice(), EMPTY)
                .map_err(io)?;
            id
        };

        txn.commit().map_err(io)?;

        Ok(id)
    }

    fn insert_message_with_statuses(
        &self,
        message: &NewMessage,
        statuses: &[(UserId, DeliveryStatus)],
    ) -> Result<MessageId, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        let id = {
            let conversations = txn.open_table(CONVERSATIONS).map_err(io)?;
            let mut messages = txn.open_table(MESSAGES).map_err(io)?;
            let mut index = txn.open_table(CONVERSATION_MESSAGES).map_err(io)?;
            let mut status_table = txn.open_table(DELIVERY_STATUS).map_err(io)?;

            let key = encode_id(message.conversation_id);
            if conversations.get(key.as_slice()).map_err(io)?.is_none() {
                return Err(StorageError::conversation(message.conversation_id));
            }

            let id = next_id(&messages)?;
            let stored = StoredMessage::from_new(id, message);

            messages.insert(encode_id(id).as_slice(), encode(&stored)?.as_slice()).map_err(io)?;
            index
                .insert(encode_pair_key(message.conversation_id, id).as_slice(), EMPTY)
                .map_err(io)?;
            for &(user_id, status) in statuses {
                status_table
                    .insert(encode_pair_key(id, user_id).as_slice(), encode(&status)?.as_slice())
                    .map_err(io)?;
            }
            id
        };

        // Dropping the transaction on an early return above aborts every write.
        txn.commit().map_err(io)?;

        Ok(id)
    }

    fn load_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let index = txn.open_table(CONVERSATION_MESSAGES).map_err(io)?;
        let messages = txn.open_table(MESSAGES).map_err(io)?;

        let start_key = encode_pair_key(conversation_id, 0);
        let end_key = encode_pair_key(conversation_id, u64::MAX);

        let mut result = Vec::new();
        for entry in index.range(start_key.as_slice()..=end_key.as_slice()).map_err(io)? {
            let (key, _) = entry.map_err(io)?;
            let (_, message_id) = decode_pair_key(key.value())?;

            let message: StoredMessage =
                get_record(&messages, message_id)?.ok_or(StorageError::message(message_id))?;
            result.push(message);
        }

        result.sort_by_key(|m| (m.created_at, m.id));
        Ok(result)
    }

    fn record_delivery_status(
        &self,
        message_id: MessageId,
        user_id: UserId,
        status: DeliveryStatus,
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        {
            let messages = txn.open_table(MESSAGES).map_err(io)?;
            let mut table = txn.open_table(DELIVERY_STATUS).map_err(io)?;

            if messages.get(encode_id(message_id).as_slice()).map_err(io)?.is_none() {
                return Err(StorageError::message(message_id));
            }

            table
                .insert(encode_pair_key(message_id, user_id).as_slice(), encode(&status)?.as_slice())
                .map_err(io)?;
        }

        txn.commit().map_err(io)?;

        Ok(())
    }

    fn load_delivery_statuses(
        &self,
        message_id: MessageId,
    ) -> Result<Vec<DeliveryRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(DELIVERY_STATUS).map_err(io)?;

        let start_key = encode_pair_key(message_id, 0);
        let end_key = encode_pair_key(message_id, u64::MAX);

        let mut rows = Vec::new();
        for entry in table.range(start_key.as_slice()..=end_key.as_slice()).map_err(io)? {
            let (key, value) = entry.map_err(io)?;
            let (message_id, user_id) = decode_pair_key(key.value())?;
            let status: DeliveryStatus = decode(value.value())?;

            rows.push(DeliveryRecord { message_id, user_id, status });
        }

        Ok(rows)
    }
}

fn io(err: impl Display) -> StorageError {
    StorageError::Io(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Load and decode the record stored under `id`.
fn get_record<T, Tbl>(table: &Tbl, id: u64) -> Result<Option<T>, StorageError>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<&'static [u8], &'static [u8]>,
{
    table.get(encode_id(id).as_slice()).map_err(io)?.map(|v| decode(v.value())).transpose()
}

/// Next sequential id for a table keyed by [`encode_id`]. Starts at 1.
fn next_id<Tbl: ReadableTable<&'static [u8], &'static [u8]>>(
    table: &Tbl,
) -> Result<u64, StorageError> {
    match table.last().map_err(io)? {
        Some((key, _)) => Ok(decode_id(key.value())? + 1),
        None => Ok(1),
    }
}

/// Encode an id as an 8-byte big-endian key.
///
/// Big-endian keeps lexicographic ordering equal to numeric ordering.
fn encode_id(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn decode_id(bytes: &[u8]) -> Result<u64, StorageError> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::Serialization(format!("expected 8-byte id, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}

/// Encode `(first, second)` as a 16-byte big-endian key.
///
/// Layout: [first: 8 bytes BE][second: 8 bytes BE]
fn encode_pair_key(first: u64, second: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&first.to_be_bytes());
    key[8..].copy_from_slice(&second.to_be_bytes());
    key
}

fn decode_pair_key(key: &[u8]) -> Result<(u64, u64), StorageError> {
    if key.len() != 16 {
        return Err(StorageError::Serialization(format!(
            "expected 16-byte pair key, got {}",
            key.len()
        )));
    }
    Ok((decode_id(&key[..8])?, decode_id(&key[8..])?))
}
