//! Chaotic storage wrapper for fault injection testing
//!
//! Randomly fails operations so chaos tests can check that the delivery core
//! never broadcasts a message whose persistence did not fully succeed.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use chrono::{DateTime, Utc};
use parley_proto::{
    ConversationId, DeliveryStatus, MessageId, PresenceStatus, UserId,
};

use super::{
    Conversation, CreateConversation, DeliveryRecord, NewConversation, NewMessage, Participant,
    Storage, StorageError, StoredMessage, User,
};

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but fails operations
/// with the configured probability. Failures are injected before the
/// delegate is called, so a failed operation never has side effects.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    /// Operations attempted, failed or not
    operation_count: Arc<AtomicUsize>,
    /// Operations that had a failure injected
    failure_count: Arc<AtomicUsize>,
}

/// Linear congruential generator, reproducible for a given seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Create a new chaotic storage wrapper with a fixed seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(AtomicUsize::new(0)),
            failure_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of storage operations attempted.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    /// Number of operations that failed by injection.
    pub fn failure_count(&self) -> usize {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Count the operation and decide whether it fails.
    fn inject(&self, operation: &'static str) -> Result<(), StorageError> {
        self.operation_count.fetch_add(1, Ordering::Relaxed);

        #[allow(clippy::expect_used)]
        let fail = self.rng.lock().expect("ChaoticRng mutex poisoned").next() < self.failure_rate;

        if fail {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::Io(format!("chaotic failure injection ({operation})")));
        }
        Ok(())
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<User, StorageError> {
        self.inject("create_user")?;
        self.inner.create_user(username, password_hash, created_at)
    }

    fn load_password_hash(&self, user_id: UserId) -> Result<Option<String>, StorageError> {
        self.inject("load_password_hash")?;
        self.inner.load_password_hash(user_id)
    }

    fn find_user_by_name(&self, username: &str) -> Result<Option<User>, StorageError> {
        self.inject("find_user_by_name")?;
        self.inner.find_user_by_name(username)
    }

    fn load_user(&self, user_id: UserId) -> Result<Option<User>, StorageError> {
        self.inject("load_user")?;
        self.inner.load_user(user_id)
    }

    fn list_users(&self) -> Result<Vec<User>, StorageError> {
        self.inject("list_users")?;
        self.inner.list_users()
    }

    fn set_presence(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        last_seen: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.inject("set_presence")?;
        self.inner.set_presence(user_id, status, last_seen)
    }

    fn create_conversation(
        &self,
        conversation: &NewConversation,
    ) -> Result<CreateConversation, StorageError> {
        self.inject("create_conversation")?;
        self.inner.create_conversation(conversation)
    }

    fn load_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<Conversation>, StorageError> {
        self.inject("load_conversation")?;
        self.inner.load_conversation(conversation_id)
    }

    fn find_direct_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<ConversationId>, StorageError> {
        self.inject("find_direct_conversation")?;
        self.inner.find_direct_conversation(a, b)
    }

    fn list_conversations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Conversation>, StorageError> {
        self.inject("list_conversations_for_user")?;
        self.inner.list_conversations_for_user(user_id)
    }

    fn list_participants(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Participant>, StorageError> {
        self.inject("list_participants")?;
        self.inner.list_participants(conversation_id)
    }

    fn insert_message(&self, message: &NewMessage) -> Result<MessageId, StorageError> {
        self.inject("insert_message")?;
        self.inner.insert_message(message)
    }

    fn insert_message_with_statuses(
        &self,
        message: &NewMessage,
        statuses: &[(UserId, DeliveryStatus)],
    ) -> Result<MessageId, StorageError> {
        self.inject("insert_message_with_statuses")?;
        self.inner.insert_message_with_statuses(message, statuses)
    }

    fn load_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        self.inject("load_messages")?;
        self.inner.load_messages(conversation_id)
    }

    fn record_delivery_status(
        &self,
        message_id: MessageId,
        user_id: UserId,
        status: DeliveryStatus,
    ) -> Result<(), StorageError> {
        self.inject("record_delivery_status")?;
        self.inner.record_delivery_status(message_id, user_id, status)
    }

    fn load_delivery_statuses(
        &self,
        message_id: MessageId,
    ) -> Result<Vec<DeliveryRecord>, StorageError> {
        self.inject("load_delivery_statuses")?;
        self.inner.load_delivery_statuses(message_id)
    }
}
