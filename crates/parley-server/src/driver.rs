//! Delivery driver.
//!
//! [`DeliveryCore`] is the single serialization point of the server. It owns
//! the [`ConnectionRegistry`], persists inbound messages and presence changes
//! through [`Storage`], and fans encoded frames out to live connections.
//!
//! # Invariants
//!
//! - A message frame is pushed only after the message and one status row per
//!   participant have been stored. Any storage failure drops the message with
//!   no partial broadcast.
//! - A connection whose push fails is removed from the registry (and closed)
//!   before the next event is processed.
//! - Presence frames never reach the user whose presence changed.

use std::sync::Arc;

use chrono::{FixedOffset, Offset, SecondsFormat, Utc};
use parley_proto::{MessageBroadcast, PresenceStatus, ServerFrame, UserId};
use tokio::sync::oneshot;

use crate::{
    connection::{ConnectionId, ConnectionSink},
    delivery_error::DeliveryError,
    env::Environment,
    registry::ConnectionRegistry,
    storage::{NewMessage, Storage},
};

/// Delivery configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Offset used for broadcast `created_at` stamps
    pub utc_offset: FixedOffset,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self { utc_offset: Utc.fix() }
    }
}

/// A user's presence changed (login or logout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceEvent {
    /// User whose presence changed
    pub user_id: UserId,
    /// New presence
    pub status: PresenceStatus,
}

/// Where the outcome of an HTTP-submitted message is reported.
pub type MessageReply = oneshot::Sender<Result<MessageBroadcast, DeliveryError>>;

/// Events that the delivery core processes, in queue order.
pub enum DeliveryEvent<C> {
    /// A connection adapter finished its handshake
    Register {
        /// Authenticated user of the connection
        user_id: UserId,
        /// Outbound handle
        connection: C,
    },

    /// A message to persist and fan out
    Message {
        /// The message
        message: NewMessage,
        /// Optional requester waiting for the outcome
        reply: Option<MessageReply>,
    },

    /// Login or logout
    Presence(PresenceEvent),

    /// A connection adapter terminated
    Unregister {
        /// User of the connection
        user_id: UserId,
        /// The terminated connection; ignored if superseded
        connection_id: ConnectionId,
    },
}

/// Message delivery core.
///
/// Processes one [`DeliveryEvent`] at a time. Everything here is synchronous;
/// [`crate::DeliveryHandle`] runs it on a dedicated worker thread.
pub struct DeliveryCore<E, S, C>
where
    E: Environment,
    S: Storage,
    C: ConnectionSink,
{
    /// Live connections (user id → connection)
    registry: ConnectionRegistry<C>,
    /// Storage backend
    storage: S,
    /// Environment (time, RNG)
    env: E,
    /// Delivery configuration
    config: DeliveryConfig,
}

impl<E, S, C> DeliveryCore<E, S, C>
where
    E: Environment,
    S: Storage,
    C: ConnectionSink,
{
    /// Create a new delivery core with an empty registry.
    pub fn new(env: E, storage: S, config: DeliveryConfig) -> Self {
        Self { registry: ConnectionRegistry::new(), storage, env, config }
    }

    /// Live connection registry.
    pub fn registry(&self) -> &ConnectionRegistry<C> {
        &self.registry
    }

    /// Storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Process one event.
    ///
    /// This is the main entry point for the delivery worker. Failures are
    /// logged here; message failures are also reported on the reply channel
    /// when one is attached.
    pub fn process_event(&mut self, event: DeliveryEvent<C>) {
        match event {
            DeliveryEvent::Register { user_id, connection } => self.register(user_id, connection),
            DeliveryEvent::Message { message, reply } => {
                let result = self.handle_message(message);
                if let Some(reply) = reply {
                    // Requester may have given up; the outcome is already logged.
                    let _ = reply.send(result);
                }
            },
            DeliveryEvent::Presence(event) => self.handle_presence(event),
            DeliveryEvent::Unregister { user_id, connection_id } => {
                self.unregister(user_id, connection_id);
            },
        }
    }

    /// Register a live connection, superseding any previous one for the user.
    pub fn register(&mut self, user_id: UserId, connection: C) {
        let connection_id = connection.id();

        match self.registry.add(user_id, connection) {
            Some(old) => tracing::info!(
                user_id,
                connection_id,
                superseded = old.id(),
                "connection superseded by reconnect"
            ),
            None => tracing::debug!(user_id, connection_id, "connection registered"),
        }
    }

    /// Remove `connection_id` if it is still the user's live connection.
    pub fn unregister(&mut self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let removed = self.registry.remove_connection(user_id, connection_id);

        if removed {
            tracing::debug!(user_id, connection_id, "connection unregistered");
        } else {
            tracing::debug!(user_id, connection_id, "ignoring unregister of stale connection");
        }
        removed
    }

    /// Persist a message, record per-recipient status and fan it out.
    ///
    /// # Errors
    ///
    /// - `DeliveryError::ConversationNotFound` if the conversation has no
    ///   participants
    /// - `DeliveryError::NotParticipant` if the sender is not a participant
    /// - `DeliveryError::Storage` if the message and its status rows could not
    ///   be written; nothing is stored in that case
    pub fn handle_message(
        &mut self,
        message: NewMessage,
    ) -> Result<MessageBroadcast, DeliveryError> {
        let conversation_id = message.conversation_id;
        let sender_id = message.sender_id;

        let result = self.persist_and_deliver(message);

        match &result {
            Ok(broadcast) => tracing::debug!(
                message_id = broadcast.id,
                conversation_id,
                sender_id,
                recipients = broadcast.recipient_ids.len(),
                "message delivered"
            ),
            Err(e) if e.is_rejection() => {
                tracing::warn!(conversation_id, sender_id, error = %e, "message rejected");
            },
            Err(e) => tracing::error!(conversation_id, sender_id, error = %e, "message dropped"),
        }

        result
    }

    /// Persist a presence change and notify every other live connection.
    ///
    /// A persistence failure is logged and the broadcast still happens. An
    /// `offline` change also closes the user's own connection.
    pub fn handle_presence(&mut self, event: PresenceEvent) {
        let PresenceEvent { user_id, status } = event;

        if let Err(e) = self.storage.set_presence(user_id, status, self.env.now()) {
            tracing::error!(user_id, %status, error = %e, "failed to persist presence");
        }

        if status == PresenceStatus::Offline && self.registry.remove(user_id) {
            tracing::info!(user_id, "closed live connection on logout");
        }

        let frame = match ServerFrame::status(user_id, status).encode() {
            Ok(text) => Arc::<str>::from(text),
            Err(e) => {
                tracing::error!(user_id, error = %e, "failed to encode status update");
                return;
            },
        };

        let targets: Vec<UserId> = self.registry.user_ids().filter(|&id| id != user_id).collect();
        let pushed = self.fan_out(&frame, &targets);

        tracing::debug!(user_id, %status, pushed, "presence broadcast");
    }

    fn persist_and_deliver(
        &mut self,
        message: NewMessage,
    ) -> Result<MessageBroadcast, DeliveryError> {
        let participants = self.storage.list_participants(message.conversation_id)?;

        if participants.is_empty() {
            return Err(DeliveryError::ConversationNotFound(message.conversation_id));
        }
        if !participants.iter().any(|p| p.user_id == message.sender_id) {
            return Err(DeliveryError::NotParticipant {
                conversation_id: message.conversation_id,
                sender_id: message.sender_id,
            });
        }

        let statuses: Vec<_> =
            participants.iter().map(|p| (p.user_id, p.presence.delivery_status())).collect();
        let message_id = self.storage.insert_message_with_statuses(&message, &statuses)?;

        let broadcast = MessageBroadcast {
            id: message_id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            message_type: message.message_type,
            recipient_ids: participants.iter().map(|p| p.user_id).collect(),
            created_at: self.timestamp(),
        };

        let frame = Arc::<str>::from(ServerFrame::Message(broadcast.clone()).encode()?);
        self.fan_out(&frame, &broadcast.recipient_ids);

        Ok(broadcast)
    }

    /// Push `frame` to every target with a live connection.
    ///
    /// Connections whose push fails are removed and closed. Returns the
    /// number of successful pushes.
    fn fan_out(&mut self, frame: &Arc<str>, targets: &[UserId]) -> usize {
        let mut pushed = 0;
        let mut dead = Vec::new();

        for &user_id in targets {
            let Some(connection) = self.registry.lookup(user_id) else {
                continue;
            };

            match connection.send(Arc::clone(frame)) {
                Ok(()) => pushed += 1,
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "dropping dead connection");
                    dead.push(user_id);
                },
            }
        }

        for user_id in dead {
            self.registry.remove(user_id);
        }

        pushed
    }

    /// RFC 3339 broadcast timestamp in the configured offset.
    fn timestamp(&self) -> String {
        self.env
            .now()
            .with_timezone(&self.config.utc_offset)
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    };

    use chrono::{DateTime, TimeZone};
    use parley_proto::{DeliveryStatus, MessageType};

    use super::*;
    use crate::{
        connection::TransportError,
        storage::{ChaoticStorage, DeliveryRecord, MemoryStorage, NewConversation},
    };

    #[derive(Clone)]
    struct FixedEnv(DateTime<Utc>);

    impl Environment for FixedEnv {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(7);
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    /// Sink that records frames; optionally fails every push.
    #[derive(Clone)]
    struct TestSink {
        id: ConnectionId,
        frames: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
        failing: bool,
    }

    impl TestSink {
        fn new(id: ConnectionId) -> Self {
            Self {
                id,
                frames: Arc::new(Mutex::new(Vec::new())),
                closed: Arc::new(AtomicBool::new(false)),
                failing: false,
            }
        }

        fn failing(id: ConnectionId) -> Self {
            Self { failing: true, ..Self::new(id) }
        }

        fn frames(&self) -> Vec<ServerFrame> {
            self.frames.lock().unwrap().iter().map(|f| ServerFrame::decode(f).unwrap()).collect()
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl ConnectionSink for TestSink {
        fn id(&self) -> ConnectionId {
            self.id
        }

        fn send(&self, frame: Arc<str>) -> Result<(), TransportError> {
            if self.failing || self.is_closed() {
                return Err(TransportError::Closed(self.id));
            }
            self.frames.lock().unwrap().push(frame.to_string());
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Sink that counts stored status rows at the moment a message frame
    /// is pushed.
    struct AuditingSink {
        storage: MemoryStorage,
        rows_at_push: Arc<Mutex<Vec<usize>>>,
    }

    impl ConnectionSink for AuditingSink {
        fn id(&self) -> ConnectionId {
            1
        }

        fn send(&self, frame: Arc<str>) -> Result<(), TransportError> {
            if let Ok(ServerFrame::Message(broadcast)) = ServerFrame::decode(&frame) {
                let rows = self.storage.load_delivery_statuses(broadcast.id).unwrap().len();
                self.rows_at_push.lock().unwrap().push(rows);
            }
            Ok(())
        }

        fn close(&self) {}
    }

    /// Users 1..=count, one conversation over all of them.
    fn seed(storage: &impl Storage, count: u64) -> u64 {
        let now = noon();
        for i in 1..=count {
            storage.create_user(&format!("user{i}"), "hash", now).unwrap();
        }
        storage
            .create_conversation(&NewConversation {
                name: None,
                is_group: count > 2,
                participant_ids: (1..=count).collect(),
                created_at: now,
            })
            .unwrap()
            .conversation()
            .id
    }

    fn text(conversation_id: u64, sender_id: UserId, content: &str) -> NewMessage {
        NewMessage {
            conversation_id,
            sender_id,
            content: content.into(),
            message_type: MessageType::Text,
            received_at: noon(),
        }
    }

    fn core<S: Storage, C: ConnectionSink>(storage: S) -> DeliveryCore<FixedEnv, S, C> {
        let config = DeliveryConfig { utc_offset: FixedOffset::east_opt(3 * 3600).unwrap() };
        DeliveryCore::new(FixedEnv(noon()), storage, config)
    }

    #[test]
    fn online_sender_offline_recipient() {
        let storage = MemoryStorage::new();
        let conv = seed(&storage, 2);
        storage.set_presence(1, PresenceStatus::Online, noon()).unwrap();

        let mut core = core(storage.clone());
        let alice = TestSink::new(100);
        core.register(1, alice.clone());

        let broadcast = core.handle_message(text(conv, 1, "hi")).unwrap();

        assert_eq!(broadcast.recipient_ids, vec![1, 2]);
        assert_eq!(broadcast.created_at, "2024-05-01T15:00:00+03:00");
        assert_eq!(storage.load_delivery_statuses(broadcast.id).unwrap(), vec![
            DeliveryRecord { message_id: broadcast.id, user_id: 1, status: DeliveryStatus::Delivered },
            DeliveryRecord { message_id: broadcast.id, user_id: 2, status: DeliveryStatus::Sent },
        ]);
        assert_eq!(alice.frames(), vec![ServerFrame::Message(broadcast)]);
    }

    #[test]
    fn one_status_row_per_participant() {
        let storage = MemoryStorage::new();
        let conv = seed(&storage, 5);
        for online in [2, 4] {
            storage.set_presence(online, PresenceStatus::Online, noon()).unwrap();
        }

        let mut core: DeliveryCore<_, _, TestSink> = core(storage.clone());
        let broadcast = core.handle_message(text(conv, 3, "group hello")).unwrap();

        let rows = storage.load_delivery_statuses(broadcast.id).unwrap();
        assert_eq!(rows.len(), 5);
        for row in rows {
            let expected = if matches!(row.user_id, 2 | 4) {
                DeliveryStatus::Delivered
            } else {
                DeliveryStatus::Sent
            };
            assert_eq!(row.status, expected, "user {}", row.user_id);
        }
    }

    #[test]
    fn status_rows_exist_before_frame_is_pushed() {
        let storage = MemoryStorage::new();
        let conv = seed(&storage, 3);
        let rows_at_push = Arc::new(Mutex::new(Vec::new()));

        let mut core = core(storage.clone());
        core.register(1, AuditingSink { storage: storage.clone(), rows_at_push: rows_at_push.clone() });

        for i in 0..4 {
            core.handle_message(text(conv, 2, &format!("m{i}"))).unwrap();
        }

        assert_eq!(*rows_at_push.lock().unwrap(), vec![3, 3, 3, 3]);
    }

    #[test]
    fn unknown_conversation_rejected_before_write() {
        let storage = MemoryStorage::new();
        seed(&storage, 2);

        let mut core: DeliveryCore<_, _, TestSink> = core(storage.clone());
        let result = core.handle_message(text(99, 1, "hi"));

        assert_eq!(result, Err(DeliveryError::ConversationNotFound(99)));
        assert_eq!(storage.message_count(), 0);
    }

    #[test]
    fn non_participant_rejected_before_write() {
        let storage = MemoryStorage::new();
        let conv = seed(&storage, 2);
        storage.create_user("outsider", "hash", noon()).unwrap();

        let mut core = core(storage.clone());
        let bob = TestSink::new(200);
        core.register(2, bob.clone());

        let result = core.handle_message(text(conv, 3, "let me in"));

        assert_eq!(result, Err(DeliveryError::NotParticipant { conversation_id: conv, sender_id: 3 }));
        assert_eq!(storage.message_count(), 0);
        assert!(bob.frames().is_empty());
    }

    #[test]
    fn storage_failure_pushes_nothing() {
        let storage = MemoryStorage::new();
        let conv = seed(&storage, 2);

        let mut core = core(ChaoticStorage::new(storage, 1.0));
        let alice = TestSink::new(100);
        core.register(1, alice.clone());

        let result = core.handle_message(text(conv, 1, "lost"));

        assert!(matches!(result, Err(DeliveryError::Storage(_))));
        assert!(alice.frames().is_empty());
    }

    #[test]
    fn failed_push_removes_connection() {
        let storage = MemoryStorage::new();
        let conv = seed(&storage, 2);

        let mut core = core(storage);
        let alice = TestSink::new(100);
        let bob = TestSink::failing(200);
        core.register(1, alice.clone());
        core.register(2, bob.clone());

        core.handle_message(text(conv, 1, "hi")).unwrap();

        assert!(core.registry().lookup(2).is_none());
        assert!(bob.is_closed());
        assert_eq!(alice.frames().len(), 1);
        assert!(core.registry().lookup(1).is_some());
    }

    #[test]
    fn presence_broadcast_excludes_actor() {
        let storage = MemoryStorage::new();
        seed(&storage, 3);

        let mut core = core(storage.clone());
        let sinks: Vec<_> = (1..=3).map(|u| TestSink::new(u * 100)).collect();
        for (user, sink) in (1..=3).zip(&sinks) {
            core.register(user, sink.clone());
        }

        core.handle_presence(PresenceEvent { user_id: 1, status: PresenceStatus::Online });

        assert!(sinks[0].frames().is_empty());
        for sink in &sinks[1..] {
            assert_eq!(sink.frames(), vec![ServerFrame::status(1, PresenceStatus::Online)]);
        }

        let user = storage.load_user(1).unwrap().unwrap();
        assert_eq!(user.status, PresenceStatus::Online);
        assert_eq!(user.last_seen, Some(noon()));
    }

    #[test]
    fn offline_presence_closes_own_connection() {
        let storage = MemoryStorage::new();
        seed(&storage, 2);

        let mut core = core(storage);
        let alice = TestSink::new(100);
        let bob = TestSink::new(200);
        core.register(1, alice.clone());
        core.register(2, bob.clone());

        core.handle_presence(PresenceEvent { user_id: 1, status: PresenceStatus::Offline });

        assert!(core.registry().lookup(1).is_none());
        assert!(alice.is_closed());
        assert!(alice.frames().is_empty());
        assert_eq!(bob.frames(), vec![ServerFrame::status(1, PresenceStatus::Offline)]);
    }

    #[test]
    fn presence_persistence_failure_still_broadcasts() {
        let mut core = core(ChaoticStorage::new(MemoryStorage::new(), 1.0));
        let bob = TestSink::new(200);
        core.register(2, bob.clone());

        core.handle_presence(PresenceEvent { user_id: 1, status: PresenceStatus::Online });

        assert_eq!(bob.frames(), vec![ServerFrame::status(1, PresenceStatus::Online)]);
    }

    #[test]
    fn process_event_answers_reply_channel() {
        let storage = MemoryStorage::new();
        let conv = seed(&storage, 2);
        let mut core: DeliveryCore<_, _, TestSink> = core(storage);

        let (tx, mut rx) = oneshot::channel();
        core.process_event(DeliveryEvent::Message { message: text(conv, 2, "hey"), reply: Some(tx) });

        let broadcast = rx.try_recv().unwrap().unwrap();
        assert_eq!(broadcast.sender_id, 2);
        assert_eq!(broadcast.content, "hey");

        let (tx, mut rx) = oneshot::channel();
        core.process_event(DeliveryEvent::Message { message: text(42, 2, "hey"), reply: Some(tx) });
        assert_eq!(rx.try_recv().unwrap(), Err(DeliveryError::ConversationNotFound(42)));
    }

    #[test]
    fn stale_unregister_after_reconnect_is_ignored() {
        let mut core = core(MemoryStorage::new());
        let old = TestSink::new(100);
        let new = TestSink::new(101);

        core.process_event(DeliveryEvent::Register { user_id: 1, connection: old.clone() });
        core.process_event(DeliveryEvent::Register { user_id: 1, connection: new.clone() });
        assert!(old.is_closed());

        core.process_event(DeliveryEvent::Unregister { user_id: 1, connection_id: 100 });
        assert_eq!(core.registry().lookup(1).map(ConnectionSink::id), Some(101));
        assert!(!new.is_closed());

        core.process_event(DeliveryEvent::Unregister { user_id: 1, connection_id: 101 });
        assert!(core.registry().is_empty());
    }
}
