//! Fuzz target for the delivery core under storage failures
//!
//! # Strategy
//!
//! - Variable failure rates (0% to 90%)
//! - Messages from members and outsiders, presence flips, reconnects and
//!   dead connections interleaved
//!
//! # Invariants
//!
//! - The core NEVER panics on storage or transport errors
//! - Every stored message has a complete set of status rows, whether or not
//!   it was broadcast
//! - Broadcast recipients are exactly the conversation's participants

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_harness::{
    DeliverySnapshot, InvariantRegistry, ObservedBroadcast, RecordingConnection, SimEnv,
};
use parley_proto::{MessageType, PresenceStatus};
use parley_server::{
    ChaoticStorage, ConnectionSink, DeliveryConfig, DeliveryCore, Environment, MemoryStorage,
    PresenceEvent, Storage,
    storage::{NewConversation, NewMessage},
};

const USERS: u64 = 4;

#[derive(Debug, Clone, Arbitrary)]
struct ChaosScenario {
    /// Seed for ChaoticStorage RNG (deterministic failures)
    chaos_seed: u64,
    /// Failure rate 0-9 maps to 0%-90%
    failure_rate_tenth: u8,
    /// Sequence of operations to perform
    operations: Vec<ChaosOperation>,
}

#[derive(Debug, Clone, Arbitrary)]
enum ChaosOperation {
    Connect { user: u8 },
    Disconnect { user: u8 },
    KillConnection { user: u8 },
    Send { sender: u8, conversation: u8, content: String },
    Presence { user: u8, online: bool },
}

fn user(raw: u8) -> u64 {
    u64::from(raw) % USERS + 1
}

fuzz_target!(|scenario: ChaosScenario| {
    let failure_rate = f64::from(scenario.failure_rate_tenth % 10) / 10.0;
    let env = SimEnv::with_seed(scenario.chaos_seed);

    let inner = MemoryStorage::new();
    for name in ["alice", "bob", "carol", "dave"] {
        inner.create_user(name, "hash", env.now()).expect("memory storage");
    }
    // Conversation 1: users 1-3 as a group. Conversation 2: users 1 and 4.
    for (is_group, participant_ids) in [(true, vec![1, 2, 3]), (false, vec![1, 4])] {
        inner
            .create_conversation(&NewConversation {
                name: None,
                is_group,
                participant_ids,
                created_at: env.now(),
            })
            .expect("memory storage");
    }

    let storage = ChaoticStorage::with_seed(inner, failure_rate, scenario.chaos_seed);
    let mut core = DeliveryCore::new(env.clone(), storage, DeliveryConfig::default());

    let mut connections: Vec<(u64, RecordingConnection)> = Vec::new();
    let mut next_connection_id = 1;

    for operation in scenario.operations.into_iter().take(64) {
        match operation {
            ChaosOperation::Connect { user: raw } => {
                let connection = RecordingConnection::new(next_connection_id);
                next_connection_id += 1;
                connections.push((user(raw), connection.clone()));
                core.register(user(raw), connection);
            },
            ChaosOperation::Disconnect { user: raw } => {
                if let Some((_, connection)) = connections.iter().rev().find(|(u, _)| *u == user(raw)) {
                    core.unregister(user(raw), connection.id());
                }
            },
            ChaosOperation::KillConnection { user: raw } => {
                if let Some((_, connection)) = connections.iter().rev().find(|(u, _)| *u == user(raw)) {
                    connection.fail_sends();
                }
            },
            ChaosOperation::Send { sender, conversation, content } => {
                let _ = core.handle_message(NewMessage {
                    conversation_id: u64::from(conversation % 3),
                    sender_id: user(sender),
                    content,
                    message_type: MessageType::Text,
                    received_at: env.now(),
                });
            },
            ChaosOperation::Presence { user: raw, online } => {
                let status = if online { PresenceStatus::Online } else { PresenceStatus::Offline };
                core.handle_presence(PresenceEvent { user_id: user(raw), status });
            },
        }
    }

    let observed = connections
        .iter()
        .flat_map(|(user_id, connection)| ObservedBroadcast::from_connection(*user_id, connection))
        .collect();
    let snapshot =
        DeliverySnapshot::capture(core.storage().inner(), &[1, 2], observed).expect("memory storage");

    InvariantRegistry::standard().assert_all(&snapshot, "delivery chaos fuzzer");
});
