//! Deterministic test doubles for the Parley server.
//!
//! [`SimEnv`] replaces the wall clock and OS RNG, [`RecordingConnection`]
//! replaces a WebSocket, and the `invariants` module checks delivery
//! properties against a [`DeliverySnapshot`] of storage plus everything the
//! recording connections observed.
//!
//! # Invariant Testing
//!
//! Invariants verify WHAT must be true across all execution paths, not
//! specific scenarios. [`InvariantRegistry::standard()`] holds for fault-free
//! runs and for runs over failing storage alike.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod recording;
pub mod sim_env;

pub use invariants::{
    BroadcastsBackedByStatus, DeliverySnapshot, Invariant, InvariantRegistry, InvariantResult,
    MessageSnapshot, ObservedBroadcast, RecipientsMatchParticipants, StatusRowsComplete,
    Violation,
};
pub use recording::RecordingConnection;
pub use sim_env::SimEnv;
