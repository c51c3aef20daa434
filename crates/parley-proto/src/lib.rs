//! Parley wire protocol.
//!
//! Live connections carry one JSON object per frame. Clients send
//! [`ClientMessage`] frames; the server answers with a [`ServerFrame`]: the
//! connection acknowledgment, message broadcasts, and presence updates.
//!
//! # Invariants
//!
//! - A [`MessageBroadcast`] only exists for a message that storage has already
//!   assigned an id to. The id field is never a placeholder.
//! - Inbound frames above [`MAX_FRAME_SIZE`] are rejected before parsing.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod frame;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::{MAX_FRAME_SIZE, ServerFrame};
pub use payloads::{
    DeliveryStatus, MessageType, PresenceStatus,
    message::{ClientMessage, MessageBroadcast},
    presence::{StatusUpdate, StatusUpdateTag},
    session::Connected,
};

/// Identifier of a registered user.
pub type UserId = u64;

/// Identifier of a conversation.
pub type ConversationId = u64;

/// Identifier assigned to a message once it has been durably stored.
pub type MessageId = u64;
