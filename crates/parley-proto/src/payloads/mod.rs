//! JSON payloads carried by live connections.
//!
//! The enums here are shared by the wire format, storage and the HTTP API,
//! so their serialized spelling (lowercase) is part of the contract.

pub mod message;
pub mod presence;
pub mod session;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of content a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Plain text
    #[default]
    Text,
    /// Image reference
    Image,
    /// Video reference
    Video,
    /// File reference
    File,
}

impl MessageType {
    /// Lowercase wire spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::File => "file",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's current online/offline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Logged in
    Online,
    /// Logged out or never logged in
    #[default]
    Offline,
}

impl PresenceStatus {
    /// Lowercase wire spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    /// Delivery status a message gets for a recipient in this state.
    pub const fn delivery_status(self) -> DeliveryStatus {
        match self {
            Self::Online => DeliveryStatus::Delivered,
            Self::Offline => DeliveryStatus::Sent,
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-recipient delivery state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Persisted only
    Sent,
    /// Recipient was online when the message was resolved
    Delivered,
}

impl DeliveryStatus {
    /// Lowercase wire spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
