//! Session payloads.

use serde::{Deserialize, Serialize};

/// Acknowledgment written to a client as soon as its connection is upgraded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connected {
    /// Human-readable greeting
    pub message: String,
}

impl Connected {
    /// Greeting text sent on every new connection.
    pub const GREETING: &'static str = "connected to chat server";
}

impl Default for Connected {
    fn default() -> Self {
        Self { message: Self::GREETING.to_string() }
    }
}
