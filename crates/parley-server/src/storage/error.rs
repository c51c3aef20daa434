//! Storage error types.
//!
//! - `NotFound`: referenced user, conversation or message doesn't exist
//! - `Conflict`: a uniqueness constraint was violated
//! - `Serialization`: failed to encode/decode a stored record
//! - `Io`: underlying storage system errors

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Referenced record does not exist
    #[error("{kind} {id} not found")]
    NotFound {
        /// Record kind ("user", "conversation", "message")
        kind: &'static str,
        /// Id that was looked up
        id: u64,
    },

    /// Uniqueness constraint violated (e.g. username already taken)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),
}

impl StorageError {
    pub(crate) fn user(id: u64) -> Self {
        Self::NotFound { kind: "user", id }
    }

    pub(crate) fn conversation(id: u64) -> Self {
        Self::NotFound { kind: "conversation", id }
    }

    pub(crate) fn message(id: u64) -> Self {
        Self::NotFound { kind: "message", id }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}
