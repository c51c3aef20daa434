//! Server error types.

use std::fmt;

use crate::storage::StorageError;

/// Errors that can occur while starting or running the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (unparseable offset, bad bind address, etc.).
    ///
    /// Fatal: fix configuration and restart.
    Config(String),

    /// Transport/network error (bind failure, accept loop I/O error).
    ///
    /// Fatal at startup; the listener cannot be recovered.
    Transport(String),

    /// Storage backend could not be opened or failed outside a request.
    Storage(StorageError),

    /// Internal error (worker thread could not be spawned, etc.).
    ///
    /// Should never happen in a healthy process.
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for ServerError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
