//! Connection registry: user id to live connection.
//!
//! Owned by the delivery core, so every operation on it is serialized through
//! the delivery worker. At most one connection is registered per user; a new
//! connection for the same user supersedes the old one, which is closed.

use std::collections::HashMap;

use parley_proto::UserId;

use crate::connection::{ConnectionId, ConnectionSink};

/// Registry of live connections keyed by user id.
#[derive(Debug)]
pub struct ConnectionRegistry<C> {
    /// User ID → live connection. Enforces one connection per user
    connections: HashMap<UserId, C>,
}

impl<C> Default for ConnectionRegistry<C> {
    fn default() -> Self {
        Self { connections: HashMap::new() }
    }
}

impl<C: ConnectionSink> ConnectionRegistry<C> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection` for `user_id`.
    ///
    /// Returns the superseded connection, already closed, if the user had
    /// one.
    pub fn add(&mut self, user_id: UserId, connection: C) -> Option<C> {
        let previous = self.connections.insert(user_id, connection);
        if let Some(old) = &previous {
            old.close();
        }
        previous
    }

    /// Deregister and close the user's connection.
    ///
    /// Returns `false` (and does nothing) if the user had none.
    pub fn remove(&mut self, user_id: UserId) -> bool {
        match self.connections.remove(&user_id) {
            Some(connection) => {
                connection.close();
                true
            },
            None => false,
        }
    }

    /// Deregister the user's connection only if it is `connection_id`.
    ///
    /// A connection that was superseded by a newer one cannot evict it.
    pub fn remove_connection(&mut self, user_id: UserId, connection_id: ConnectionId) -> bool {
        if self.connections.get(&user_id).is_some_and(|c| c.id() == connection_id) {
            self.remove(user_id)
        } else {
            false
        }
    }

    /// Live connection for `user_id`. `None` if the user has none.
    pub fn lookup(&self, user_id: UserId) -> Option<&C> {
        self.connections.get(&user_id)
    }

    /// Users with a live connection, in no particular order.
    pub fn user_ids(&self) -> impl Iterator<Item = UserId> + '_ {
        self.connections.keys().copied()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
