//! Parley messaging server.
//!
//! Production server using axum for HTTP and WebSocket transport, Tokio for
//! the async runtime, and system time with cryptographic RNG.
//!
//! # Architecture
//!
//! The [`DeliveryCore`] is plain synchronous logic: it owns the
//! [`ConnectionRegistry`], talks to [`Storage`] and pushes encoded frames into
//! [`ConnectionSink`]s. It never touches a socket. [`DeliveryHandle::spawn`]
//! moves it onto a dedicated thread fed by one bounded queue, which makes it
//! the single serialization point for registration, messages and presence.
//!
//! Around it, [`Server`] wires up:
//!
//! - one reader and one writer task per WebSocket connection, bridged to the
//!   core through a [`ChannelConnection`]
//! - the HTTP API ([`router`]), which reads storage directly and routes every
//!   presence change and message send through the core
//!
//! # Invariants
//!
//! - At most one live connection per user. A reconnect closes the previous
//!   connection.
//! - A message reaches a connection only after the message and all of its
//!   per-recipient status rows are stored.
//! - A connection whose push fails is gone from the registry before the next
//!   event is processed.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod config;
mod connection;
mod delivery_error;
mod driver;
mod env;
mod error;
mod registry;
pub mod storage;
mod system_env;
mod websocket;
mod worker;

use std::net::SocketAddr;

pub use api::{ApiError, ApiResult, AppState, router};
pub use config::{ServerRuntimeConfig, parse_utc_offset};
pub use connection::{
    ChannelConnection, ConnectionId, ConnectionSink, OutboundQueue, TransportError,
};
pub use delivery_error::DeliveryError;
pub use driver::{DeliveryConfig, DeliveryCore, DeliveryEvent, MessageReply, PresenceEvent};
pub use env::Environment;
pub use error::ServerError;
pub use registry::ConnectionRegistry;
pub use storage::{ChaoticStorage, MemoryStorage, RedbStorage, Storage, StorageError};
pub use system_env::SystemEnv;
use tokio::net::TcpListener;
pub use websocket::inbound_message;
pub use worker::{DeliveryHandle, WORKER_THREAD_NAME};

/// Production Parley server.
///
/// Owns the bound listener and the fully wired router. The delivery worker
/// runs until the router (and with it every [`DeliveryHandle`]) is dropped.
pub struct Server {
    /// Bound TCP listener
    listener: TcpListener,
    /// HTTP + WebSocket routes
    router: axum::Router,
}

impl Server {
    /// Start the delivery worker and bind the listener.
    ///
    /// # Errors
    ///
    /// - `ServerError::Internal` if the worker thread cannot be spawned
    /// - `ServerError::Transport` if the address cannot be bound
    pub async fn bind<S: Storage>(
        config: ServerRuntimeConfig,
        storage: S,
    ) -> Result<Self, ServerError> {
        Self::bind_with_env(config, storage, SystemEnv::new()).await
    }

    /// Like [`Server::bind`] with a caller-supplied environment.
    pub async fn bind_with_env<S: Storage, E: Environment>(
        config: ServerRuntimeConfig,
        storage: S,
        env: E,
    ) -> Result<Self, ServerError> {
        let core = DeliveryCore::new(env.clone(), storage.clone(), config.delivery);
        let (delivery, _worker) = DeliveryHandle::spawn(core, config.queue_capacity)
            .map_err(|e| ServerError::Internal(format!("failed to spawn delivery worker: {e}")))?;

        let listener = TcpListener::bind(&config.bind_address).await.map_err(|e| {
            ServerError::Transport(format!("failed to bind {}: {e}", config.bind_address))
        })?;

        let state = AppState {
            storage,
            env,
            delivery,
            outbound_capacity: config.outbound_capacity,
            password_cost: config.password_cost,
        };

        Ok(Self { listener, router: router(state) })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve HTTP and WebSocket traffic until the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.local_addr()?);

        axum::serve(self.listener, self.router).await?;

        Ok(())
    }
}
