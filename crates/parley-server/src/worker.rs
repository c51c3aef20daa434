//! Delivery worker: runs a [`DeliveryCore`] on its own thread.
//!
//! Every producer (connection adapters, HTTP handlers) talks to the core
//! through a cloneable [`DeliveryHandle`] over one bounded, ordered queue.
//! Producers await queue capacity instead of spawning detached tasks, so a
//! slow core pushes back on its inputs. The worker stops once every handle
//! has been dropped and returns the core to whoever joins it.

use std::{io, thread};

use parley_proto::{MessageBroadcast, PresenceStatus, UserId};
use tokio::sync::{mpsc, oneshot};

use crate::{
    connection::{ConnectionId, ConnectionSink},
    delivery_error::DeliveryError,
    driver::{DeliveryCore, DeliveryEvent, PresenceEvent},
    env::Environment,
    storage::{NewMessage, Storage},
};

/// Name of the worker thread.
pub const WORKER_THREAD_NAME: &str = "delivery-core";

/// Producer side of the delivery queue.
pub struct DeliveryHandle<C> {
    tx: mpsc::Sender<DeliveryEvent<C>>,
}

// Derive would require `C: Clone`.
impl<C> Clone for DeliveryHandle<C> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<C: ConnectionSink> DeliveryHandle<C> {
    /// Move `core` onto a dedicated worker thread.
    ///
    /// Returns the producer handle and the worker's join handle. Joining
    /// yields the core back after every handle has been dropped.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn<E, S>(
        core: DeliveryCore<E, S, C>,
        queue_capacity: usize,
    ) -> io::Result<(Self, thread::JoinHandle<DeliveryCore<E, S, C>>)>
    where
        E: Environment,
        S: Storage,
    {
        let (tx, mut rx) = mpsc::channel(queue_capacity.max(1));

        let worker = thread::Builder::new().name(WORKER_THREAD_NAME.to_string()).spawn(move || {
            let mut core = core;
            tracing::info!(queue_capacity, "delivery worker started");

            while let Some(event) = rx.blocking_recv() {
                core.process_event(event);
            }

            tracing::info!("delivery worker stopped");
            core
        })?;

        Ok((Self { tx }, worker))
    }

    /// Register a live connection for `user_id`.
    pub async fn register(&self, user_id: UserId, connection: C) -> Result<(), DeliveryError> {
        self.send(DeliveryEvent::Register { user_id, connection }).await
    }

    /// Submit a message without waiting for the outcome.
    pub async fn submit(&self, message: NewMessage) -> Result<(), DeliveryError> {
        self.send(DeliveryEvent::Message { message, reply: None }).await
    }

    /// Submit a message and wait until it has been persisted and fanned out.
    ///
    /// # Errors
    ///
    /// Whatever [`DeliveryCore::handle_message`] failed with, or
    /// `DeliveryError::WorkerStopped` if the worker is gone.
    pub async fn submit_and_wait(
        &self,
        message: NewMessage,
    ) -> Result<MessageBroadcast, DeliveryError> {
        let (reply, outcome) = oneshot::channel();
        self.send(DeliveryEvent::Message { message, reply: Some(reply) }).await?;

        outcome.await.map_err(|_| DeliveryError::WorkerStopped)?
    }

    /// Enqueue a presence change.
    pub async fn presence(
        &self,
        user_id: UserId,
        status: PresenceStatus,
    ) -> Result<(), DeliveryError> {
        self.send(DeliveryEvent::Presence(PresenceEvent { user_id, status })).await
    }

    /// Report that `connection_id` terminated.
    pub async fn unregister(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<(), DeliveryError> {
        self.send(DeliveryEvent::Unregister { user_id, connection_id }).await
    }

    async fn send(&self, event: DeliveryEvent<C>) -> Result<(), DeliveryError> {
        self.tx.send(event).await.map_err(|_| DeliveryError::WorkerStopped)
    }
}
