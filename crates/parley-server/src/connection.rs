//! Live connection handles.
//!
//! The delivery core never touches sockets. It pushes encoded frames into a
//! [`ConnectionSink`]; the production sink is a bounded queue drained by the
//! connection's writer task. Pushes never block: a full queue is treated the
//! same as a closed one, and the core drops the connection.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Notify, mpsc};

/// Identifier of one live connection. Random per connection.
pub type ConnectionId = u64;

/// Failure to hand a frame to a live connection.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The writer side has gone away
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    /// The outbound queue is full; the peer is not keeping up
    #[error("outbound queue full for connection {0}")]
    Backpressure(ConnectionId),
}

/// Outbound half of a live connection, as seen by the delivery core.
pub trait ConnectionSink: Send + 'static {
    /// Id of this connection.
    fn id(&self) -> ConnectionId;

    /// Push one encoded frame without blocking.
    ///
    /// Any error means the connection is dead and must be removed.
    fn send(&self, frame: Arc<str>) -> Result<(), TransportError>;

    /// Ask the writer to send a close frame and stop. Idempotent.
    fn close(&self);
}

/// Production sink: a bounded queue feeding a WebSocket writer task.
#[derive(Debug)]
pub struct ChannelConnection {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<str>>,
    shutdown: Arc<Notify>,
}

/// Receiving half of a [`ChannelConnection`], owned by the writer task.
#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::Receiver<Arc<str>>,
    shutdown: Arc<Notify>,
}

impl ChannelConnection {
    /// Create a connection handle and the queue its writer drains.
    ///
    /// `capacity` bounds the number of frames waiting to be written.
    pub fn new(id: ConnectionId, capacity: usize) -> (Self, OutboundQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let shutdown = Arc::new(Notify::new());

        (Self { id, tx, shutdown: Arc::clone(&shutdown) }, OutboundQueue { rx, shutdown })
    }
}

impl ConnectionSink for ChannelConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, frame: Arc<str>) -> Result<(), TransportError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure(self.id),
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed(self.id),
        })
    }

    fn close(&self) {
        self.shutdown.notify_one();
    }
}

impl OutboundQueue {
    /// Next frame to write.
    ///
    /// Returns `None` once the connection was closed or every handle to it
    /// has been dropped; the writer should then send a close frame and stop.
    pub async fn next(&mut self) -> Option<Arc<str>> {
        tokio::select! {
            () = self.shutdown.notified() => None,
            frame = self.rx.recv() => frame,
        }
    }
}
