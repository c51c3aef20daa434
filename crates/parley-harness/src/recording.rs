//! In-memory connection that records every frame pushed to it.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::sync::{Arc, Mutex, MutexGuard};

use parley_proto::{MessageBroadcast, ServerFrame, StatusUpdate};
use parley_server::{ConnectionId, ConnectionSink, TransportError};

#[derive(Debug, Default)]
struct RecordingState {
    frames: Vec<String>,
    closed: bool,
    fail_sends: bool,
}

/// [`ConnectionSink`] that stores frames instead of writing them.
///
/// Clones share state, so a test can keep one clone while the delivery core
/// owns another. [`RecordingConnection::fail_sends`] makes every later push
/// fail, standing in for a peer that vanished.
#[derive(Debug, Clone)]
pub struct RecordingConnection {
    id: ConnectionId,
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingConnection {
    /// Create an open connection.
    pub fn new(id: ConnectionId) -> Self {
        Self { id, state: Arc::new(Mutex::new(RecordingState::default())) }
    }

    #[allow(clippy::expect_used)]
    fn state(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock().expect("Mutex poisoned")
    }

    /// Raw frames, in push order.
    pub fn frames(&self) -> Vec<String> {
        self.state().frames.clone()
    }

    /// Frames decoded as [`ServerFrame`]s. Undecodable frames are skipped.
    pub fn decoded(&self) -> Vec<ServerFrame> {
        self.state().frames.iter().filter_map(|f| ServerFrame::decode(f).ok()).collect()
    }

    /// Message broadcasts received.
    pub fn broadcasts(&self) -> Vec<MessageBroadcast> {
        self.decoded()
            .into_iter()
            .filter_map(|frame| match frame {
                ServerFrame::Message(broadcast) => Some(broadcast),
                ServerFrame::Status(_) | ServerFrame::Connected(_) => None,
            })
            .collect()
    }

    /// Presence updates received.
    pub fn status_updates(&self) -> Vec<StatusUpdate> {
        self.decoded()
            .into_iter()
            .filter_map(|frame| match frame {
                ServerFrame::Status(update) => Some(update),
                ServerFrame::Message(_) | ServerFrame::Connected(_) => None,
            })
            .collect()
    }

    /// Whether the core closed this connection.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Make every later push fail.
    pub fn fail_sends(&self) {
        self.state().fail_sends = true;
    }
}

impl ConnectionSink for RecordingConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, frame: Arc<str>) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.closed || state.fail_sends {
            tracing::trace!(connection_id = self.id, "rejecting push to dead connection");
            return Err(TransportError::Closed(self.id));
        }
        state.frames.push(frame.to_string());
        Ok(())
    }

    fn close(&self) {
        self.state().closed = true;
    }
}
