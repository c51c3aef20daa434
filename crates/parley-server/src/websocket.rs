//! WebSocket connection adapter.
//!
//! One reader task and one writer task per live connection. The reader
//! decodes client frames and submits them to the delivery worker; the writer
//! drains the connection's [`OutboundQueue`](crate::OutboundQueue). Whichever
//! task finishes first tears the connection down and the adapter unregisters
//! itself.

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parley_proto::{ClientMessage, ProtocolError, ServerFrame, UserId};
use serde::Deserialize;

use crate::{
    api::{ApiResult, AppState, parse_id},
    connection::ChannelConnection,
    env::Environment,
    storage::{NewMessage, Storage},
};

#[derive(Debug, Deserialize)]
pub(crate) struct ConnectQuery {
    user_id: Option<String>,
}

/// `GET /ws?user_id=`
pub(crate) async fn upgrade<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let user_id = parse_id(query.user_id.as_deref(), "user_id")?;

    Ok(ws.on_upgrade(move |socket| serve(socket, user_id, state)))
}

/// Turn one inbound frame from `user_id`'s connection into a message for the
/// delivery core.
///
/// # Errors
///
/// - `ProtocolError::FrameTooLarge` / `ProtocolError::JsonDecode` for a
///   malformed frame
/// - `ProtocolError::Violation` if the frame claims another sender
pub fn inbound_message(
    frame: &[u8],
    user_id: UserId,
    received_at: DateTime<Utc>,
) -> Result<NewMessage, ProtocolError> {
    let message = ClientMessage::decode(frame)?;
    let sender_id = message.sender_for(user_id)?;

    Ok(NewMessage {
        conversation_id: message.conversation_id,
        sender_id,
        content: message.content,
        message_type: message.message_type,
        received_at,
    })
}

async fn serve<S: Storage, E: Environment>(socket: WebSocket, user_id: UserId, state: AppState<S, E>) {
    let (mut sink, mut stream) = socket.split();

    let ack = match ServerFrame::connected().encode() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(user_id, error = %e, "failed to encode acknowledgment");
            return;
        },
    };
    if let Err(e) = sink.send(Message::Text(ack.into())).await {
        tracing::debug!(user_id, error = %e, "client went away before acknowledgment");
        return;
    }

    let connection_id = state.env.random_u64();
    let (connection, mut outbound) = ChannelConnection::new(connection_id, state.outbound_capacity);

    if state.delivery.register(user_id, connection).await.is_err() {
        tracing::warn!(user_id, connection_id, "delivery worker stopped, refusing connection");
        return;
    }
    tracing::info!(user_id, connection_id, "connection established");

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound.next().await {
            if let Err(e) = sink.send(Message::Text(frame.as_ref().into())).await {
                tracing::debug!(user_id, connection_id, error = %e, "write failed");
                return;
            }
        }
        // Closed by the core or superseded; the peer may already be gone.
        let _ = sink.send(Message::Close(None)).await;
    });

    let delivery = state.delivery.clone();
    let env = state.env.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(received) = stream.next().await {
            let decoded = match received {
                Ok(Message::Text(text)) => inbound_message(text.as_str().as_bytes(), user_id, env.now()),
                Ok(Message::Binary(data)) => inbound_message(&data, user_id, env.now()),
                Ok(Message::Close(_)) => {
                    tracing::debug!(user_id, connection_id, "client closed connection");
                    break;
                },
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                Err(e) => {
                    tracing::debug!(user_id, connection_id, error = %e, "read failed");
                    break;
                },
            };

            let message = match decoded {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(user_id, connection_id, error = %e, "malformed frame, dropping connection");
                    break;
                },
            };

            if delivery.submit(message).await.is_err() {
                tracing::warn!(user_id, connection_id, "delivery worker stopped");
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    if state.delivery.unregister(user_id, connection_id).await.is_err() {
        tracing::debug!(user_id, connection_id, "delivery worker already stopped");
    }
    tracing::info!(user_id, connection_id, "connection closed");
}
