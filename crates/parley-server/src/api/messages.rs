//! Message endpoints.
//!
//! Sending goes through the delivery worker, so an HTTP-sent message gets
//! the same persistence, status rows and live fan-out as one sent over a
//! WebSocket.

use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use parley_proto::{ConversationId, MessageType, UserId};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiResult, AppState, blocking, parse_id};
use crate::{
    env::Environment,
    storage::{NewMessage, Storage, StorageError},
};

#[derive(Debug, Deserialize)]
pub(crate) struct SendRequest {
    conversation_id: ConversationId,
    sender_id: UserId,
    content: String,
    #[serde(default)]
    message_type: MessageType,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListQuery {
    conversation_id: Option<String>,
}

pub(crate) async fn send<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(request) = payload?;

    let message = NewMessage {
        conversation_id: request.conversation_id,
        sender_id: request.sender_id,
        content: request.content,
        message_type: request.message_type,
        received_at: state.env.now(),
    };

    let broadcast = state.delivery.submit_and_wait(message).await?;

    Ok((StatusCode::CREATED, Json(json!({ "message": broadcast }))))
}

pub(crate) async fn list<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let conversation_id = parse_id(query.conversation_id.as_deref(), "conversation_id")?;

    let messages = blocking(&state.storage, move |s| {
        if s.load_conversation(conversation_id)?.is_none() {
            return Err(StorageError::conversation(conversation_id));
        }
        s.load_messages(conversation_id)
    })
    .await?;

    Ok(Json(json!({ "messages": messages })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_request_defaults_to_text() {
        let request: SendRequest =
            serde_json::from_str(r#"{"conversation_id": 1, "sender_id": 2, "content": "hi"}"#)
                .unwrap();

        assert_eq!(request.message_type, MessageType::Text);
    }

    #[test]
    fn send_request_rejects_unknown_message_type() {
        let result = serde_json::from_str::<SendRequest>(
            r#"{"conversation_id": 1, "sender_id": 2, "content": "hi", "message_type": "gif"}"#,
        );

        assert!(result.is_err());
    }
}
