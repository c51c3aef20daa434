//! Conversation endpoints.

use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use parley_proto::UserId;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiError, ApiResult, AppState, blocking, parse_id};
use crate::{
    env::Environment,
    storage::{CreateConversation, NewConversation, Storage},
};

#[derive(Debug, Deserialize)]
pub(crate) struct CreateRequest {
    #[serde(default)]
    participant_ids: Vec<UserId>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    is_group: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListQuery {
    user_id: Option<String>,
}

pub(crate) async fn create<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    payload: Result<Json<CreateRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(request) = payload?;

    // Only groups carry a display name.
    let name = if request.is_group {
        request.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
    } else {
        None
    };

    let new = NewConversation {
        name,
        is_group: request.is_group,
        participant_ids: request.participant_ids,
        created_at: state.env.now(),
    };

    let participants = new.distinct_participants();
    if participants.len() < 2 {
        return Err(ApiError::BadRequest("at least 2 participants required".to_string()));
    }

    let missing = blocking(&state.storage, move |s| {
        for id in participants {
            if s.load_user(id)?.is_none() {
                return Ok(Some(id));
            }
        }
        Ok(None)
    })
    .await?;

    if let Some(id) = missing {
        return Err(ApiError::BadRequest(format!("user {id} not found")));
    }

    let outcome = blocking(&state.storage, move |s| s.create_conversation(&new)).await?;

    Ok(match outcome {
        CreateConversation::Existing(conversation) => {
            tracing::debug!(conversation_id = conversation.id, "direct conversation already exists");
            (
                StatusCode::OK,
                Json(json!({
                    "conversation": conversation,
                    "message": "Conversation already exists",
                })),
            )
        },
        CreateConversation::Created(conversation) => {
            tracing::info!(
                conversation_id = conversation.id,
                is_group = conversation.is_group,
                participants = conversation.participant_ids.len(),
                "conversation created"
            );
            (StatusCode::CREATED, Json(json!({ "conversation": conversation })))
        },
    })
}

pub(crate) async fn list<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let user_id = parse_id(query.user_id.as_deref(), "user_id")?;

    let conversations =
        blocking(&state.storage, move |s| s.list_conversations_for_user(user_id)).await?;

    Ok(Json(json!({ "conversations": conversations })))
}
