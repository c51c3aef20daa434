//! Account endpoints: register, login, logout, list.

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use parley_proto::{PresenceStatus, UserId};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiError, ApiResult, AppState, blocking, parse_id};
use crate::{env::Environment, storage::Storage};

/// Shortest accepted username, after trimming.
pub const MIN_USERNAME_LEN: usize = 3;

/// Shortest accepted password.
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Deserialize)]
pub(crate) struct CredentialsRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LogoutRequest {
    #[serde(default)]
    user_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserIdQuery {
    user_id: Option<String>,
}

pub(crate) async fn register<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(request) = payload?;
    let username = request.username.trim().to_string();

    if username.chars().count() < MIN_USERNAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "username must be at least {MIN_USERNAME_LEN} characters"
        )));
    }
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let cost = state.password_cost;
    let password_hash = tokio::task::spawn_blocking(move || bcrypt::hash(request.password, cost))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| {
            tracing::error!(error = %e, "password hashing failed");
            ApiError::Internal("failed to hash password".to_string())
        })?;

    let now = state.env.now();
    let user =
        blocking(&state.storage, move |s| s.create_user(&username, &password_hash, now)).await?;

    tracing::info!(user_id = user.id, username = %user.username, "user registered");
    Ok((StatusCode::CREATED, Json(json!({ "user": user }))))
}

pub(crate) async fn login<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(request) = payload?;
    let username = request.username.trim().to_string();

    if username.is_empty() || request.password.is_empty() {
        return Err(ApiError::BadRequest("username and password required".to_string()));
    }

    let found = blocking(&state.storage, move |s| {
        let Some(user) = s.find_user_by_name(&username)? else {
            return Ok(None);
        };
        let hash = s.load_password_hash(user.id)?;
        Ok(hash.map(|hash| (user, hash)))
    })
    .await?;

    let invalid = || ApiError::Unauthorized("invalid credentials".to_string());
    let Some((mut user, password_hash)) = found else {
        return Err(invalid());
    };

    let user_id = user.id;
    let verified =
        tokio::task::spawn_blocking(move || bcrypt::verify(request.password, &password_hash))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
    match verified {
        Ok(true) => {},
        Ok(false) => {
            tracing::debug!(user_id, "login rejected: wrong password");
            return Err(invalid());
        },
        Err(e) => {
            tracing::warn!(user_id, error = %e, "login rejected: unreadable password hash");
            return Err(invalid());
        },
    }

    state.delivery.presence(user.id, PresenceStatus::Online).await?;

    user.status = PresenceStatus::Online;
    user.last_seen = Some(state.env.now());

    tracing::info!(user_id = user.id, "user logged in");
    Ok(Json(json!({ "user": user })))
}

/// Logout takes the user id from a JSON body, falling back to `?user_id=`.
pub(crate) async fn logout<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Query(query): Query<UserIdQuery>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let request: LogoutRequest = if body.iter().all(u8::is_ascii_whitespace) {
        LogoutRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|_| ApiError::BadRequest("invalid JSON body".to_string()))?
    };

    let user_id = match request.user_id.filter(|&id| id != 0) {
        Some(id) => id,
        None => parse_id(query.user_id.as_deref(), "user_id").map_err(|_| {
            ApiError::BadRequest(
                "user_id is required in the JSON body or query parameter for logout".to_string(),
            )
        })?,
    };

    state.delivery.presence(user_id, PresenceStatus::Offline).await?;

    tracing::info!(user_id, "user logged out");
    Ok(Json(json!({ "message": "logged out successfully, status set to offline" })))
}

pub(crate) async fn list<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
) -> ApiResult<Json<Value>> {
    let users = blocking(&state.storage, |s| s.list_users()).await?;

    Ok(Json(json!({ "users": users })))
}
