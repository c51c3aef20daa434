//! HTTP API.
//!
//! Account, conversation and message endpoints plus the WebSocket upgrade.
//! Reads go straight to storage on the blocking pool; anything that changes
//! presence or sends a message goes through the delivery worker so it is
//! ordered with live traffic.

mod conversations;
mod error;
mod messages;
mod users;

use axum::{
    Router,
    routing::{get, post},
};
pub use error::{ApiError, ApiResult};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    connection::ChannelConnection,
    env::Environment,
    storage::{Storage, StorageError},
    websocket,
    worker::DeliveryHandle,
};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState<S, E> {
    /// Storage backend (reads)
    pub storage: S,
    /// Environment (time, connection ids)
    pub env: E,
    /// Delivery worker queue
    pub delivery: DeliveryHandle<ChannelConnection>,
    /// Per-connection outbound queue bound
    pub outbound_capacity: usize,
    /// bcrypt cost for newly registered passwords
    pub password_cost: u32,
}

/// Build the HTTP router.
pub fn router<S, E>(state: AppState<S, E>) -> Router
where
    S: Storage,
    E: Environment,
{
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket::upgrade::<S, E>))
        .route("/api/register", post(users::register::<S, E>))
        .route("/api/login", post(users::login::<S, E>))
        .route("/api/logout", post(users::logout::<S, E>))
        .route("/api/users", get(users::list::<S, E>))
        .route(
            "/api/conversations",
            post(conversations::create::<S, E>).get(conversations::list::<S, E>),
        )
        .route("/api/messages", post(messages::send::<S, E>).get(messages::list::<S, E>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Run a storage call on the blocking pool.
async fn blocking<S, T, F>(storage: &S, f: F) -> ApiResult<T>
where
    S: Storage,
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T, StorageError> + Send + 'static,
{
    let storage = storage.clone();

    tokio::task::spawn_blocking(move || f(&storage))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

/// Parse a required positive id from a query parameter.
///
/// Missing, empty and zero values are reported as missing.
pub(crate) fn parse_id(raw: Option<&str>, field: &str) -> ApiResult<u64> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty());
    let Some(raw) = raw else {
        return Err(ApiError::BadRequest(format!("{field} required")));
    };

    match raw.parse::<u64>() {
        Ok(0) => Err(ApiError::BadRequest(format!("{field} required"))),
        Ok(id) => Ok(id),
        Err(_) => Err(ApiError::BadRequest(format!("invalid {field}"))),
    }
}
