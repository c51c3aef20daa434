//! HTTP error mapping.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{delivery_error::DeliveryError, storage::StorageError};

/// Result alias for HTTP handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors returned by HTTP handlers, rendered as `{"error": "<message>"}`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Malformed or invalid request
    #[error("{0}")]
    BadRequest(String),

    /// Unknown credentials
    #[error("{0}")]
    Unauthorized(String),

    /// Caller may not act on the resource
    #[error("{0}")]
    Forbidden(String),

    /// Resource does not exist
    #[error("{0}")]
    NotFound(String),

    /// Uniqueness violated
    #[error("{0}")]
    Conflict(String),

    /// The delivery worker is gone
    #[error("{0}")]
    Unavailable(String),

    /// Storage backend failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Unexpected failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(msg) => Self::Conflict(msg),
            StorageError::NotFound { .. } => Self::NotFound(err.to_string()),
            StorageError::Serialization(_) | StorageError::Io(_) => Self::Storage(err.to_string()),
        }
    }
}

impl From<DeliveryError> for ApiError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::ConversationNotFound(_) => Self::NotFound(err.to_string()),
            DeliveryError::NotParticipant { .. } => Self::Forbidden(err.to_string()),
            DeliveryError::Storage(inner) => Self::Storage(inner.to_string()),
            DeliveryError::Protocol(inner) => Self::Internal(inner.to_string()),
            DeliveryError::WorkerStopped => Self::Unavailable(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(error = %rejection, "unparseable request body");
        Self::BadRequest("invalid JSON body".to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_statuses() {
        assert_eq!(
            ApiError::from(StorageError::Conflict("username already exists".into())),
            ApiError::Conflict("username already exists".into())
        );
        assert_eq!(
            ApiError::from(StorageError::user(4)).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(StorageError::Io("disk".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn delivery_errors_map_to_statuses() {
        let cases = [
            (DeliveryError::ConversationNotFound(1), StatusCode::NOT_FOUND),
            (
                DeliveryError::NotParticipant { conversation_id: 1, sender_id: 2 },
                StatusCode::FORBIDDEN,
            ),
            (DeliveryError::Storage(StorageError::Io("x".into())), StatusCode::INTERNAL_SERVER_ERROR),
            (DeliveryError::WorkerStopped, StatusCode::SERVICE_UNAVAILABLE),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err.clone()).status_code(), expected, "{err}");
        }
    }
}
