use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::services::language_model::ModelError;

/// Closed error taxonomy shared by every conversation component.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Model service error: {0}")]
    ModelService(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl CoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Storage(_) => "StorageError",
            Self::ModelService(_) => "ModelServiceError",
            Self::NotFound(_) => "NotFoundError",
        }
    }

    /// Storage and model failures are worth one more attempt; the rest are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::ModelService(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => CoreError::NotFound("row not found".to_string()),
            other => CoreError::Storage(other.to_string()),
        }
    }
}

impl From<ModelError> for CoreError {
    fn from(err: ModelError) -> Self {
        CoreError::ModelService(err.to_string())
    }
}

impl From<validator::ValidationErrors> for CoreError {
    fn from(err: validator::ValidationErrors) -> Self {
        CoreError::Validation(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("LLM error: {0}")]
    LlmError(String),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => ApiError::BadRequest(msg),
            CoreError::NotFound(msg) => ApiError::NotFound(msg),
            CoreError::Storage(msg) => ApiError::DatabaseError(msg),
            CoreError::ModelService(msg) => ApiError::LlmError(msg),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Storage and model details stay in the logs; callers get a generic message.
        let (status, error_type, message) = match self {
            ApiError::NotFound(msg) => {
                tracing::warn!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, "NotFoundError", msg)
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, "ValidationError", msg)
            }
            ApiError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "StorageError",
                    "The conversation store is temporarily unavailable".to_string(),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalError",
                    "Something went wrong, please try again".to_string(),
                )
            }
            ApiError::LlmError(msg) => {
                tracing::error!("LLM error: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "ModelServiceError",
                    "The answer service is temporarily unavailable".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_kinds() {
        assert_eq!(CoreError::Validation("x".into()).kind(), "ValidationError");
        assert_eq!(CoreError::Storage("x".into()).kind(), "StorageError");
        assert_eq!(CoreError::ModelService("x".into()).kind(), "ModelServiceError");
        assert_eq!(CoreError::NotFound("x".into()).kind(), "NotFoundError");
    }

    #[test]
    fn test_retryable() {
        assert!(CoreError::Storage("down".into()).is_retryable());
        assert!(CoreError::ModelService("timeout".into()).is_retryable());
        assert!(!CoreError::Validation("empty".into()).is_retryable());
        assert!(!CoreError::NotFound("session".into()).is_retryable());
    }

    #[test]
    fn test_api_error_status_mapping() {
        let resp = ApiError::from(CoreError::Validation("too long".into())).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = ApiError::from(CoreError::NotFound("session".into())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = ApiError::from(CoreError::Storage("pool".into())).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let resp = ApiError::from(CoreError::ModelService("503".into())).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
