use crate::{
    models::settings::SettingsError,
    services::{id_allocator::IdError, storage_service::StorageError},
    size_guard::SizeLimitExceeded,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

const INTERNAL_MESSAGE: &str = "internal storage error";

/// A lightweight wrapper for general errors that keeps the message local.
///
/// Renders as `{"message": "..."}`. A `413` is additionally tagged with
/// `SizeLimitExceeded` so the Size Guard can turn it into an abort.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 422 Unprocessable Entity
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, msg)
    }

    /// Shortcut for 413 Payload Too Large
    pub fn too_large(limit: u64) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("request body exceeds the {} byte limit", limit),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "message": self.message }));

        let mut response = (self.status, body).into_response();
        if self.status == StatusCode::PAYLOAD_TOO_LARGE {
            response.extensions_mut().insert(SizeLimitExceeded);
        }
        response
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => AppError::not_found(err.to_string()),
            StorageError::KindConflict { .. } | StorageError::IdTaken(_) => {
                AppError::new(StatusCode::CONFLICT, err.to_string())
            }
            StorageError::TooLarge(limit) => AppError::too_large(limit),
            StorageError::CollisionExhausted(_) => {
                tracing::error!("identifier allocation failed: {}", err);
                AppError::internal("could not allocate an identifier, try again later")
            }
            StorageError::MissingPayload(_) | StorageError::Sqlx(_) | StorageError::Io(_) => {
                tracing::error!("storage fault: {}", err);
                AppError::internal(INTERNAL_MESSAGE)
            }
        }
    }
}

impl From<IdError> for AppError {
    fn from(err: IdError) -> Self {
        AppError::validation(err.to_string())
    }
}

impl From<SettingsError> for AppError {
    fn from(err: SettingsError) -> Self {
        AppError::new(StatusCode::BAD_REQUEST, err.to_string())
    }
}
