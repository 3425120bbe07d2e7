//! Unified error handling for the daemon.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tidemark_engine::Error as EngineError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("State persistence error: {0}")]
    Persist(#[from] std::io::Error),

    /// The journal committed but the state file was not written.
    #[error("Change committed but state not saved: {0}")]
    Unsaved(#[source] std::io::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    /// HTTP status this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Engine(e) => engine_status(e),
            AppError::Persist(_) | AppError::Unsaved(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

fn engine_status(error: &EngineError) -> StatusCode {
    match error {
        EngineError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::AlreadyExists(_) | EngineError::InvalidState(_) => StatusCode::CONFLICT,
        EngineError::MissingParent { .. } | EngineError::MissingPrevious { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        EngineError::StorageInvariantViolated(_)
        | EngineError::InvalidSnapshot(_)
        | EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_message, details) = match &self {
            AppError::Engine(e) if status.is_server_error() => {
                tracing::error!("Engine failure: {:?}", e);
                ("Journal failure".to_string(), Some(e.to_string()))
            }
            AppError::Engine(e) => {
                tracing::warn!("Engine rejected request: {}", e);
                (e.to_string(), None)
            }
            AppError::Persist(e) => {
                tracing::error!("State persistence error: {:?}", e);
                (
                    "State could not be saved".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Unsaved(e) => {
                tracing::error!("Committed change not saved: {:?}", e);
                (
                    "Change committed but state could not be saved".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::BadRequest(msg) | AppError::NotFound(msg) => (msg.clone(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
