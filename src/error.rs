//! Error types for the extraction pipeline, platform operations and the
//! HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failure taxonomy of the extraction pipeline.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Store or LLM call failed, or returned a non-success status.
    #[error("network error: {0}")]
    Network(String),

    /// Reply or file did not have the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// The strategy ran cleanly but found no questions.
    #[error("no questions found in document")]
    Empty,

    /// Missing credential or malformed input.
    #[error("validation error: {0}")]
    Validation(String),
}

/// Failure of a platform operation.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    /// Primary store call failed.
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// Error returned from HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ExtractError> for ApiError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Validation(msg) => ApiError::BadRequest(msg),
            ExtractError::Empty | ExtractError::Parse(_) => ApiError::Unprocessable(err.to_string()),
            ExtractError::Network(msg) => ApiError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl From<PlatformError> for ApiError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::NotFound(_) => ApiError::NotFound(err.to_string()),
            PlatformError::Conflict(msg) => ApiError::Conflict(msg),
            PlatformError::Invalid(_) => ApiError::BadRequest(err.to_string()),
            PlatformError::Store(e) => ApiError::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
