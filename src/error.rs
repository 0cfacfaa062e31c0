use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::upstream::UpstreamError;

/// JSON body returned for every failure.
#[derive(Debug, Serialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Failures as seen at the handler boundary.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("invalid JSON body")]
    InvalidBody(String),
    #[error("request body too large")]
    BodyTooLarge,
    #[error("language model is not configured")]
    Configuration(#[source] UpstreamError),
    #[error("failed to generate SQL")]
    Generation(#[source] UpstreamError),
    #[error("language model returned no SQL")]
    GenerationEmpty,
    #[error("failed to create question")]
    CreationFailed(#[source] UpstreamError),
    #[error("failed to fetch question results")]
    ExecutionFailed(#[source] UpstreamError),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            ApiError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Configuration(_)
            | ApiError::Generation(_)
            | ApiError::GenerationEmpty
            | ApiError::CreationFailed(_)
            | ApiError::ExecutionFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn upstream_error(&self) -> Option<&UpstreamError> {
        match self {
            ApiError::Configuration(e)
            | ApiError::Generation(e)
            | ApiError::CreationFailed(e)
            | ApiError::ExecutionFailed(e) => Some(e),
            _ => None,
        }
    }

    pub fn body(&self) -> ErrorResponse {
        let details = match self {
            ApiError::InvalidBody(detail) => Some(serde_json::Value::String(detail.clone())),
            other => other.upstream_error().map(UpstreamError::details),
        };
        ErrorResponse {
            error: self.to_string(),
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
