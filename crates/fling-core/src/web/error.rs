//! HTTP error handling for the relay API.
//!
//! Converts core errors into JSON bodies with stable machine-readable
//! codes, so clients branch on `code` instead of parsing messages.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::Error;

/// API error response body.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    /// Stable error code, one of [`Error::code`]'s values.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ApiError {
    /// Create an error with an explicit code.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The HTTP status carrying this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self.code.as_str() {
            "INVALID_ROOM" => StatusCode::BAD_REQUEST,
            "ROOM_NOT_FOUND" => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
