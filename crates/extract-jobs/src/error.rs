//! Error types for the extraction job engine

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Engine errors
#[derive(Debug, Error)]
pub enum Error {
    /// Bad, oversized or wrong-type input, rejected before a job exists
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or invalid caller identity
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Admission gate denial
    #[error("Rate limit exceeded for window '{window}', retry after {retry_after_secs}s")]
    RateLimitExceeded {
        window: String,
        retry_after_secs: u64,
    },

    /// Unknown job id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not valid for the job's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Extractor failure
    #[error("Upstream error: {message}")]
    Upstream { message: String, retryable: bool },

    /// Job was cancelled; a normal outcome, not a failure
    #[error("Job cancelled: {0}")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Create a retryable upstream error (timeouts, throttling)
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a terminal upstream error (malformed input, rejected request)
    pub fn terminal(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            retryable: false,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the runner may retry the failed call
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Upstream { retryable: true, .. })
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            Error::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone()),
            Error::RateLimitExceeded {
                window,
                retry_after_secs,
            } => {
                let body = Json(json!({
                    "allowed": false,
                    "error": {
                        "type": "rate_limit_exceeded",
                        "message": self.to_string(),
                    },
                    "reason": "rate_limit_exceeded",
                    "window": window,
                    "retry_after_secs": retry_after_secs,
                }));
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                return response;
            }
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            Error::InvalidState(msg) => (StatusCode::CONFLICT, "invalid_state", msg.clone()),
            Error::Upstream { message, retryable } => {
                if *retryable {
                    (StatusCode::SERVICE_UNAVAILABLE, "upstream_error", message.clone())
                } else {
                    (StatusCode::BAD_GATEWAY, "upstream_error", message.clone())
                }
            }
            Error::Cancelled(msg) => (StatusCode::CONFLICT, "cancelled", msg.clone()),
            Error::Config(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg.clone())
            }
            Error::Io(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "io_error",
                err.to_string(),
            ),
            Error::Json(err) => (StatusCode::BAD_REQUEST, "json_error", err.to_string()),
            Error::Http(err) => (StatusCode::BAD_GATEWAY, "http_error", err.to_string()),
            Error::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone())
            }
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
