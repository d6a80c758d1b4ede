use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Errors raised by storage, configuration and the background jobs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to HTTP clients.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after_secs: u64 },
    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound => ApiError::NotFound("url not found".to_string()),
            Error::AlreadyExists => ApiError::Conflict("url already exists".to_string()),
            other => ApiError::InternalServerError(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            status: "Error",
            error: error.to_string(),
            message: message.to_string(),
        }
    }

    pub fn from_api_error(err: &ApiError) -> (StatusCode, Self) {
        match err {
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, Self::new("bad_request", msg)),
            ApiError::ValidationError(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Self::new("validation_error", msg))
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, Self::new("not_found", msg)),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, Self::new("conflict", msg)),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Self::new("unauthorized", "Valid credentials are required"),
            ),
            ApiError::RateLimitExceeded { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                Self::new("rate_limit_exceeded", "Service is busy, retry later"),
            ),
            // Storage details stay in the logs.
            ApiError::InternalServerError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Self::new("internal_error", "Internal server error"),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::InternalServerError(msg) = &self {
            tracing::error!(error = %msg, "request failed");
        }

        let (status, body) = ErrorResponse::from_api_error(&self);
        let mut response = (status, Json(body)).into_response();

        match self {
            ApiError::RateLimitExceeded { retry_after_secs } => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            }
            ApiError::Unauthorized => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Basic realm=\"url-shortener\""),
                );
            }
            _ => {}
        }

        response
    }
}
