/// Error types for the proxy server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors surfaced by the proxy, each mapped to one HTTP status.
///
/// Messages for `Blocked` and `Engine` are deliberately generic; the real
/// cause only goes to the server log.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Malformed method, SQL, JSON or params.
    #[error("{0}")]
    BadRequest(String),

    /// Statement matched the blocklist.
    #[error("Query not allowed")]
    Blocked,

    /// Missing or wrong API key.
    #[error("Unauthorized")]
    Unauthorized,

    /// Origin header outside the LAN ranges.
    #[error("Origin not allowed")]
    OriginNotAllowed,

    /// Route does not exist.
    #[error("Not found")]
    NotFound,

    /// Request body over the size cap.
    #[error("Payload too large")]
    PayloadTooLarge,

    /// Per-IP request budget exhausted.
    #[error("Too many requests")]
    RateLimited,

    /// Statement failed in the engine.
    #[error("Database query failed")]
    Engine,

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error (bind, log file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) | ProxyError::Blocked => StatusCode::BAD_REQUEST,
            ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProxyError::OriginNotAllowed => StatusCode::FORBIDDEN,
            ProxyError::NotFound => StatusCode::NOT_FOUND,
            ProxyError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::Engine | ProxyError::Internal(_) | ProxyError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Never leak internals to the network
            ProxyError::Internal(_) | ProxyError::Io(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
