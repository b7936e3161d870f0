//! # Error Handling
//!
//! Custom error types for the HTTP surface and how they convert to JSON
//! error responses. Relay-session faults deliberately do NOT flow through
//! here: the client-facing contract for upstream failures is an opaque
//! `error` event on the channel, with no diagnostic detail.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Application error types surfaced over HTTP.
///
/// ## Error Categories:
/// - **Internal**: server-side problems (500)
/// - **BadRequest**: client sent invalid data (400)
/// - **CapacityExceeded**: relay session limit reached (503)
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// No relay session slot available for a new client channel
    CapacityExceeded(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::CapacityExceeded(msg) => write!(f, "Capacity exceeded: {}", msg),
        }
    }
}

/// Converts errors into consistent JSON error responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "capacity_exceeded",
///     "message": "Maximum concurrent relay sessions (16) reached",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::CapacityExceeded(msg) => (
                actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
                "capacity_exceeded",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let err = AppError::CapacityExceeded("full".to_string());
        assert_eq!(err.to_string(), "Capacity exceeded: full");
    }

    #[test]
    fn test_capacity_maps_to_503() {
        let err = AppError::CapacityExceeded("full".to_string());
        assert_eq!(err.error_response().status().as_u16(), 503);
    }

    #[test]
    fn test_bad_request_maps_to_400() {
        let err = AppError::BadRequest("nope".to_string());
        assert_eq!(err.error_response().status().as_u16(), 400);
    }
}
