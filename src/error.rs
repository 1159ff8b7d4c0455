//! # Error Handling
//!
//! Application-wide error types and their HTTP representation. The relay
//! deliberately keeps one flat error enum: per-session failures are degraded
//! to logged substitutes long before they could surface here (see the
//! pipeline and bridge modules), so `AppError` mostly covers bootstrap,
//! configuration and the small HTTP API.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Error categories used across the relay.
///
/// ## Mapping to behavior:
/// - `Config` / `Internal`: bootstrap or server-side faults (HTTP 500)
/// - `BadRequest`: malformed client input on the HTTP API (HTTP 400)
/// - `Engine`: the speech engine could not be started for a connection;
///   reported to the device as a failed WebSocket upgrade (HTTP 502)
/// - `Translation` / `Archival`: collaborator faults. These never terminate
///   a session; they exist so collaborator clients can return typed errors
///   that the pipeline converts into substitute payloads.
#[derive(Debug)]
pub enum AppError {
    /// Server-side problems that have no more specific category
    Internal(String),

    /// Client sent invalid or malformed data to the HTTP API
    BadRequest(String),

    /// Configuration file or environment variable problems
    Config(String),

    /// Speech-recognition engine could not be started or stopped cleanly
    Engine(String),

    /// Translation collaborator call failed
    Translation(String),

    /// Note-archival collaborator call failed
    Archival(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Engine(msg) => write!(f, "Speech engine error: {}", msg),
            AppError::Translation(msg) => write!(f, "Translation error: {}", msg),
            AppError::Archival(msg) => write!(f, "Note archival error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts errors into the JSON error body served by the HTTP API.
///
/// All errors share one response shape so callers can always read
/// `error.type` and `error.message`.
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
            AppError::Config(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::Engine(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "engine_error",
                msg.clone(),
            ),
            AppError::Translation(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "translation_error",
                msg.clone(),
            ),
            AppError::Archival(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "archival_error",
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

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Transport-level failures from the HTTP collaborators default to the
/// archival category; the translator client wraps its own errors explicitly.
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Archival(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_category_and_message() {
        let err = AppError::Engine("start refused".to_string());
        assert_eq!(err.to_string(), "Speech engine error: start refused");
    }

    #[test]
    fn collaborator_errors_map_to_bad_gateway() {
        let err = AppError::Translation("upstream 503".to_string());
        let resp = err.error_response();
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_GATEWAY);
    }
}
