//! Unified error handling for the CTI bridge
//!
//! One error type covers transport, handshake, command, decoding and
//! persistence failures. It implements `ResponseError` so the HTTP layer can
//! map switch failures to service-unavailable responses.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Transport Errors ====================
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not connected to the switch")]
    NotConnected,

    #[error("Gave up after {attempts} connection attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    // ==================== Protocol Errors ====================
    #[error("Command rejected by switch: {raw_response}")]
    Command { raw_response: String },

    #[error("Malformed frame: {0}")]
    Decode(String),

    // ==================== Storage Errors ====================
    #[error("Persistence error: {0}")]
    Persistence(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::NotFound(_) => StatusCode::NOT_FOUND,

            // 502 Bad Gateway
            AppError::Command { .. } | AppError::Decode(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::Connection(_)
            | AppError::NotConnected
            | AppError::RetriesExhausted { .. }
            | AppError::Auth(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Connection(_) => "connection_error",
            AppError::Auth(_) => "auth_error",
            AppError::Timeout(_) => "timeout",
            AppError::NotConnected => "not_connected",
            AppError::RetriesExhausted { .. } => "retries_exhausted",
            AppError::Command { .. } => "command_error",
            AppError::Decode(_) => "decode_error",
            AppError::Persistence(_) => "persistence_error",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether a caller may retry the failed operation under a backoff policy.
    ///
    /// Handshake rejections are fatal; only transport failures and bounded
    /// waits are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Connection(_) | AppError::Timeout(_))
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Connection(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}
