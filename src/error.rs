//! Error types for the reminder service
//!
//! Errors are classified by recoverability:
//! - Retryable: network issues, provider rate limits
//! - NonRetryable: configuration errors, bad uploads, database failures

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::db::DbError;
use crate::ingest::IngestError;

/// Service-level error type
#[derive(Debug, Error)]
pub enum ReminderError {
    // Retryable errors
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Mail provider rate limit exceeded")]
    RateLimited,

    // Non-retryable errors
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DbError),

    #[error("Upload rejected: {0}")]
    IngestError(#[from] IngestError),

    #[error("Delivery failed: {0}")]
    DeliveryError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Reminder executor is not running")]
    ExecutorUnavailable,
}

impl ReminderError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReminderError::NetworkError(_) | ReminderError::RateLimited
        )
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            ReminderError::NetworkError(_) => {
                "Check connectivity to the mail provider and try again."
            }
            ReminderError::RateLimited => "Wait a few minutes and trigger the reminder pass again.",
            ReminderError::ConfigurationError(_) => {
                "Check your configuration in ~/.dealreminder/config.json"
            }
            ReminderError::DatabaseError(_) => "Check the database path and disk space.",
            ReminderError::IngestError(_) => {
                "Export the deals again as CSV with a header row and retry the upload."
            }
            ReminderError::DeliveryError(_) => "Check the SendGrid API key and sender address.",
            ReminderError::InvalidRequest(_) => "Check the request and try again.",
            ReminderError::IoError(_) => "Check file permissions and disk space.",
            ReminderError::ExecutorUnavailable => "Restart the service.",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ReminderError::IngestError(_) | ReminderError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ReminderError::ExecutorUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ReminderError::NetworkError(_)
            | ReminderError::RateLimited
            | ReminderError::DeliveryError(_) => StatusCode::BAD_GATEWAY,
            ReminderError::ConfigurationError(_)
            | ReminderError::DatabaseError(_)
            | ReminderError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for ReminderError {
    fn from(err: std::io::Error) -> Self {
        ReminderError::IoError(err.to_string())
    }
}

/// JSON body returned by HTTP handlers on failure
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

impl From<&ReminderError> for ErrorBody {
    fn from(err: &ReminderError) -> Self {
        ErrorBody {
            error: err.to_string(),
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}

impl IntoResponse for ReminderError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code.is_server_error() {
            log::error!("Request failed: {}", self);
        }
        (code, Json(ErrorBody::from(&self))).into_response()
    }
}
