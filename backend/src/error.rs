//! Standardized error handling for the Salesflow API
//!
//! Every saga, rule run and store call reports failures as an [`AppError`];
//! handlers turn them into the common [`ApiError`] JSON body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Standard API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code (e.g., "VALIDATION_ERROR", "NOT_FOUND", "UNAVAILABLE")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional field-level errors for validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Vec<String>>>,
    /// ISO 8601 timestamp
    pub timestamp: String,
    /// Whether the caller may retry the same request
    pub retryable: bool,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: HashMap<String, Vec<String>>) -> Self {
        self.details = Some(details);
        self
    }

    // Convenience constructors for common error types

    /// Create a 404 Not Found error
    pub fn not_found(message: impl Into<String>) -> AppError {
        AppError::NotFound(message.into())
    }

    /// Create a 500 Internal Server Error
    pub fn internal(message: impl Into<String>) -> AppError {
        AppError::InternalError(message.into())
    }

    /// Create a 400 Bad Request error
    pub fn bad_request(message: impl Into<String>) -> AppError {
        AppError::BadRequest(message.into())
    }

    /// Create a validation error with a single field error
    pub fn validation_single(field: impl Into<String>, message: impl Into<String>) -> AppError {
        let mut details = HashMap::new();
        details.insert(field.into(), vec![message.into()]);
        AppError::ValidationError { details }
    }
}

/// Application error type shared by the orchestrator, the rule engine and the store
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Resource errors
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),

    // Validation errors
    #[error("validation failed: {}", format_details(details))]
    ValidationError { details: HashMap<String, Vec<String>> },
    #[error("{0}")]
    BadRequest(String),
    #[error("unknown trigger type '{0}'")]
    UnknownTriggerType(String),

    // Store errors
    #[error("database error: {0}")]
    DatabaseError(String),
    #[error("operation timed out: {0}")]
    Unavailable(String),

    // Workflow errors
    #[error("ledger accounts missing: {}", missing.join(", "))]
    MissingLedgerAccounts { missing: Vec<String> },
    #[error("{saga} failed at step '{failed_step}' after {} committed step(s): {source}", completed_steps.len())]
    PartialSagaFailure {
        saga: String,
        correlation_id: Uuid,
        failed_step: String,
        completed_steps: Vec<String>,
        compensated: bool,
        source: Box<AppError>,
    },

    // Server errors
    #[error("external service '{service}' failed: {message}")]
    ExternalServiceError { service: String, message: String },
    #[error("internal error: {0}")]
    InternalError(String),
}

fn format_details(details: &HashMap<String, Vec<String>>) -> String {
    let mut fields: Vec<String> = details
        .iter()
        .map(|(field, errors)| format!("{}: {}", field, errors.join("; ")))
        .collect();
    fields.sort();
    fields.join(", ")
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ValidationError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadRequest(_) | Self::UnknownTriggerType(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ExternalServiceError { .. } => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_)
            | Self::MissingLedgerAccounts { .. }
            | Self::PartialSagaFailure { .. }
            | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::UnknownTriggerType(_) => "UNKNOWN_TRIGGER_TYPE",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::MissingLedgerAccounts { .. } => "MISSING_LEDGER_ACCOUNTS",
            Self::PartialSagaFailure { .. } => "PARTIAL_SAGA_FAILURE",
            Self::ExternalServiceError { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the client-facing error message
    pub fn message(&self) -> String {
        match self {
            Self::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            Self::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                "A database error occurred".to_string()
            }
            Self::ExternalServiceError { service, message } => {
                tracing::error!("External service error ({}): {}", service, message);
                format!("External service '{}' is unavailable", service)
            }
            other => other.to_string(),
        }
    }

    /// Timeouts are transient; the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::PartialSagaFailure { source, compensated, .. } => {
                *compensated && source.is_retryable()
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut error = ApiError::new(self.error_code(), self.message());
        error.retryable = self.is_retryable();

        match &self {
            Self::ValidationError { details } => {
                error.details = Some(details.clone());
            }
            Self::MissingLedgerAccounts { missing } => {
                let mut details = HashMap::new();
                details.insert("accounts".to_string(), missing.clone());
                error.details = Some(details);
            }
            Self::PartialSagaFailure {
                correlation_id,
                failed_step,
                completed_steps,
                compensated,
                ..
            } => {
                let mut details = HashMap::new();
                details.insert("correlation_id".to_string(), vec![correlation_id.to_string()]);
                details.insert("failed_step".to_string(), vec![failed_step.clone()]);
                details.insert("completed_steps".to_string(), completed_steps.clone());
                details.insert("compensated".to_string(), vec![compensated.to_string()]);
                error.details = Some(details);
            }
            _ => {}
        }

        (status, Json(error)).into_response()
    }
}

// Implement From for common error types
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("Resource".to_string()),
            sqlx::Error::PoolTimedOut => Self::Unavailable("database pool".to_string()),
            _ => Self::DatabaseError(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Unavailable(format!("http request: {}", err))
        } else {
            Self::ExternalServiceError {
                service: err
                    .url()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .unwrap_or_else(|| "http".to_string()),
                message: err.to_string(),
            }
        }
    }
}

/// Result type alias for handlers and services
pub type ApiResult<T> = Result<T, AppError>;

/// Helper to create validation errors
pub fn validation_error(field: &str, message: &str) -> AppError {
    let mut details = HashMap::new();
    details.insert(field.to_string(), vec![message.to_string()]);
    AppError::ValidationError { details }
}

/// Helper to add multiple validation errors
pub struct ValidationBuilder {
    details: HashMap<String, Vec<String>>,
}

impl ValidationBuilder {
    pub fn new() -> Self {
        Self {
            details: HashMap::new(),
        }
    }

    pub fn error(mut self, field: &str, message: &str) -> Self {
        self.details
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
        self
    }

    pub fn push(&mut self, field: &str, message: &str) {
        self.details
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }

    pub fn build(self) -> Option<AppError> {
        if self.details.is_empty() {
            None
        } else {
            Some(AppError::ValidationError {
                details: self.details,
            })
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.details.is_empty()
    }
}

impl Default for ValidationBuilder {
    fn default() -> Self {
        Self::new()
    }
}
