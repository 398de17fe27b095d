//! Error handling for Trainyard Core.
//!
//! This module provides:
//! - A single error type carrying a machine-readable code and chained source
//! - HTTP status code mapping for API responses
//! - User-facing messages kept apart from internal diagnostics
//! - Severity-aware logging and an error counter
//!
//! # Usage
//!
//! ```rust,ignore
//! use trainyard_core::error::{ErrorContext, ErrorCode, Result};
//!
//! fn load() -> Result<String> {
//!     std::fs::read_to_string("engine.toml").with_error_code(ErrorCode::MissingConfiguration)
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

use crate::jobs::{JobId, JobStatus};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Trainyard operations.
pub type Result<T> = std::result::Result<T, TrainyardError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Job Errors (1000-1099)
    JobNotFound,
    InvalidStateTransition,
    ResultNotReady,
    DeadlineExceeded,
    ExecutorNotRegistered,

    // Capacity Errors (1100-1199)
    ResourceExhausted,
    ShuttingDown,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,
    InvalidJson,

    // Validation Errors (4100-4199)
    ValidationError,
    InvalidInput,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::JobNotFound => 1000,
            Self::InvalidStateTransition => 1001,
            Self::ResultNotReady => 1002,
            Self::DeadlineExceeded => 1003,
            Self::ExecutorNotRegistered => 1004,

            Self::ResourceExhausted => 1100,
            Self::ShuttingDown => 1101,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,
            Self::InvalidJson => 2202,

            Self::ValidationError => 4100,
            Self::InvalidInput => 4101,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            Self::InternalError => 9000,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::JobNotFound => StatusCode::NOT_FOUND,

            // The job exists but is not in a state that allows the operation
            Self::InvalidStateTransition | Self::ResultNotReady => StatusCode::CONFLICT,

            Self::ValidationError | Self::InvalidInput => StatusCode::UNPROCESSABLE_ENTITY,

            Self::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,

            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,

            Self::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,

            Self::ExecutorNotRegistered
            | Self::SerializationError
            | Self::DeserializationError
            | Self::InvalidJson
            | Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InvalidConfiguration
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceExhausted | Self::ResultNotReady)
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "job",
            1100..=1199 => "capacity",
            2200..=2299 => "serialization",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }

    /// Stable wire name, matching the serde representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::JobNotFound => "JOB_NOT_FOUND",
            Self::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            Self::ResultNotReady => "RESULT_NOT_READY",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::ExecutorNotRegistered => "EXECUTOR_NOT_REGISTERED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::SerializationError => "SERIALIZATION_ERROR",
            Self::DeserializationError => "DESERIALIZATION_ERROR",
            Self::InvalidJson => "INVALID_JSON",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::InvalidInput => "INVALID_INPUT",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::MissingConfiguration => "MISSING_CONFIGURATION",
            Self::InvalidConfiguration => "INVALID_CONFIGURATION",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad input, unknown ids, polling too early)
    Low,
    /// Operational pressure (queue full, deadlines)
    Medium,
    /// System errors
    High,
    /// Errors requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::ValidationError
            | ErrorCode::InvalidInput
            | ErrorCode::JobNotFound
            | ErrorCode::InvalidStateTransition
            | ErrorCode::ResultNotReady => Self::Low,

            ErrorCode::ResourceExhausted
            | ErrorCode::ShuttingDown
            | ErrorCode::DeadlineExceeded => Self::Medium,

            ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::InvalidJson
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration
            | ErrorCode::ExecutorNotRegistered => Self::High,

            ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Retry information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.context.is_empty()
            && self.entity_id.is_none()
            && self.retry_after_secs.is_none()
            && self.suggested_action.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Trainyard Core.
#[derive(Error, Debug)]
pub struct TrainyardError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for TrainyardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl TrainyardError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create a validation error pointing at a specific field.
    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorCode::InvalidInput, format!("{}: {}", field, message))
            .with_context("field", field)
    }

    /// Create a configuration error for a rejected setting.
    pub fn invalid_config(key: &'static str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorCode::InvalidConfiguration, format!("{}: {}", key, message))
            .with_context("key", key)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let category = self.code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %self.code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %self.code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %self.code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %self.code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "trainyard_errors_total",
            "code" => self.code.as_str(),
            "category" => self.code.category(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Domain Constructors
// ═══════════════════════════════════════════════════════════════════════════════

impl TrainyardError {
    /// The referenced job id is unknown to the registry.
    pub fn job_not_found(job_id: JobId) -> Self {
        Self::new(ErrorCode::JobNotFound, format!("Job not found: {}", job_id))
            .with_details(ErrorDetails::new().with_entity("job", job_id.to_string()))
    }

    /// A mutation was attempted that the job state machine does not allow.
    pub fn invalid_state_transition(job_id: JobId, from: JobStatus, to: JobStatus) -> Self {
        Self::new(
            ErrorCode::InvalidStateTransition,
            format!("Invalid job state transition: {} -> {}", from, to),
        )
        .with_details(
            ErrorDetails::new()
                .with_entity("job", job_id.to_string())
                .with_context("from_state", from)
                .with_context("to_state", to),
        )
    }

    /// The job exists but has no result yet (or never will).
    pub fn result_not_ready(job_id: JobId, status: JobStatus) -> Self {
        let mut details = ErrorDetails::new()
            .with_entity("job", job_id.to_string())
            .with_context("status", status);
        if !status.is_terminal() {
            details = details.with_retry_after(1);
        }
        Self::new(
            ErrorCode::ResultNotReady,
            format!("Result not available: job is {}", status),
        )
        .with_details(details)
    }

    /// Admission control rejected a submission.
    pub fn resource_exhausted(queue_depth: usize) -> Self {
        Self::new(
            ErrorCode::ResourceExhausted,
            format!("Job queue is full ({} pending submissions)", queue_depth),
        )
        .with_details(
            ErrorDetails::new()
                .with_context("queue_depth", queue_depth)
                .with_retry_after(5)
                .with_suggestion("Retry later or raise engine.max_queue_depth"),
        )
    }

    pub fn shutting_down() -> Self {
        Self::new(ErrorCode::ShuttingDown, "Job engine is shutting down")
    }

    /// A job ran past its configured deadline.
    pub fn deadline_exceeded(elapsed: std::time::Duration, limit: std::time::Duration) -> Self {
        Self::new(
            ErrorCode::DeadlineExceeded,
            format!(
                "Job deadline exceeded: elapsed {}ms, limit {}ms",
                elapsed.as_millis(),
                limit.as_millis()
            ),
        )
        .with_context("elapsed_ms", elapsed.as_millis() as u64)
        .with_context("limit_ms", limit.as_millis() as u64)
    }

    pub fn executor_not_registered(kind: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::ExecutorNotRegistered,
            format!("No step executor registered for job kind '{}'", kind),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false for errors
    pub success: bool,

    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,

    pub numeric_code: u32,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,

    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&TrainyardError> for ErrorResponse {
    fn from(error: &TrainyardError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: if error.details.is_empty() {
                    None
                } else {
                    Some(error.details.clone())
                },
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for TrainyardError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| TrainyardError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| TrainyardError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| TrainyardError::new(ErrorCode::JobNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| TrainyardError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for TrainyardError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() {
            ErrorCode::DeserializationError
        } else if error.is_eof() {
            ErrorCode::InvalidJson
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string()).with_source(error)
    }
}

impl From<std::io::Error> for TrainyardError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, user_msg) = match error.kind() {
            ErrorKind::NotFound => (ErrorCode::MissingConfiguration, "File or resource not found"),
            ErrorKind::TimedOut => (ErrorCode::DeadlineExceeded, "Operation timed out"),
            _ => (ErrorCode::InternalError, "An I/O error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<anyhow::Error> for TrainyardError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<TrainyardError>() {
            Ok(err) => err,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for TrainyardError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::JobNotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::ValidationError.http_status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ErrorCode::ResourceExhausted.http_status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::ResultNotReady.http_status(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::ShuttingDown.http_status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ErrorCode::InternalError.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::JobNotFound.category(), "job");
        assert_eq!(ErrorCode::ResourceExhausted.category(), "capacity");
        assert_eq!(ErrorCode::InvalidInput.category(), "validation");
        assert_eq!(ErrorCode::InternalError.category(), "internal");
    }

    #[test]
    fn test_error_code_wire_name_matches_serde() {
        for code in [
            ErrorCode::JobNotFound,
            ErrorCode::ResultNotReady,
            ErrorCode::ResourceExhausted,
            ErrorCode::InvalidStateTransition,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::JobNotFound), ErrorSeverity::Low);
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::ResourceExhausted), ErrorSeverity::Medium);
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::InternalError), ErrorSeverity::Critical);
    }

    #[test]
    fn test_job_not_found_carries_entity() {
        let id = JobId::new();
        let err = TrainyardError::job_not_found(id);
        assert_eq!(err.code(), ErrorCode::JobNotFound);
        assert_eq!(err.details().entity_type.as_deref(), Some("job"));
        assert_eq!(err.details().entity_id, Some(id.to_string()));
    }

    #[test]
    fn test_result_not_ready_retry_hint_only_while_active() {
        let id = JobId::new();
        let running = TrainyardError::result_not_ready(id, JobStatus::Running);
        assert_eq!(running.details().retry_after_secs, Some(1));

        let failed = TrainyardError::result_not_ready(id, JobStatus::Failed);
        assert!(failed.details().retry_after_secs.is_none());
        assert!(!failed.user_message().is_empty());
    }

    #[test]
    fn test_resource_exhausted_is_retryable() {
        let err = TrainyardError::resource_exhausted(8);
        assert!(err.is_retryable());
        assert_eq!(err.details().retry_after_secs, Some(5));
    }

    #[test]
    fn test_error_display_includes_internal() {
        let err = TrainyardError::internal("dispatcher vanished");
        let rendered = err.to_string();
        assert!(rendered.contains("INTERNAL_ERROR"));
        assert!(rendered.contains("dispatcher vanished"));
    }

    #[test]
    fn test_error_response_omits_empty_details() {
        let err = TrainyardError::validation("bad");
        let response = ErrorResponse::from(&err);
        assert!(!response.success);
        assert!(response.error.details.is_none());
        assert_eq!(response.error.numeric_code, 4100);
    }

    #[test]
    fn test_option_context() {
        let missing: Option<u32> = None;
        let err = missing.context("nothing here").unwrap_err();
        assert_eq!(err.code(), ErrorCode::JobNotFound);
    }
}
