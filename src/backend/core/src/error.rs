//! Error handling for Jobgate Core.
//!
//! This module provides:
//! - A structured error type carrying a stable [`ErrorCode`]
//! - Severity and retryability classification
//! - Error logging with tracing integration
//! - Metrics integration for error tracking
//!
//! Only two codes are meant to reach callers in normal operation:
//! [`ErrorCode::WorkFailure`] (the job kind's own logic failed) and
//! [`ErrorCode::LockNotAcquired`]. Store failures on the registry and
//! deduplication paths are logged and swallowed at the engine boundary.
//!
//! # Usage
//!
//! ```rust,ignore
//! use jobgate_core::error::{JobgateError, Result, ErrorContext};
//!
//! fn load() -> Result<String> {
//!     std::fs::read_to_string("jobgate.toml").context("Failed to read config")
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

use crate::jobs::JobError;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Jobgate operations.
pub type Result<T> = std::result::Result<T, JobgateError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Execution (1000-1099)
    CapacityExceeded,
    WorkFailure,

    // Coordination (1100-1199)
    LockNotAcquired,

    // Store (2000-2099)
    StoreUnavailable,
    StoreError,

    // Serialization (2200-2299)
    SerializationError,
    DeserializationError,

    // Validation (4100-4199)
    InvalidInput,

    // Configuration (5000-5099)
    ConfigurationError,

    // Internal (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::CapacityExceeded => 1000,
            Self::WorkFailure => 1001,

            Self::LockNotAcquired => 1100,

            Self::StoreUnavailable => 2000,
            Self::StoreError => 2001,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::InvalidInput => 4100,

            Self::ConfigurationError => 5000,

            Self::InternalError => 9000,
        }
    }

    /// Check if this error is retryable by the caller.
    ///
    /// The engine itself never retries; this is advice for the transport.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockNotAcquired | Self::StoreUnavailable | Self::StoreError
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "execution",
            1100..=1199 => "coordination",
            2000..=2099 => "store",
            2200..=2299 => "serialization",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected outcomes (skips, bad input)
    Low,
    /// Operational issues (contention, degraded store)
    Medium,
    /// Failures of the work itself or of infrastructure
    High,
    /// Bugs
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::CapacityExceeded | ErrorCode::InvalidInput => Self::Low,

            ErrorCode::LockNotAcquired
            | ErrorCode::StoreUnavailable => Self::Medium,

            ErrorCode::WorkFailure
            | ErrorCode::StoreError
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::ConfigurationError => Self::High,

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

    /// Job kind the error relates to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_kind: Option<String>,

    /// Job identifier the error relates to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job(mut self, job_kind: impl Into<String>, job_id: impl Into<String>) -> Self {
        self.job_kind = Some(job_kind.into());
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Jobgate Core.
#[derive(Error, Debug)]
pub struct JobgateError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Short description of what failed
    message: Cow<'static, str>,

    /// Detailed message from the underlying failure
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for JobgateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl JobgateError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            message: message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both a short and an internal message.
    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Invalid configuration",
            message,
        )
    }

    /// The job kind's own work failed. Never retried by the engine.
    pub fn work_failed(job_kind: &str, job_id: &str, error: JobError) -> Self {
        Self::with_internal(
            ErrorCode::WorkFailure,
            format!("Job {} failed", job_kind),
            error.to_string(),
        )
        .with_details(ErrorDetails::new().with_job(job_kind, job_id))
        .with_source(error)
    }

    /// A named lock could not be obtained within the retry budget.
    pub fn lock_not_acquired(key: &str, attempts: u32) -> Self {
        Self::new(ErrorCode::LockNotAcquired, "Failed to obtain a lock")
            .with_context("lease_key", key)
            .with_context("attempts", attempts)
    }

    /// The shared store could not be reached.
    pub fn store_unavailable(backend: &str, message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::StoreUnavailable,
            "Shared store unavailable",
            message,
        )
        .with_context("backend", backend)
    }

    /// No handler is registered for a job kind.
    pub fn unknown_job_kind(job_kind: &str) -> Self {
        Self::new(
            ErrorCode::InvalidInput,
            format!("No handler registered for job kind {}", job_kind),
        )
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

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// The underlying job failure, if this is a `WorkFailure`.
    pub fn job_error(&self) -> Option<&JobError> {
        self.source
            .as_ref()
            .and_then(|source| source.downcast_ref::<JobError>())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            "jobgate_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
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
        self.map_err(|e| JobgateError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| JobgateError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| JobgateError::new(ErrorCode::InvalidInput, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| JobgateError::new(code, "Value not present"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<redis::RedisError> for JobgateError {
    fn from(error: redis::RedisError) -> Self {
        let (code, msg) = if error.is_connection_refusal()
            || error.is_connection_dropped()
            || error.is_io_error()
        {
            (ErrorCode::StoreUnavailable, "Unable to connect to Redis")
        } else if error.is_timeout() {
            (ErrorCode::StoreUnavailable, "Redis operation timed out")
        } else {
            (ErrorCode::StoreError, "A Redis error occurred")
        };

        Self::with_internal(code, msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for JobgateError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON", error.to_string()).with_source(error)
    }
}

impl From<std::io::Error> for JobgateError {
    fn from(error: std::io::Error) -> Self {
        Self::with_internal(ErrorCode::InternalError, "I/O error", error.to_string())
            .with_source(error)
    }
}

impl From<config::ConfigError> for JobgateError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Failed to load configuration",
            error.to_string(),
        )
        .with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_is_retryable() {
        assert!(ErrorCode::LockNotAcquired.is_retryable());
        assert!(ErrorCode::StoreUnavailable.is_retryable());
        assert!(!ErrorCode::WorkFailure.is_retryable());
        assert!(!ErrorCode::InvalidInput.is_retryable());
    }

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::WorkFailure.category(), "execution");
        assert_eq!(ErrorCode::LockNotAcquired.category(), "coordination");
        assert_eq!(ErrorCode::StoreUnavailable.category(), "store");
        assert_eq!(ErrorCode::ConfigurationError.category(), "configuration");
    }

    #[test]
    fn test_work_failure_keeps_job_error() {
        let error = JobgateError::work_failed("export", "abc123", JobError::new("disk full"));

        assert_eq!(error.code(), ErrorCode::WorkFailure);
        assert_eq!(error.details().job_kind.as_deref(), Some("export"));
        assert_eq!(error.details().job_id.as_deref(), Some("abc123"));
        assert_eq!(error.job_error().map(|e| e.message.as_str()), Some("disk full"));
    }

    #[test]
    fn test_lock_not_acquired_context() {
        let error = JobgateError::lock_not_acquired("artifacts:destroy:lock", 3);

        assert_eq!(error.code(), ErrorCode::LockNotAcquired);
        assert_eq!(
            error.details().context.get("attempts"),
            Some(&serde_json::json!(3))
        );
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::CapacityExceeded),
            ErrorSeverity::Low
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::StoreUnavailable),
            ErrorSeverity::Medium
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::WorkFailure),
            ErrorSeverity::High
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::InternalError),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_option_context() {
        let value: Option<u32> = None;
        let error = value.context("missing lease token").unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidInput);
    }

    #[test]
    fn test_error_display() {
        let error = JobgateError::with_internal(
            ErrorCode::StoreUnavailable,
            "Shared store unavailable",
            "Connection refused: localhost:6379",
        );

        let display = format!("{}", error);
        assert!(display.contains("StoreUnavailable"));
        assert!(display.contains("Shared store unavailable"));
        assert!(display.contains("Connection refused"));
    }
}
