//! Request-level error taxonomy for TALLY.
//!
//! Rule failures are not represented here: they are recorded on the
//! aggregation result and never abort a request.

use serde::{Deserialize, Serialize};

/// Core result type
pub type TallyResult<T> = Result<T, AggregationError>;

/// Errors that abort an aggregation request or a lookup
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregationError {
    /// Malformed or missing request fields
    #[error("Validation failed for {field}: {reason}")]
    Validation {
        /// Offending field
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// Unknown job or schema
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind ("job", "schema")
        kind: String,
        /// Requested identifier
        id: String,
    },

    /// Cancelled by the caller or by shutdown
    #[error("Aggregation cancelled")]
    Cancelled,

    /// The scheduler cannot accept work
    #[error("Service unavailable: {reason}")]
    Unavailable {
        /// Why work cannot be accepted
        reason: String,
    },

    /// Internal error (for unexpected errors)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl AggregationError {
    /// Shorthand for a validation error
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a lookup failure
    #[must_use]
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Stable category for this error
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } => ErrorCategory::ValidationError,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Unavailable { .. } => ErrorCategory::Unavailable,
            Self::Internal { .. } => ErrorCategory::InternalError,
        }
    }
}

/// Stable, machine-readable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Request failed validation
    ValidationError,
    /// Lookup failed
    NotFound,
    /// Work was cancelled
    Cancelled,
    /// Work could not be accepted
    Unavailable,
    /// Unexpected failure
    InternalError,
}

impl ErrorCategory {
    /// Wire name of the category
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::NotFound => "not_found",
            Self::Cancelled => "cancelled",
            Self::Unavailable => "unavailable",
            Self::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error payload: a category plus a human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Stable category
    pub category: ErrorCategory,
    /// Human-readable message
    pub message: String,
}

impl ErrorReport {
    /// Create a new report
    #[must_use]
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl From<&AggregationError> for ErrorReport {
    fn from(err: &AggregationError) -> Self {
        Self::new(err.category(), err.to_string())
    }
}
