//! # Package Error Types
//!
//! Typed error handling for package, registration and payment operations.
//! Every service call returns `Result<T, PackageError>` so callers can
//! pattern-match on the failure kind instead of inspecting messages.

use crate::batch::DateRange;
use crate::package::PackageStatus;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A single field-level validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Validation failures collected across all offending fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a collection holding one failure
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(field, message);
        errors
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// Check whether a given field failed
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// Message recorded for a field, if any
    pub fn message_for(&self, field: &str) -> Option<&str> {
        self.errors
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    /// `Ok(())` when nothing was collected, otherwise a validation error
    pub fn into_result(self) -> PackageResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(PackageError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

/// Package state violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The state machine does not allow this pair
    #[error("invalid status transition: from '{from}' to '{to}'")]
    InvalidTransition {
        from: PackageStatus,
        to: PackageStatus,
    },

    #[error("cannot modify a confirmed package")]
    ConfirmedPackage,

    #[error("cannot modify a cancelled package")]
    CancelledPackage,

    /// A payment is in flight for this package
    #[error("cannot modify a package with a pending payment")]
    PendingPackage,

    #[error("package has no registrations")]
    EmptyPackage,
}

/// Failures talking to the external payment processor
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessorError {
    /// The call did not complete within the configured timeout
    #[error("request to {provider} timed out after {timeout_secs}s")]
    Timeout { provider: String, timeout_secs: u64 },

    /// Connection or transport failure
    #[error("network error: {0}")]
    Network(String),

    /// The processor answered with a non-success status
    #[error("provider error [{provider}] (HTTP {status}): {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },

    /// The processor answered with something we could not parse
    #[error("malformed provider response: {0}")]
    Malformed(String),

    /// The request was refused before it was sent
    #[error("invalid processor request: {0}")]
    InvalidRequest(String),
}

impl ProcessorError {
    /// Returns true if repeating the call later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessorError::Timeout { .. } | ProcessorError::Network(_) => true,
            ProcessorError::Api { status, .. } => *status >= 500 || *status == 429,
            ProcessorError::Malformed(_) | ProcessorError::InvalidRequest(_) => false,
        }
    }
}

/// Core error type for all package operations
#[derive(Debug, Clone, Error)]
pub enum PackageError {
    /// Field-level input problems, all offending fields collected
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// Illegal status transition or mutation of a locked package
    #[error(transparent)]
    State(#[from] StateError),

    /// Batch date range conflicts with an existing batch
    #[error("batch dates ({range}) overlap another batch for this event")]
    Overlap { range: DateRange },

    /// External processor call failed; nothing was committed
    #[error("payment processing failed: {0}")]
    Processor(#[from] ProcessorError),

    #[error("invalid payment method '{0}', use \"pix\" or \"credit_card\"")]
    InvalidPaymentMethod(String),

    /// Webhook callback carried unusable data
    #[error("callback validation failed: {0}")]
    CallbackValidation(String),

    /// No package matches a processor external reference
    #[error("package {reference} not found")]
    PackageNotFound { reference: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PackageError {
    /// Shorthand for a not-found error
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        PackageError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Returns true if the same request may succeed when repeated later.
    ///
    /// An unknown external reference counts as retryable: the webhook may
    /// have arrived before the package it refers to was stored.
    pub fn is_retryable(&self) -> bool {
        match self {
            PackageError::Processor(e) => e.is_retryable(),
            PackageError::PackageNotFound { .. } => true,
            _ => false,
        }
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            PackageError::Validation(_) => 422,
            PackageError::State(_) => 409,
            PackageError::Overlap { .. } => 409,
            PackageError::Processor(ProcessorError::Timeout { .. }) => 504,
            PackageError::Processor(ProcessorError::Network(_)) => 503,
            PackageError::Processor(ProcessorError::InvalidRequest(_)) => 400,
            PackageError::Processor(_) => 502,
            PackageError::InvalidPaymentMethod(_) => 400,
            PackageError::CallbackValidation(_) => 400,
            PackageError::PackageNotFound { .. } => 404,
            PackageError::NotFound { .. } => 404,
            PackageError::Forbidden(_) => 403,
            PackageError::Configuration(_) => 500,
        }
    }

    /// Field errors, when this is a validation failure
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            PackageError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

/// Result type alias for package operations
pub type PackageResult<T> = Result<T, PackageError>;
