//! Error types for Keystone.
//!
//! This module provides the [`KeystoneError`] type, the HTTP-facing error used
//! throughout the framework. Every error carries:
//!
//! - An [`ErrorCategory`] that maps to a default HTTP status code
//! - A human-readable message and optional JSON details
//! - The source location it was raised at, plus one [`Frame`] per pipeline
//!   stage it crossed on the way out
//!
//! Arbitrary errors are promoted to [`ErrorCategory::Internal`] through
//! `From<anyhow::Error>` or [`KeystoneError::from_error`].

use crate::di::{short_type_name, ResolveError};
use crate::trace::{ErrorTrace, Frame};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::panic::Location;
use thiserror::Error;

/// Result type alias using [`KeystoneError`].
pub type KeystoneResult<T> = Result<T, KeystoneError>;

/// Categories of errors for classification and handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Request validation errors (invalid input, schema mismatch).
    Validation,
    /// Malformed or otherwise unacceptable request.
    BadRequest,
    /// The request was not authorized (guard rejection, missing credentials).
    Unauthorized,
    /// Permission denied.
    Forbidden,
    /// Resource not found.
    NotFound,
    /// Conflict (e.g., concurrent modification).
    Conflict,
    /// Rate limiting.
    RateLimited,
    /// Internal server errors.
    Internal,
    /// Misconfigured application (unknown provider, cycle, bad registration).
    Configuration,
    /// External service errors (downstream failures).
    External,
    /// Request timeout.
    Timeout,
}

impl ErrorCategory {
    /// Returns the default HTTP status code for this error category.
    #[must_use]
    pub const fn default_status_code(&self) -> StatusCode {
        match self {
            Self::Validation | Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal | Self::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
            Self::External => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Returns the machine-readable error code for this category.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Internal => "INTERNAL_ERROR",
            Self::Configuration => "CONFIGURATION_ERROR",
            Self::External => "EXTERNAL_SERVICE_ERROR",
            Self::Timeout => "TIMEOUT",
        }
    }
}

/// Standard error type for Keystone.
///
/// # Example
///
/// ```
/// use keystone_core::{ErrorCategory, KeystoneError};
///
/// fn find_user(id: &str) -> Result<(), KeystoneError> {
///     if id.is_empty() {
///         return Err(KeystoneError::bad_request("User id cannot be empty"));
///     }
///     Err(KeystoneError::not_found(format!("User {id} not found")))
/// }
///
/// let err = find_user("42").unwrap_err();
/// assert_eq!(err.category(), ErrorCategory::NotFound);
/// ```
#[derive(Error, Debug)]
#[error("{message}")]
pub struct KeystoneError {
    category: ErrorCategory,
    message: String,
    kind: Cow<'static, str>,
    status: Option<StatusCode>,
    details: Option<serde_json::Value>,
    #[source]
    source: Option<anyhow::Error>,
    location: &'static Location<'static>,
    frames: Vec<Frame>,
}

impl KeystoneError {
    /// Creates an error of the given category.
    #[track_caller]
    #[must_use]
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            kind: Cow::Borrowed("KeystoneError"),
            status: None,
            details: None,
            source: None,
            location: Location::caller(),
            frames: Vec::new(),
        }
    }

    /// Creates a validation error.
    #[track_caller]
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, message)
    }

    /// Creates a validation error with field-specific errors.
    #[track_caller]
    #[must_use]
    pub fn validation_with_fields(message: impl Into<String>, field_errors: FieldErrors) -> Self {
        let details = serde_json::to_value(&field_errors).ok();
        let mut error = Self::new(ErrorCategory::Validation, message);
        error.details = details;
        error
    }

    /// Creates a bad request error.
    #[track_caller]
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::BadRequest, message)
    }

    /// Creates an unauthorized error.
    #[track_caller]
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unauthorized, message)
    }

    /// Creates a forbidden error.
    #[track_caller]
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Forbidden, message)
    }

    /// Creates a not found error.
    #[track_caller]
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NotFound, message)
    }

    /// Creates a conflict error.
    #[track_caller]
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Conflict, message)
    }

    /// Creates an internal error.
    #[track_caller]
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, message)
    }

    /// Creates an internal error with a source error.
    #[track_caller]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        let mut error = Self::new(ErrorCategory::Internal, message);
        error.source = Some(source.into());
        error
    }

    /// Creates a configuration error.
    #[track_caller]
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Configuration, message)
    }

    /// Creates an external service error.
    #[track_caller]
    #[must_use]
    pub fn external(message: impl Into<String>, service: Option<impl Into<String>>) -> Self {
        let mut error = Self::new(ErrorCategory::External, message);
        error.details = service.map(|svc| serde_json::json!({ "service": svc.into() }));
        error
    }

    /// Creates a timeout error.
    #[track_caller]
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, message)
    }

    /// Promotes an arbitrary error to an internal error, keeping its type
    /// name as the error kind.
    #[track_caller]
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut promoted = Self::new(ErrorCategory::Internal, error.to_string());
        promoted.kind = Cow::Borrowed(short_type_name(std::any::type_name::<E>()));
        promoted.source = Some(anyhow::Error::new(error));
        promoted
    }

    /// Attaches JSON details to this error.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Overrides the HTTP status code derived from the category.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Overrides the error kind reported in traces.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<Cow<'static, str>>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Records that this error crossed the given frame.
    #[must_use]
    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.frames.push(frame);
        self
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.category
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        self.status
            .unwrap_or_else(|| self.category.default_status_code())
    }

    /// Returns the human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the error kind (the originating error type name).
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the attached details, if any.
    #[must_use]
    pub const fn details(&self) -> Option<&serde_json::Value> {
        self.details.as_ref()
    }

    /// Returns the source location this error was raised at.
    #[must_use]
    pub const fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Returns the call frames this error collected, innermost first.
    ///
    /// The first frame is always the location the error was raised at.
    #[must_use]
    pub fn frames(&self) -> Vec<Frame> {
        let mut frames = Vec::with_capacity(self.frames.len() + 1);
        frames.push(Frame::from_location(self.location, self.kind.as_ref()));
        frames.extend(self.frames.iter().cloned());
        frames
    }

    /// Returns `true` if this error is a server-side failure.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Converts this error to a serializable error envelope.
    #[must_use]
    pub fn to_envelope(&self, request_id: Option<&str>) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorDetail {
                code: self.category.code().to_string(),
                message: self.message.clone(),
                category: self.category,
                details: self.details.clone(),
            },
            request_id: request_id.map(ToString::to_string),
            trace: None,
        }
    }
}

impl From<anyhow::Error> for KeystoneError {
    #[track_caller]
    fn from(error: anyhow::Error) -> Self {
        let mut promoted = Self::new(ErrorCategory::Internal, error.to_string());
        promoted.kind = Cow::Borrowed("anyhow::Error");
        promoted.source = Some(error);
        promoted
    }
}

impl From<ResolveError> for KeystoneError {
    #[track_caller]
    fn from(error: ResolveError) -> Self {
        Self::new(ErrorCategory::Configuration, error.to_string())
            .with_kind(Cow::Borrowed(error.kind()))
    }
}

/// Field-specific validation errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Error)]
#[error("Field validation errors")]
pub struct FieldErrors {
    /// Map of field path to list of error messages.
    pub fields: HashMap<String, Vec<String>>,
}

impl FieldErrors {
    /// Creates a new empty `FieldErrors`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an error for a field.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    /// Returns `true` if there are no field errors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the number of fields with errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

/// Serializable error envelope for HTTP responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error details.
    pub error: ErrorDetail,
    /// The request ID for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// The structured error record, when exposed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<ErrorTrace>,
}

impl ErrorEnvelope {
    /// Attaches a structured error record.
    #[must_use]
    pub fn with_trace(mut self, trace: ErrorTrace) -> Self {
        self.trace = Some(trace);
        self
    }
}

/// Error detail within an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Error category.
    pub category: ErrorCategory,
    /// Additional error details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
