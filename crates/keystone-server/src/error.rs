//! Errors raised by the router and the transport.

use http::StatusCode;
use keystone_core::{ErrorTrace, KeystoneError};
use thiserror::Error;

/// Message of the error returned when no interceptor reached the handler.
pub const INVALID_REQUEST_MESSAGE: &str =
    "Handler not called because of interceptor: Invalid Request";

/// How a request left the pipeline without a reply.
///
/// Guard rejections and interceptor short-circuits are ordinary outcomes
/// here rather than errors raised from inside a stage. Both skip the
/// exception filters and go straight to the adapter fallback.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A guard refused the request.
    #[error("Not authorized from guard {guard}")]
    Unauthorized {
        /// Name of the rejecting guard.
        guard: String,
    },

    /// No interceptor invoked the rest of the pipeline.
    #[error("{}", INVALID_REQUEST_MESSAGE)]
    InvalidRequest,

    /// A stage failed and no exception filter produced a reply.
    #[error("{error}")]
    Failed {
        /// The error, promoted to [`KeystoneError`].
        error: KeystoneError,
        /// The structured record, when the router exposes it.
        trace: Option<Box<ErrorTrace>>,
    },
}

impl PipelineError {
    /// Wraps a failure without a trace.
    #[must_use]
    pub fn failed(error: KeystoneError) -> Self {
        Self::Failed { error, trace: None }
    }

    /// Returns the HTTP status this outcome maps to.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::Failed { error, .. } => error.status_code(),
        }
    }

    /// Returns the attached trace, if any.
    #[must_use]
    pub fn trace(&self) -> Option<&ErrorTrace> {
        match self {
            Self::Failed { trace, .. } => trace.as_deref(),
            _ => None,
        }
    }

    /// Converts the outcome into an HTTP-facing error.
    #[must_use]
    pub fn into_error(self) -> KeystoneError {
        match self {
            Self::Unauthorized { guard } => KeystoneError::unauthorized("Unauthorized")
                .with_kind("AuthorizationError")
                .with_details(serde_json::json!(format!("Not authorized from guard {guard}"))),
            Self::InvalidRequest => {
                KeystoneError::bad_request(INVALID_REQUEST_MESSAGE).with_kind("InvalidRequest")
            }
            Self::Failed { error, .. } => error,
        }
    }
}

impl From<KeystoneError> for PipelineError {
    fn from(error: KeystoneError) -> Self {
        Self::failed(error)
    }
}

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("Bind error: {0}")]
    BindError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}
