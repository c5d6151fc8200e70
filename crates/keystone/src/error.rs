//! Application bootstrap errors.

use keystone_config::ConfigError;
use keystone_core::{KeystoneError, ResolveError};
use keystone_server::ServerError;
use keystone_telemetry::TelemetryError;
use thiserror::Error;

/// Errors raised while building or running an [`Application`](crate::Application).
#[derive(Debug, Error)]
pub enum ApplicationError {
    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The provider graph is inconsistent (unknown token, cycle, scope).
    #[error("invalid provider graph: {0}")]
    Container(#[from] ResolveError),

    /// A route or middleware pattern could not be registered.
    #[error("invalid routing setup: {0}")]
    Routing(#[from] KeystoneError),

    /// Logging or metrics could not be installed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// The HTTP server failed.
    #[error(transparent)]
    Server(#[from] ServerError),
}
