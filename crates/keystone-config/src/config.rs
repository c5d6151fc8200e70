//! The root configuration type.

use crate::{ConfigError, RouterSection, ServerSection, TelemetrySection};
use http::StatusCode;
use keystone_server::{RouterConfig, ServerConfig};
use keystone_telemetry::{LogConfig, LogFormat, MetricsConfig, TelemetryConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Complete Keystone configuration.
///
/// Load it with [`ConfigLoader`](crate::ConfigLoader), then hand each
/// section to the crate that consumes it through the conversion methods.
///
/// # Example
///
/// ```
/// use keystone_config::KeystoneConfig;
///
/// let config = KeystoneConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// assert!(config.validate().is_ok());
///
/// let router = config.router_config();
/// assert!(router.expose_error_trace());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct KeystoneConfig {
    /// Transport settings.
    #[serde(default)]
    pub server: ServerSection,

    /// Router settings.
    #[serde(default)]
    pub router: RouterSection,

    /// Logging and metrics settings.
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

impl KeystoneConfig {
    /// Development preset: pretty debug logs with source locations.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.telemetry.environment = "development".to_string();
        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.include_location = true;
        config
    }

    /// Production preset: JSON info logs, no error traces in responses.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.telemetry.environment = "production".to_string();
        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config.router.expose_error_trace = false;
        config
    }

    /// Checks every value the runtime would otherwise reject late.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.http_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            ));
        }
        if self.server.request_timeout_ms == 0 {
            return Err(ConfigError::invalid_value(
                "server.request_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::invalid_value(
                "server.max_body_bytes",
                "must be greater than zero",
            ));
        }

        if StatusCode::from_u16(self.router.default_empty_status).is_err() {
            return Err(ConfigError::invalid_value(
                "router.default_empty_status",
                format!("not an HTTP status: {}", self.router.default_empty_status),
            ));
        }

        if self.telemetry.logging.enabled {
            keystone_telemetry::logging::create_env_filter(&self.telemetry.logging.level)
                .map_err(|e| ConfigError::invalid_value("telemetry.logging.level", e.to_string()))?;
        }

        let metrics = &self.telemetry.metrics;
        if let (true, Some(addr)) = (metrics.enabled, &metrics.addr) {
            if addr.parse::<SocketAddr>().is_err() {
                return Err(ConfigError::invalid_value(
                    "telemetry.metrics.addr",
                    format!("invalid socket address: {addr}"),
                ));
            }
        }
        if metrics.histogram_buckets.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ConfigError::invalid_value(
                "telemetry.metrics.histogram_buckets",
                "must be strictly increasing",
            ));
        }

        Ok(())
    }

    /// Builds the transport configuration.
    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::builder()
            .http_addr(self.server.http_addr.clone())
            .shutdown_timeout(Duration::from_secs(self.server.shutdown_timeout_secs))
            .request_timeout(Duration::from_millis(self.server.request_timeout_ms))
            .max_body_bytes(self.server.max_body_bytes)
            .build()
    }

    /// Builds the router configuration.
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        let router = &self.router;
        let mut builder = RouterConfig::builder()
            .expose_error_trace(router.expose_error_trace)
            .source_context_lines(router.source_context_lines)
            .default_empty_status(
                StatusCode::from_u16(router.default_empty_status).unwrap_or(StatusCode::NO_CONTENT),
            );
        if let Some(prefix) = &router.global_prefix {
            builder = builder.global_prefix(prefix);
        }
        if let Some(root) = &router.source_root {
            builder = builder.source_root(root.clone());
        }
        builder.build()
    }

    /// Builds the logging configuration.
    #[must_use]
    pub fn log_config(&self) -> LogConfig {
        let logging = &self.telemetry.logging;
        let preset = match logging.format {
            LogFormat::Json => LogConfig::production(),
            LogFormat::Pretty => LogConfig::development(),
        };
        LogConfig {
            enabled: logging.enabled,
            level: logging.level.clone(),
            format: logging.format,
            file_line_info: logging.include_location,
            ..preset
        }
    }

    /// Builds the metrics configuration.
    #[must_use]
    pub fn metrics_config(&self) -> MetricsConfig {
        let metrics = &self.telemetry.metrics;
        MetricsConfig {
            enabled: metrics.enabled,
            addr: metrics.addr.clone(),
            duration_buckets: metrics.histogram_buckets.clone(),
        }
    }

    /// Builds the combined telemetry configuration.
    #[must_use]
    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig::builder()
            .service_name(&self.telemetry.service_name)
            .environment(&self.telemetry.environment)
            .logging(self.log_config())
            .metrics(self.metrics_config())
            .build()
    }
}
