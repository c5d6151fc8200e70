//! Typed configuration for Keystone.
//!
//! Configuration is layered, later layers overriding earlier ones:
//! defaults, then TOML or JSON files, then a `.env` file, then
//! `KEYSTONE__SECTION__KEY` environment variables. Every section rejects
//! unknown fields, and [`ConfigLoader::load`] validates the result.
//!
//! - [`ServerSection`] - Bind address, timeouts, body limit
//! - [`RouterSection`] - Global prefix, error traces, empty-reply status
//! - [`TelemetrySection`] - Logging and metrics
//!
//! # Example
//!
//! ```no_run
//! use keystone_config::ConfigLoader;
//!
//! # fn main() -> Result<(), keystone_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("keystone.toml")?
//!     .with_dotenv()?
//!     .with_env_prefix("KEYSTONE")
//!     .load()?;
//!
//! let router = config.router_config();
//! let server = config.server_config();
//! # Ok(())
//! # }
//! ```
//!
//! # File Format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8080"
//! shutdown_timeout_secs = 30
//! request_timeout_ms = 30000
//! max_body_bytes = 2097152
//!
//! [router]
//! global_prefix = "api"
//! expose_error_trace = false
//! default_empty_status = 204
//!
//! [telemetry]
//! service_name = "users"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//!
//! [telemetry.metrics]
//! enabled = true
//! addr = "0.0.0.0:9090"
//! ```

#![doc(html_root_url = "https://docs.rs/keystone-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::KeystoneConfig;
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::{LoggingSection, MetricsSection, RouterSection, ServerSection, TelemetrySection};
