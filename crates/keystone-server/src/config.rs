//! Server and router configuration.
//!
//! # Example
//!
//! ```rust
//! use keystone_server::{RouterConfig, ServerConfig};
//! use std::time::Duration;
//!
//! let server = ServerConfig::builder()
//!     .http_addr("127.0.0.1:3000")
//!     .shutdown_timeout(Duration::from_secs(10))
//!     .build();
//! assert_eq!(server.http_addr(), "127.0.0.1:3000");
//!
//! let router = RouterConfig::builder().global_prefix("/api/").build();
//! assert_eq!(router.global_prefix(), Some("/api"));
//! ```

use http::StatusCode;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default HTTP bind address.
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default request body limit (2 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Default number of source lines shown around each trace frame.
pub const DEFAULT_SOURCE_CONTEXT_LINES: u32 = 9;

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    http_addr: String,
    shutdown_timeout: Duration,
    request_timeout: Duration,
    max_body_bytes: usize,
}

impl ServerConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Returns the HTTP bind address.
    #[must_use]
    pub fn http_addr(&self) -> &str {
        &self.http_addr
    }

    /// Parses the bind address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.http_addr.parse()
    }

    /// How long shutdown waits for open connections.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Time allowed for reading the body and running the pipeline.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Largest accepted request body.
    #[must_use]
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    http_addr: String,
    shutdown_timeout: Duration,
    request_timeout: Duration,
    max_body_bytes: usize,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self {
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerConfigBuilder {
    /// Sets the HTTP bind address.
    #[must_use]
    pub fn http_addr(mut self, addr: impl Into<String>) -> Self {
        self.http_addr = addr.into();
        self
    }

    /// Sets the graceful shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the request body limit.
    #[must_use]
    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            http_addr: self.http_addr,
            shutdown_timeout: self.shutdown_timeout,
            request_timeout: self.request_timeout,
            max_body_bytes: self.max_body_bytes,
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    global_prefix: Option<String>,
    expose_error_trace: bool,
    source_root: Option<PathBuf>,
    source_context_lines: u32,
    default_empty_status: StatusCode,
}

impl RouterConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> RouterConfigBuilder {
        RouterConfigBuilder::default()
    }

    /// Prefix joined in front of every route, without a trailing slash.
    #[must_use]
    pub fn global_prefix(&self) -> Option<&str> {
        self.global_prefix.as_deref()
    }

    /// Whether unhandled error bodies carry the structured trace.
    #[must_use]
    pub fn expose_error_trace(&self) -> bool {
        self.expose_error_trace
    }

    /// Directory trace frame paths resolve against.
    #[must_use]
    pub fn source_root(&self) -> Option<&PathBuf> {
        self.source_root.as_ref()
    }

    /// Source lines read on each side of a trace frame.
    #[must_use]
    pub fn source_context_lines(&self) -> u32 {
        self.source_context_lines
    }

    /// Status sent for empty replies.
    #[must_use]
    pub fn default_empty_status(&self) -> StatusCode {
        self.default_empty_status
    }

    /// Joins the global prefix and a route path.
    ///
    /// The result always starts with `/` and never ends with one, except for
    /// the root path itself.
    #[must_use]
    pub fn join_path(&self, path: &str) -> String {
        let mut joined = String::new();
        if let Some(prefix) = &self.global_prefix {
            joined.push_str(prefix);
        }
        let path = path.trim_matches('/');
        if !path.is_empty() {
            joined.push('/');
            joined.push_str(path);
        }
        if joined.is_empty() {
            joined.push('/');
        }
        joined
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`RouterConfig`].
#[derive(Debug, Clone)]
pub struct RouterConfigBuilder {
    global_prefix: Option<String>,
    expose_error_trace: bool,
    source_root: Option<PathBuf>,
    source_context_lines: u32,
    default_empty_status: StatusCode,
}

impl Default for RouterConfigBuilder {
    fn default() -> Self {
        Self {
            global_prefix: None,
            expose_error_trace: true,
            source_root: None,
            source_context_lines: DEFAULT_SOURCE_CONTEXT_LINES,
            default_empty_status: StatusCode::NO_CONTENT,
        }
    }
}

impl RouterConfigBuilder {
    /// Sets the global route prefix.
    ///
    /// Surrounding slashes are normalized, and an empty prefix clears it.
    #[must_use]
    pub fn global_prefix(mut self, prefix: &str) -> Self {
        let trimmed = prefix.trim_matches('/');
        self.global_prefix = if trimmed.is_empty() {
            None
        } else {
            Some(format!("/{trimmed}"))
        };
        self
    }

    /// Controls whether error bodies include the structured trace.
    #[must_use]
    pub fn expose_error_trace(mut self, expose: bool) -> Self {
        self.expose_error_trace = expose;
        self
    }

    /// Sets the directory trace frames resolve against.
    #[must_use]
    pub fn source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_root = Some(root.into());
        self
    }

    /// Sets how many source lines surround each trace frame.
    #[must_use]
    pub fn source_context_lines(mut self, lines: u32) -> Self {
        self.source_context_lines = lines;
        self
    }

    /// Sets the status sent for empty replies.
    #[must_use]
    pub fn default_empty_status(mut self, status: StatusCode) -> Self {
        self.default_empty_status = status;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> RouterConfig {
        RouterConfig {
            global_prefix: self.global_prefix,
            expose_error_trace: self.expose_error_trace,
            source_root: self.source_root,
            source_context_lines: self.source_context_lines,
            default_empty_status: self.default_empty_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr(), DEFAULT_HTTP_ADDR);
        assert_eq!(
            config.shutdown_timeout(),
            Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS)
        );
        assert_eq!(config.max_body_bytes(), DEFAULT_MAX_BODY_BYTES);
        assert!(config.socket_addr().is_ok());
    }

    #[test]
    fn test_invalid_socket_addr() {
        let config = ServerConfig::builder().http_addr("not-an-address").build();
        assert!(config.socket_addr().is_err());
    }

    #[test]
    fn test_router_defaults() {
        let config = RouterConfig::default();
        assert!(config.global_prefix().is_none());
        assert!(config.expose_error_trace());
        assert_eq!(config.source_context_lines(), 9);
        assert_eq!(config.default_empty_status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn test_global_prefix_normalized() {
        assert_eq!(
            RouterConfig::builder().global_prefix("api/v1/").build().global_prefix(),
            Some("/api/v1")
        );
        assert_eq!(
            RouterConfig::builder().global_prefix("/").build().global_prefix(),
            None
        );
    }

    #[test]
    fn test_join_path() {
        let plain = RouterConfig::default();
        assert_eq!(plain.join_path("/users/"), "/users");
        assert_eq!(plain.join_path(""), "/");

        let prefixed = RouterConfig::builder().global_prefix("/api").build();
        assert_eq!(prefixed.join_path("/users/:id"), "/api/users/:id");
        assert_eq!(prefixed.join_path("/"), "/api");
    }
}
