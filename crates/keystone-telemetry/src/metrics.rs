//! Prometheus metrics for Keystone.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `keystone_requests_total` | Counter | `route`, `method`, `status` | Completed requests |
//! | `keystone_request_duration_seconds` | Histogram | `route` | Request latency |
//! | `keystone_in_flight_requests` | Gauge | - | Requests in the pipeline |
//! | `keystone_guard_rejections_total` | Counter | `guard` | Requests refused by a guard |
//! | `keystone_unhandled_errors_total` | Counter | `kind` | Errors no exception filter answered |
//!
//! Recording functions are safe to call before [`init_metrics`]; without an
//! installed recorder the `metrics` facade drops the observations.
//!
//! # Example
//!
//! ```rust,ignore
//! use keystone_telemetry::metrics::record_request;
//!
//! record_request("/users/:id", "GET", 200, Duration::from_millis(45));
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

const REQUESTS_TOTAL: &str = "keystone_requests_total";
const REQUEST_DURATION: &str = "keystone_request_duration_seconds";
const IN_FLIGHT: &str = "keystone_in_flight_requests";
const GUARD_REJECTIONS: &str = "keystone_guard_rejections_total";
const UNHANDLED_ERRORS: &str = "keystone_unhandled_errors_total";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address of a standalone scrape listener (e.g., "0.0.0.0:9090").
    ///
    /// `None` installs the recorder only; render it with [`render_metrics`].
    pub addr: Option<String>,

    /// Histogram buckets for request duration, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: None,
            // 1ms .. 10s
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

/// Installs the global Prometheus recorder.
///
/// Calling it again after a successful install fails, since the `metrics`
/// facade accepts a single recorder per process.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparsable listener
/// address, and `TelemetryError::MetricsInit` if the recorder cannot be
/// installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let mut builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    if let Some(addr) = &config.addr {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))?;
        builder = builder.with_http_listener(addr);
    }

    let handle = builder
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    let _ = METRICS_HANDLE.set(handle);

    describe_metrics();
    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn describe_metrics() {
    describe_counter!(REQUESTS_TOTAL, "Total number of requests completed by the router");
    describe_histogram!(REQUEST_DURATION, "Request duration in seconds");
    describe_gauge!(IN_FLIGHT, "Number of requests currently in the pipeline");
    describe_counter!(GUARD_REJECTIONS, "Requests refused by a guard");
    describe_counter!(
        UNHANDLED_ERRORS,
        "Errors that no exception filter turned into a reply"
    );
}

/// Records a completed request.
///
/// `route` is the registered route pattern, not the concrete path, to keep
/// label cardinality bounded.
pub fn record_request(route: &str, method: &str, status_code: u16, duration: Duration) {
    counter!(
        REQUESTS_TOTAL,
        "route" => route.to_string(),
        "method" => method.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(REQUEST_DURATION, "route" => route.to_string()).record(duration.as_secs_f64());
}

/// Records a guard refusing a request.
pub fn record_guard_rejection(guard: &str) {
    counter!(GUARD_REJECTIONS, "guard" => guard.to_string()).increment(1);
}

/// Records an error that reached the adapter fallback.
pub fn record_unhandled_error(kind: &str) {
    counter!(UNHANDLED_ERRORS, "kind" => kind.to_string()).increment(1);
}

/// Guard that tracks an in-flight request.
///
/// Increments the gauge on creation and decrements it on drop, so a
/// panicking or cancelled request still leaves the gauge balanced.
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Creates a new guard and increments the in-flight gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!(IN_FLIGHT).increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(IN_FLIGHT).decrement(1.0);
    }
}
