//! Metrics collection and export for Beacon.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;

/// Metric names.
pub mod names {
    pub const SESSIONS_CREATED_TOTAL: &str = "beacon_sessions_created_total";
    pub const SESSIONS_REMOVED_TOTAL: &str = "beacon_sessions_removed_total";
    pub const HEARTBEATS_TOTAL: &str = "beacon_heartbeats_total";
    pub const REJECTED_TOTAL: &str = "beacon_rejected_total";
    pub const STORE_ERRORS_TOTAL: &str = "beacon_store_errors_total";
    pub const LIVE_SESSIONS: &str = "beacon_live_sessions";
    pub const LIVE_AUTHENTICATED: &str = "beacon_live_authenticated_sessions";
    pub const REQUEST_SECONDS: &str = "beacon_request_seconds";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::SESSIONS_CREATED_TOTAL,
        "Total number of sessions created since server start"
    );
    metrics::describe_counter!(
        names::SESSIONS_REMOVED_TOTAL,
        "Total number of explicit session removals"
    );
    metrics::describe_counter!(names::HEARTBEATS_TOTAL, "Total number of accepted heartbeats");
    metrics::describe_counter!(
        names::REJECTED_TOTAL,
        "Total number of heartbeats rejected for a malformed session"
    );
    metrics::describe_counter!(names::STORE_ERRORS_TOTAL, "Total number of failed store calls");
    metrics::describe_gauge!(names::LIVE_SESSIONS, "Last served live session count");
    metrics::describe_gauge!(
        names::LIVE_AUTHENTICATED,
        "Last served logged-in live session count"
    );
    metrics::describe_histogram!(names::REQUEST_SECONDS, "Request handling latency in seconds");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a created session.
pub fn record_session_created() {
    counter!(names::SESSIONS_CREATED_TOTAL).increment(1);
}

/// Record an explicit removal.
pub fn record_session_removed() {
    counter!(names::SESSIONS_REMOVED_TOTAL).increment(1);
}

/// Record an accepted heartbeat.
pub fn record_heartbeat(logged_in: Option<bool>) {
    let flag = match logged_in {
        Some(true) => "true",
        Some(false) => "false",
        None => "omitted",
    };
    counter!(names::HEARTBEATS_TOTAL, "logged_in" => flag).increment(1);
}

/// Record a rejected heartbeat.
pub fn record_rejected() {
    counter!(names::REJECTED_TOTAL).increment(1);
}

/// Record a failed store call.
pub fn record_store_error(operation: &'static str) {
    counter!(names::STORE_ERRORS_TOTAL, "operation" => operation).increment(1);
}

/// Update the served live count.
pub fn set_live_sessions(count: u64) {
    gauge!(names::LIVE_SESSIONS).set(count as f64);
}

/// Update the served logged-in count.
pub fn set_live_authenticated(count: u64) {
    gauge!(names::LIVE_AUTHENTICATED).set(count as f64);
}

/// Guard that records request latency on drop.
pub struct RequestTimer {
    route: &'static str,
    start: Instant,
}

impl RequestTimer {
    /// Start timing a request to `route`.
    #[must_use]
    pub fn start(route: &'static str) -> Self {
        Self {
            route,
            start: Instant::now(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        histogram!(names::REQUEST_SECONDS, "route" => self.route)
            .record(self.start.elapsed().as_secs_f64());
    }
}
