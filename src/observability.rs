use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: method, route, status.
pub const REQUESTS_TOTAL: &str = "silbo_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: method, route.
pub const REQUEST_DURATION_SECONDS: &str = "silbo_request_duration_seconds";

/// Counter: reservation writes rejected for overlapping an existing reservation.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "silbo_reservation_conflicts_total";

/// Counter: deletes refused because dependents remain. Labels: reason.
pub const DELETES_BLOCKED_TOTAL: &str = "silbo_deletes_blocked_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "silbo_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "silbo_wal_flush_batch_size";

/// Gauge: live records. Labels: kind.
pub const RECORDS: &str = "silbo_records";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Collapse a status code to its class for low-cardinality labels, e.g. `4xx`.
pub fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}
