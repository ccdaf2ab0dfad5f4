use std::net::SocketAddr;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking lifecycle transitions attempted.
/// Labels: action, outcome (ok | denied | error).
pub const BOOKING_TRANSITIONS_TOTAL: &str = "bunkd_booking_transitions_total";

/// Counter: approval notifications by outcome (sent | failed | dropped).
pub const APPROVAL_NOTIFICATIONS_TOTAL: &str = "bunkd_approval_notifications_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "bunkd_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bunkd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bunkd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Structured logging, level from `RUST_LOG`.
pub fn init_logging() {
    tracing_subscriber::fmt::init();
}

/// Count one lifecycle transition attempt, classifying its result.
pub(crate) fn track_transition<T>(action: &'static str, res: &Result<T, EngineError>) {
    let outcome = match res {
        Ok(_) => "ok",
        Err(e) if e.is_policy_violation() => "denied",
        Err(_) => "error",
    };
    metrics::counter!(BOOKING_TRANSITIONS_TOTAL, "action" => action, "outcome" => outcome)
        .increment(1);
}

pub(crate) fn record_notification(outcome: &'static str) {
    metrics::counter!(APPROVAL_NOTIFICATIONS_TOTAL, "outcome" => outcome).increment(1);
}
