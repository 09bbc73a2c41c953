//! Prometheus metrics for the notification pipeline.
//!
//! Exposes a standard `/metrics` endpoint that Prometheus can scrape.
//! Metrics live in the global default registry and are registered once per
//! process, so several servers/buses in one test binary share them.

use once_cell::sync::Lazy;
use prometheus::{
    opts, register_int_counter, register_int_counter_vec, register_int_gauge, Encoder,
    IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

pub struct PipelineMetrics {
    pub notifications_created: IntCounter,
    /// label `path`: "local" (same-process push) or "bus" (fanned in from another process)
    pub deliveries: IntCounterVec,
    pub bus_reconnects: IntCounter,
    pub bus_malformed: IntCounter,
    pub connections_active: IntGauge,
}

pub static METRICS: Lazy<PipelineMetrics> = Lazy::new(|| PipelineMetrics {
    notifications_created: register_int_counter!(opts!(
        "notifier_notifications_created_total",
        "Notifications persisted by the dispatcher"
    ))
    .expect("failed to register notifier_notifications_created_total"),
    deliveries: register_int_counter_vec!(
        opts!(
            "notifier_deliveries_total",
            "Notification frames queued to sockets"
        ),
        &["path"]
    )
    .expect("failed to register notifier_deliveries_total"),
    bus_reconnects: register_int_counter!(opts!(
        "notifier_bus_reconnects_total",
        "Bus listener reconnect attempts after a failure"
    ))
    .expect("failed to register notifier_bus_reconnects_total"),
    bus_malformed: register_int_counter!(opts!(
        "notifier_bus_malformed_total",
        "Bus payloads dropped because they did not parse"
    ))
    .expect("failed to register notifier_bus_malformed_total"),
    connections_active: register_int_gauge!(opts!(
        "notifier_connections_active",
        "Authenticated realtime connections on this process"
    ))
    .expect("failed to register notifier_connections_active"),
});

/// Encode all registered metrics as Prometheus text format.
/// Called by the `/metrics` HTTP handler.
pub fn encode_metrics() -> String {
    Lazy::force(&METRICS);
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────
