//! Prometheus metrics collection for nodegate.
//!
//! Exposed on the HTTP status port at `/metrics`.
//!
//! - `nodegate_connections_total{protocol}` - Accepted connections
//! - `nodegate_rejections_total{protocol,reason}` - Callers turned away with a BUSY line
//! - `nodegate_autoblock_total{action}` - Auto-block bans and deny-list promotions
//! - `nodegate_dispatch_errors_total{error}` - Failed handoffs by error code
//! - `nodegate_sessions_active` - Sessions currently handed to a worker
//! - `nodegate_session_duration_seconds{protocol}` - Session lifetime histogram

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters (monotonic increasing)
// ========================================================================

/// Connections accepted by protocol.
pub static CONNECTIONS: OnceLock<IntCounterVec> = OnceLock::new();

/// Connections refused by protocol and reason.
pub static REJECTIONS: OnceLock<IntCounterVec> = OnceLock::new();

/// Auto-block escalations (`ban`) and deny-list promotions (`promote`).
pub static AUTOBLOCK_EVENTS: OnceLock<IntCounterVec> = OnceLock::new();

/// Dispatch failures by error code.
pub static DISPATCH_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Gauges and histograms
// ========================================================================

/// Sessions currently running.
pub static SESSIONS_ACTIVE: OnceLock<IntGauge> = OnceLock::new();

/// Session duration by protocol.
pub static SESSION_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at startup before any metrics are recorded. Until
/// then every `record_*` helper is a no-op.
pub fn init() {
    let r = registry();

    // Helper macro to register metric
    macro_rules! register {
        ($metric:ident, $init:expr) => {
            let m = $init.expect(concat!(stringify!($metric), " creation failed"));
            if let Err(e) = r.register(Box::new(m.clone())) {
                tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
            }
            let _ = $metric.set(m);
        };
    }

    register!(CONNECTIONS, IntCounterVec::new(Opts::new("nodegate_connections_total", "Accepted connections by protocol"), &["protocol"]));
    register!(REJECTIONS, IntCounterVec::new(Opts::new("nodegate_rejections_total", "Refused connections by protocol and reason"), &["protocol", "reason"]));
    register!(AUTOBLOCK_EVENTS, IntCounterVec::new(Opts::new("nodegate_autoblock_total", "Auto-block escalations and promotions"), &["action"]));
    register!(DISPATCH_ERRORS, IntCounterVec::new(Opts::new("nodegate_dispatch_errors_total", "Dispatch failures by error code"), &["error"]));
    register!(SESSIONS_ACTIVE, IntGauge::new("nodegate_sessions_active", "Sessions currently handed to a worker"));
    register!(SESSION_DURATION, HistogramVec::new(
        HistogramOpts::new("nodegate_session_duration_seconds", "Session lifetime by protocol")
            .buckets(vec![1.0, 10.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0, 14400.0]),
        &["protocol"]));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Helper functions for metric updates
// ============================================================================

/// Record an accepted connection.
#[inline]
pub fn record_connection(protocol: &str) {
    if let Some(c) = CONNECTIONS.get() {
        c.with_label_values(&[protocol]).inc();
    }
}

/// Record a refused connection.
#[inline]
pub fn record_rejection(protocol: &str, reason: &str) {
    if let Some(c) = REJECTIONS.get() {
        c.with_label_values(&[protocol, reason]).inc();
    }
}

/// Record an auto-block action (`ban` or `promote`).
#[inline]
pub fn record_autoblock(action: &str) {
    if let Some(c) = AUTOBLOCK_EVENTS.get() {
        c.with_label_values(&[action]).inc();
    }
}

/// Record a dispatch failure.
#[inline]
pub fn record_dispatch_error(error: &str) {
    if let Some(c) = DISPATCH_ERRORS.get() {
        c.with_label_values(&[error]).inc();
    }
}

/// Adjust the active session gauge.
#[inline]
pub fn add_active_sessions(delta: i64) {
    if let Some(g) = SESSIONS_ACTIVE.get() {
        g.add(delta);
    }
}

/// Record a finished session.
#[inline]
pub fn record_session(protocol: &str, duration_secs: f64) {
    if let Some(h) = SESSION_DURATION.get() {
        h.with_label_values(&[protocol]).observe(duration_secs);
    }
}
