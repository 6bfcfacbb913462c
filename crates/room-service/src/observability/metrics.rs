//! Metrics definitions for the room service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `room_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: 7 request methods
//! - `status`: success, error
//! - `error_type`: bounded by `RoomError::error_type_label`
//! - `actor_type`: registry, room, connection

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

const SIGNALING_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
];

fn builder() -> Result<PrometheusBuilder, String> {
    PrometheusBuilder::new()
        // Signaling latency buckets - in-process media engine calls (p99 < 100ms)
        .set_buckets_for_metric(
            Matcher::Prefix("room_signaling".to_string()),
            SIGNALING_BUCKETS,
        )
        .map_err(|e| format!("Failed to set signaling latency buckets: {e}"))
}

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    builder()?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Build a handle without installing a global recorder.
///
/// Used when several servers share one process (tests); rendering the
/// handle yields an empty exposition.
///
/// # Errors
///
/// Returns error if the bucket configuration is rejected.
pub fn detached_metrics_handle() -> Result<PrometheusHandle, String> {
    Ok(builder()?.build_recorder().handle())
}

// ============================================================================
// Gauges
// ============================================================================

/// Metric: `room_rooms_active`
pub fn set_rooms_active(count: usize) {
    // usize to f64 conversion is safe for realistic room counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("room_rooms_active").set(count as f64);
}

/// Metric: `room_peers_active`
pub fn set_peers_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("room_peers_active").set(count as f64);
}

/// Set the number of open signaling connections.
///
/// Metric: `room_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("room_connections_active").set(count as f64);
}

/// Set the number of live media workers in the pool.
///
/// Metric: `room_workers_alive`
pub fn set_workers_alive(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("room_workers_alive").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `room_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("room_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Signaling
// ============================================================================

/// Record one handled signaling request.
///
/// Metrics: `room_signaling_requests_total{method,status}` and
/// `room_signaling_request_duration_seconds{method}`
///
/// SLO target: p99 < 100ms
pub fn record_signaling_request(method: &str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "error" };
    counter!("room_signaling_requests_total",
        "method" => method.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!("room_signaling_request_duration_seconds", "method" => method.to_string())
        .record(duration.as_secs_f64());
}

/// Record error by category.
///
/// Metric: `room_errors_total`
/// Labels: `error_type`
pub fn record_error(error_type: &str) {
    counter!("room_errors_total", "error_type" => error_type.to_string()).increment(1);
}

/// Record an event dropped because a connection's outbound buffer was full.
///
/// Metric: `room_events_dropped_total`
pub fn record_event_dropped() {
    counter!("room_events_dropped_total").increment(1);
}

// ============================================================================
// Workers
// ============================================================================

/// Metric: `room_worker_deaths_total`
pub fn record_worker_death() {
    counter!("room_worker_deaths_total").increment(1);
}

/// Metric: `room_worker_respawn_failures_total`
pub fn record_worker_respawn_failure() {
    counter!("room_worker_respawn_failures_total").increment(1);
}

// ============================================================================
// Actors
// ============================================================================

/// Record an actor panic event.
///
/// Metric: `room_actor_panics_total`
/// Labels: `actor_type`
///
/// ALERT: Any non-zero value indicates a bug and should trigger investigation.
pub fn record_actor_panic(actor_type: &str) {
    counter!("room_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}
