//! Prometheus scrape endpoint.

use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

/// Handler for `GET /metrics`.
///
/// Renders every `room_*` metric in Prometheus text format, for example:
///
/// ```text
/// # TYPE room_signaling_requests_total counter
/// room_signaling_requests_total{method="produce",status="success"} 12
/// ```
#[tracing::instrument(skip_all, name = "room.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
