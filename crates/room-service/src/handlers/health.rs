//! Health check handlers.
//!
//! - `/health`: liveness plus a summary of pool and room counts
//! - `/ready`: readiness probe; 503 until startup completes and again once
//!   shutdown begins

use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    /// Live media workers.
    pub workers: usize,
    pub rooms: usize,
    pub total_peers: usize,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
}

/// Liveness handler.
///
/// Answers as long as the process runs. The registry count falls back to
/// the gauge value while the registry is draining.
#[tracing::instrument(skip_all, name = "room.health.liveness")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let workers = state.workers.worker_count().await;
    let rooms = match state.registry.status().await {
        Ok(status) => status.rooms,
        Err(_) => state.metrics.room_count(),
    };

    Json(HealthResponse {
        status: "ok",
        workers,
        rooms,
        total_peers: state.metrics.peer_count(),
    })
}

/// Readiness handler.
#[tracing::instrument(skip_all, name = "room.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.health.is_ready() {
        (StatusCode::OK, Json(ReadinessResponse { status: "ready" }))
    } else {
        tracing::debug!(target: "room.health", "Readiness check: not ready");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
            }),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::routes::tests::test_state;

    #[tokio::test]
    async fn test_health_reports_pool_and_rooms() {
        let state = test_state(2).await;
        state
            .registry
            .get_or_create(common::RoomId::from("r1"))
            .await
            .unwrap();

        let Json(body) = health_check(State(Arc::clone(&state))).await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.workers, 2);
        assert_eq!(body.rooms, 1);
        assert_eq!(body.total_peers, 0);

        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("totalPeers").is_some());
    }

    #[tokio::test]
    async fn test_readiness_follows_health_state() {
        let state = test_state(1).await;

        let response = readiness_check(State(Arc::clone(&state)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.health.set_ready();
        let response = readiness_check(State(Arc::clone(&state)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);

        state.health.set_not_ready();
        let response = readiness_check(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
