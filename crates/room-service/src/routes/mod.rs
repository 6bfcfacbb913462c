//! HTTP routes for the room service.
//!
//! Defines the Axum router and application state.

use crate::actors::{ActorMetrics, RoomRegistryHandle};
use crate::config::Config;
use crate::handlers;
use crate::observability::HealthState;
use crate::signaling;
use crate::workers::WorkerPool;
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: RoomRegistryHandle,

    pub workers: WorkerPool,

    pub config: Config,

    pub health: Arc<HealthState>,

    pub metrics: Arc<ActorMetrics>,

    /// Cancelled when the service begins shutting down; parent of every
    /// connection writer's token.
    pub shutdown: CancellationToken,
}

/// Build the application routes.
///
/// - `/health` - liveness with worker, room and peer counts
/// - `/ready` - readiness probe
/// - `/metrics` - Prometheus metrics
/// - `/api/rooms/:id` - room snapshot
/// - `/ws` - signaling WebSocket
/// - TraceLayer for request logging
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let app_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/api/rooms/:id", get(handlers::get_room))
        .route("/ws", get(signaling::ws_handler))
        .with_state(state);

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    app_routes
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;
    use crate::actors::RegistrySettings;
    use crate::media::{LocalMediaEngine, TransportOptions, WorkerSettings};
    use crate::observability::detached_metrics_handle;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::collections::HashMap;
    use std::time::Duration;
    use tower::ServiceExt;

    /// State backed by the in-process media engine with `workers` workers.
    pub(crate) async fn test_state(workers: usize) -> Arc<AppState> {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        let pool = WorkerPool::start(
            Arc::new(LocalMediaEngine::new()),
            WorkerSettings {
                rtc_min_port: config.rtc_min_port,
                rtc_max_port: config.rtc_max_port,
            },
            workers,
            Duration::from_millis(100),
        )
        .await
        .unwrap();
        let metrics = ActorMetrics::new();
        let registry = RoomRegistryHandle::new(
            pool.clone(),
            RegistrySettings {
                empty_room_grace: config.empty_room_grace,
                transport_options: TransportOptions {
                    announced_ip: config.announced_ip.clone(),
                },
            },
            Arc::clone(&metrics),
        );

        Arc::new(AppState {
            registry,
            workers: pool,
            config,
            health: Arc::new(HealthState::new()),
            metrics,
            shutdown: CancellationToken::new(),
        })
    }

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[tokio::test]
    async fn test_routes_wired() {
        let state = test_state(1).await;
        let app = build_routes(state, detached_metrics_handle().unwrap());

        for (uri, expected) in [
            ("/health", StatusCode::OK),
            ("/ready", StatusCode::SERVICE_UNAVAILABLE),
            ("/metrics", StatusCode::OK),
            ("/api/rooms/missing", StatusCode::NOT_FOUND),
            ("/nope", StatusCode::NOT_FOUND),
        ] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), expected, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let state = test_state(1).await;
        let app = build_routes(state, detached_metrics_handle().unwrap());

        let response = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
