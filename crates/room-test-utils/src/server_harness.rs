//! Test server harness for E2E testing
//!
//! Provides `TestRoomServer` for spawning real room service instances in tests.

use room_service::actors::{ActorMetrics, RegistrySettings, RoomRegistryHandle};
use room_service::config::Config;
use room_service::media::{LocalMediaEngine, TransportOptions, WorkerSettings};
use room_service::observability::{detached_metrics_handle, HealthState};
use room_service::routes::{self, AppState};
use room_service::workers::WorkerPool;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the room service in E2E tests.
///
/// The server runs on the in-process media engine; `engine()` exposes it for
/// fault injection.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> anyhow::Result<()> {
///     let server = TestRoomServer::spawn().await?;
///     let mut socket = TestSocket::connect(&server.ws_url()).await?;
///     let body = socket.request("joinRoom", json!({"roomId": "r1"})).await?;
///     assert_eq!(body["success"], true);
///     Ok(())
/// }
/// ```
pub struct TestRoomServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    engine: LocalMediaEngine,
    _handle: JoinHandle<()>,
}

impl TestRoomServer {
    /// Spawn a server with two workers and default settings.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(&[]).await
    }

    /// Spawn a server with configuration overrides, e.g.
    /// `[("ROOM_SERVICE_EMPTY_ROOM_GRACE_SECONDS", "1")]`.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    /// - Report ready
    pub async fn spawn_with(overrides: &[(&str, &str)]) -> Result<Self, anyhow::Error> {
        let mut vars: HashMap<String, String> = [
            ("ROOM_SERVICE_BIND_ADDRESS", "127.0.0.1:0"),
            ("ROOM_SERVICE_ID", "room-service-test"),
            ("ROOM_SERVICE_NUM_WORKERS", "2"),
            ("ROOM_SERVICE_WORKER_RESPAWN_DELAY_MS", "50"),
            ("ROOM_SERVICE_ANNOUNCED_IP", "127.0.0.1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (key, value) in overrides {
            vars.insert((*key).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let engine = LocalMediaEngine::new();
        let workers = WorkerPool::start(
            Arc::new(engine.clone()),
            WorkerSettings {
                rtc_min_port: config.rtc_min_port,
                rtc_max_port: config.rtc_max_port,
            },
            config.num_workers,
            config.worker_respawn_delay,
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start workers: {}", e))?;

        let metrics = ActorMetrics::new();
        let registry = RoomRegistryHandle::new(
            workers.clone(),
            RegistrySettings {
                empty_room_grace: config.empty_room_grace,
                transport_options: TransportOptions {
                    announced_ip: config.announced_ip.clone(),
                },
            },
            Arc::clone(&metrics),
        );

        let health = Arc::new(HealthState::new());
        health.set_ready();

        let state = Arc::new(AppState {
            registry,
            workers,
            config,
            health,
            metrics,
            shutdown: tokio_util::sync::CancellationToken::new(),
        });

        let metrics_handle = detached_metrics_handle()
            .map_err(|e| anyhow::anyhow!("Failed to build metrics handle: {}", e))?;
        let app = routes::build_routes(Arc::clone(&state), metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            state,
            engine,
            _handle: handle,
        })
    }

    /// Base HTTP URL, e.g. `http://127.0.0.1:41234`.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Signaling WebSocket URL.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shared application state, for inspecting the registry and pool.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// The media engine behind the worker pool.
    pub fn engine(&self) -> &LocalMediaEngine {
        &self.engine
    }

    /// Number of rooms currently held by the registry.
    pub async fn room_count(&self) -> usize {
        self.state
            .registry
            .status()
            .await
            .map(|status| status.rooms)
            .unwrap_or(0)
    }
}

impl Drop for TestRoomServer {
    fn drop(&mut self) {
        self.state.shutdown.cancel();
        self.state.registry.cancel();
        self._handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_spawns_and_reports_health() -> Result<(), anyhow::Error> {
        let server = TestRoomServer::spawn().await?;
        assert!(server.url().starts_with("http://127.0.0.1:"));
        assert!(server.ws_url().ends_with("/ws"));
        assert!(server.addr().ip().is_loopback());
        assert_eq!(server.state().workers.worker_count().await, 2);
        assert_eq!(server.room_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_overrides_apply() -> Result<(), anyhow::Error> {
        let server = TestRoomServer::spawn_with(&[
            ("ROOM_SERVICE_NUM_WORKERS", "1"),
            ("ROOM_SERVICE_EMPTY_ROOM_GRACE_SECONDS", "1"),
        ])
        .await?;
        assert_eq!(server.config().num_workers, 1);
        assert_eq!(
            server.config().empty_room_grace,
            std::time::Duration::from_secs(1)
        );
        assert_eq!(server.engine().live_worker_ids().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_multiple_servers_different_ports() -> Result<(), anyhow::Error> {
        let server1 = TestRoomServer::spawn().await?;
        let server2 = TestRoomServer::spawn().await?;
        assert_ne!(server1.addr(), server2.addr());
        Ok(())
    }
}
