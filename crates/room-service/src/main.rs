//! Huddle Room Service
//!
//! Multi-party SFU signaling server.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment and initialize tracing
//! 2. Initialize Prometheus metrics recorder
//! 3. Start the media worker pool (failure to spawn any worker is fatal)
//! 4. Start the room registry actor
//! 5. Bind the HTTP listener and mark the service ready
//! 6. Serve until Ctrl+C or SIGTERM, then drain

#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use room_service::actors::{ActorMetrics, RegistrySettings, RoomRegistryHandle};
use room_service::config::{Config, LogFormat};
use room_service::media::{LocalMediaEngine, TransportOptions, WorkerSettings};
use room_service::observability::{init_metrics_recorder, HealthState};
use room_service::routes::{build_routes, AppState};
use room_service::workers::WorkerPool;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Upper bound on draining rooms at shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

fn init_tracing(format: LogFormat) {
    let json = format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_service=debug,tower_http=debug".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match Config::from_env() {
        Ok(config) => {
            init_tracing(config.log_format);
            config
        }
        Err(e) => {
            init_tracing(LogFormat::Text);
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    info!(
        service_id = %config.service_id,
        bind_address = %config.bind_address,
        num_workers = config.num_workers,
        empty_room_grace_secs = config.empty_room_grace.as_secs(),
        heartbeat_interval_secs = config.heartbeat_interval.as_secs(),
        "Starting Room Service"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    info!("Starting media worker pool...");
    let pool = WorkerPool::start(
        Arc::new(LocalMediaEngine::new()),
        WorkerSettings {
            rtc_min_port: config.rtc_min_port,
            rtc_max_port: config.rtc_max_port,
        },
        config.num_workers,
        config.worker_respawn_delay,
    )
    .await
    .map_err(|e| {
        error!(error = %e, "Failed to start media worker pool");
        e
    })?;

    let actor_metrics = ActorMetrics::new();
    let registry = RoomRegistryHandle::new(
        pool.clone(),
        RegistrySettings {
            empty_room_grace: config.empty_room_grace,
            transport_options: TransportOptions {
                announced_ip: config.announced_ip.clone(),
            },
        },
        Arc::clone(&actor_metrics),
    );
    info!("Room registry started");

    let shutdown_token = CancellationToken::new();
    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState {
        registry: registry.clone(),
        workers: pool.clone(),
        config,
        health: Arc::clone(&health_state),
        metrics: actor_metrics,
        shutdown: shutdown_token.clone(),
    });
    let app = build_routes(state, prometheus_handle);

    // Bind listener before marking ready so bind errors fail startup
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %bind_address, "Failed to bind listener");
            e
        })?;
    info!(addr = %bind_address, "Listening");
    health_state.set_ready();

    let server_token = shutdown_token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, initiating graceful shutdown...");
            // Mark as not ready immediately so load balancers stop routing here
            health_state.set_not_ready();
            // Close open signaling sockets so the server can finish draining
            server_token.cancel();
        })
        .await
        .map_err(|e| {
            error!(error = %e, "Server failed");
            e
        })?;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, registry.shutdown()).await {
        Ok(Ok(())) => info!("Room registry drained"),
        Ok(Err(e)) => warn!(error = %e, "Room registry shutdown error"),
        Err(_) => {
            warn!("Room registry did not drain in time");
            registry.cancel();
        }
    }
    shutdown_token.cancel();
    pool.close().await;

    info!("Room Service shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. Without them the service
/// cannot shut down gracefully.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
