//! Huddle Server
//!
//! Real-time group-communication server.
//!
//! # Servers
//!
//! - TCP control channel (default: 0.0.0.0:53530)
//! - UDP video relay (default: 0.0.0.0:53531)
//! - UDP audio relay (default: 0.0.0.0:53532)
//! - HTTP server for health and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Bind control listener, media sockets, and health listener (fail fast)
//! 4. Spawn room, control listener, media relays, and upload reaper
//! 5. Start health HTTP server and mark ready
//! 6. Wait for shutdown signal

#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use huddle_server::config::Config;
use huddle_server::observability::metrics::init_metrics_recorder;
use huddle_server::observability::{health_router, HealthState};
use huddle_server::server::Server;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Upper bound on waiting for tasks after cancellation.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle_server=debug,huddle_protocol=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Huddle server");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        control_bind_address = %config.control_bind_address,
        video_bind_address = %config.video_bind_address,
        audio_bind_address = %config.audio_bind_address,
        health_bind_address = %config.health_bind_address,
        data_dir = %config.data_dir.display(),
        transfer_idle_timeout_seconds = config.transfer_idle_timeout_seconds,
        "Configuration loaded successfully"
    );

    // This must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());
    let health_addr = config.health_bind_address;

    // Bind everything BEFORE spawning to fail fast on bind errors
    let server = Server::bind(config).await.map_err(|e| {
        error!(error = %e, "Failed to bind server endpoints");
        e
    })?;

    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;
    info!(addr = %health_addr, "Health server bound successfully");

    let shutdown_token = CancellationToken::new();
    let running = server.start(&shutdown_token);

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    let health_shutdown_token = shutdown_token.child_token();
    let health_task = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Every listener is bound and serving
    health_state.set_ready();
    info!(
        control = %running.local_addrs().control,
        video = %running.local_addrs().video,
        audio = %running.local_addrs().audio,
        "Huddle server ready - press Ctrl+C to shutdown"
    );

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so traffic stops arriving
    health_state.set_not_ready();

    shutdown_token.cancel();

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, running.join())
        .await
        .is_err()
    {
        warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Server tasks did not stop in time"
        );
    }
    if let Err(e) = health_task.await {
        warn!(error = %e, "Health server task ended abnormally");
    }

    info!("Huddle server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
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
