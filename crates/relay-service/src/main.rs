//! Signaling Relay
//!
//! WebSocket relay for full-mesh rooms.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (JSON or human-readable)
//! 3. Initialize Prometheus metrics recorder
//! 4. Build the relay and the STUN/TURN endpoint source
//! 5. Bind the listener, mark ready, serve until a shutdown signal
//! 6. Mark not ready, cancel sessions, drain

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_service::config::Config;
use relay_service::ice::{IceServerSource, ProviderClient, StaticIceServers};
use relay_service::observability::{init_metrics_recorder, HealthState};
use relay_service::relay::SignalingRelay;
use relay_service::routes::{build_router, AppState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time given to session tasks to send close frames after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Config first: the log format is part of it.
    let config = Config::from_env()?;

    init_tracing(config.log_json);

    info!("Starting Signaling Relay");
    info!(
        bind_address = %config.bind_address,
        room_capacity = config.room_capacity,
        max_message_bytes = config.max_message_bytes,
        ice_provider = config.ice_provider.is_some(),
        ice_fallback_urls = config.ice_fallback_urls.len(),
        "Configuration loaded successfully"
    );

    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let relay = Arc::new(SignalingRelay::new(
        config.room_capacity,
        config.max_message_bytes,
    ));

    let ice: Arc<dyn IceServerSource> = match config.ice_provider.clone() {
        Some(provider) => {
            info!(
                url = %provider.url,
                channel = %provider.channel,
                "Using ICE credential provider"
            );
            Arc::new(ProviderClient::new(provider).map_err(|e| {
                error!(error = %e, "Failed to create ICE provider client");
                e
            })?)
        }
        None => {
            info!("No ICE credential provider configured, serving fallback list");
            Arc::new(StaticIceServers::from_urls(config.ice_fallback_urls.clone()))
        }
    };

    let health_state = Arc::new(HealthState::new());
    let shutdown_token = CancellationToken::new();

    let state = AppState {
        relay: Arc::clone(&relay),
        ice,
        health: Arc::clone(&health_state),
        shutdown: shutdown_token.clone(),
        max_message_bytes: config.max_message_bytes,
    };
    let app = build_router(state).merge(metrics_router(prometheus_handle));

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind listener");
        format!("Failed to bind {addr}: {e}")
    })?;
    info!(addr = %addr, "Listener bound successfully");

    let server_token = shutdown_token.clone();
    let server = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_token.cancelled().await;
            info!("HTTP server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "HTTP server failed");
        }
    });

    health_state.set_ready();
    info!(addr = %addr, "Signaling Relay running - press Ctrl+C to shutdown");

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so load balancers stop sending traffic
    health_state.set_not_ready();

    // Session tasks hold child tokens; cancelling closes every socket.
    shutdown_token.cancel();

    if tokio::time::timeout(SHUTDOWN_GRACE, server).await.is_err() {
        info!(
            sessions = relay.session_count(),
            "Shutdown grace period elapsed with sessions still open"
        );
    }

    info!("Signaling Relay shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "relay_service=debug,relay=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    )
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. Without them the relay
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
