//! Liveness and readiness probes.
//!
//! - `GET /health` answers `200 OK` whenever the process can serve HTTP.
//! - `GET /ready` answers `200` with the relay's room and session counts
//!   while accepting connections, `503` before the listener is bound and
//!   once shutdown has started.
//!
//! `/metrics` is served separately by `metrics-exporter-prometheus`.

use crate::relay::SignalingRelay;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Readiness flag shared between `main` and the probe handlers.
#[derive(Debug, Default)]
pub struct HealthState {
    ready: AtomicBool,
}

impl HealthState {
    /// Starts not ready.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct ProbeState {
    health: Arc<HealthState>,
    relay: Arc<SignalingRelay>,
}

/// Body of `GET /ready`.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Readiness {
    pub ready: bool,
    pub rooms: usize,
    pub sessions: usize,
}

/// Router serving `/health` and `/ready`.
pub fn health_router(health: Arc<HealthState>, relay: Arc<SignalingRelay>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(ProbeState { health, relay })
}

async fn liveness_handler() -> &'static str {
    "OK"
}

async fn readiness_handler(State(state): State<ProbeState>) -> (StatusCode, Json<Readiness>) {
    let stats = state.relay.registry().stats();
    let body = Readiness {
        ready: state.health.is_ready(),
        rooms: stats.rooms,
        sessions: state.relay.session_count(),
    };
    let status = if body.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}
