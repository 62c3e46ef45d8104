//! HTTP surface of the relay.
//!
//! - `GET /ws` - WebSocket upgrade for the signaling channel
//! - `GET /api/ice-servers` - STUN/TURN endpoints for browsers
//! - `GET /health`, `GET /ready` - probes

use crate::errors::RelayError;
use crate::ice::IceServerSource;
use crate::observability::{health_router, HealthState};
use crate::relay::SignalingRelay;
use crate::session::SessionActor;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use signaling_protocol::ice::IceServersResponse;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Headroom above the largest accepted frame before the WebSocket layer
/// refuses a message outright. Frames between the two limits reach the
/// relay and are answered with a `MALFORMED_MESSAGE` error.
const WS_MESSAGE_HEADROOM: usize = 4;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<SignalingRelay>,
    pub ice: Arc<dyn IceServerSource>,
    pub health: Arc<HealthState>,
    /// Cancelled when the relay begins shutting down.
    pub shutdown: CancellationToken,
    pub max_message_bytes: usize,
}

/// Build the relay's router.
pub fn build_router(state: AppState) -> Router {
    let probes = health_router(Arc::clone(&state.health), Arc::clone(&state.relay));

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/ice-servers", get(ice_servers_handler))
        .with_state(state)
        .merge(probes)
        .layer(TraceLayer::new_for_http())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let max_message_size = state
        .max_message_bytes
        .saturating_mul(WS_MESSAGE_HEADROOM);
    let relay = Arc::clone(&state.relay);
    let cancel_token = state.shutdown.child_token();

    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| async move {
            let _ = SessionActor::spawn(socket, relay, cancel_token).await;
        })
}

async fn ice_servers_handler(State(state): State<AppState>) -> Response {
    match state.ice.ice_servers().await {
        Ok(ice_servers) => Json(IceServersResponse { ice_servers }).into_response(),
        Err(e) => ice_error_response(&e),
    }
}

fn ice_error_response(e: &RelayError) -> Response {
    error!(target: "relay.ice", error = %e, "Serving ICE servers failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": e.client_message() })),
    )
        .into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ice::mock::MockIceServers;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use signaling_protocol::ice::IceServer;
    use tower::util::ServiceExt;

    fn state(ice: Arc<dyn IceServerSource>) -> AppState {
        AppState {
            relay: Arc::new(SignalingRelay::new(10, 64 * 1024)),
            ice,
            health: Arc::new(HealthState::new()),
            shutdown: CancellationToken::new(),
            max_message_bytes: 64 * 1024,
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_ice_servers_success() {
        let mock = Arc::new(MockIceServers::returning(vec![IceServer::anonymous(vec![
            "stun:a:3478".to_string(),
        ])]));
        let app = build_router(state(mock.clone()));

        let (status, body) = get_json(app, "/api/ice-servers").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({"iceServers": [{"urls": ["stun:a:3478"]}]})
        );
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_ice_servers_failure_is_500_with_fixed_message() {
        let app = build_router(state(Arc::new(MockIceServers::failing())));

        let (status, body) = get_json(app, "/api/ice-servers").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            serde_json::json!({"error": "Failed to fetch ICE servers"})
        );
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let app = build_router(state(Arc::new(MockIceServers::failing())));
        let response = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
