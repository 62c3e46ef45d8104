//! Relay connection.
//!
//! [`MeshSession::connect`] opens the relay WebSocket, spawns the
//! orchestrator and a pump task between the two. The pump encodes outbound
//! [`ClientEvent`]s, decodes inbound frames into [`ServerEvent`]s for the
//! orchestrator, and reports [`MeshEvent::SignalingLost`] when the socket
//! closes.
//!
//! [`ServerEvent`]: signaling_protocol::ServerEvent

use crate::config::MeshConfig;
use crate::errors::MeshError;
use crate::media::MediaStack;
use crate::orchestrator::{MeshEvent, MeshHandle, MeshOrchestrator};
use futures::{SinkExt, StreamExt};
use signaling_protocol::codec::{decode_server, encode_client, MAX_FRAME_BYTES};
use signaling_protocol::ice::{IceServer, IceServersResponse};
use signaling_protocol::ClientEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Timeout for the ICE server lookup.
const ICE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Fetch STUN/TURN endpoints from the relay's `/api/ice-servers`.
///
/// # Errors
///
/// Returns `MeshError::IceServers` if the request fails, the relay answers
/// with a non-success status, or the body is not an endpoint list.
#[instrument(skip_all, name = "mesh.ice")]
pub async fn fetch_ice_servers(http_base_url: &str) -> Result<Vec<IceServer>, MeshError> {
    let url = format!("{}/api/ice-servers", http_base_url.trim_end_matches('/'));

    let client = reqwest::Client::builder()
        .timeout(ICE_LOOKUP_TIMEOUT)
        .build()
        .map_err(|e| MeshError::IceServers(format!("client build failed: {e}")))?;

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| MeshError::IceServers(format!("request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(MeshError::IceServers(format!("relay returned {status}")));
    }

    let body: IceServersResponse = response
        .json()
        .await
        .map_err(|e| MeshError::IceServers(format!("invalid response: {e}")))?;

    debug!(target: "mesh.ice", count = body.ice_servers.len(), "Fetched ICE servers");
    Ok(body.ice_servers)
}

/// A live connection to the relay plus the orchestrator driving it.
pub struct MeshSession {
    handle: MeshHandle,
    events: mpsc::UnboundedReceiver<MeshEvent>,
    orchestrator_task: JoinHandle<()>,
    pump_task: JoinHandle<()>,
}

impl MeshSession {
    /// Connect to `config.relay_url` and start the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::Signaling` if the WebSocket cannot be opened.
    pub async fn connect(
        config: MeshConfig,
        media: Arc<dyn MediaStack>,
        ice_servers: Vec<IceServer>,
    ) -> Result<Self, MeshError> {
        let (socket, _) = connect_async(config.relay_url.as_str())
            .await
            .map_err(|e| {
                MeshError::Signaling(format!("connect to {} failed: {e}", config.relay_url))
            })?;
        info!(target: "mesh.signaling", url = %config.relay_url, "Connected to relay");

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (handle, events, orchestrator_task) = MeshOrchestrator::spawn(
            config,
            media,
            ice_servers,
            outbound,
            CancellationToken::new(),
        );

        let pump = SignalingPump {
            socket,
            outbound: outbound_rx,
            mesh: handle.clone(),
            cancel_token: handle.child_token(),
        };
        let pump_task = tokio::spawn(pump.run());

        Ok(Self {
            handle,
            events,
            orchestrator_task,
            pump_task,
        })
    }

    #[must_use]
    pub fn handle(&self) -> &MeshHandle {
        &self.handle
    }

    /// Next event for the application. `None` once the orchestrator stops.
    pub async fn next_event(&mut self) -> Option<MeshEvent> {
        self.events.recv().await
    }

    /// Close every link and the relay connection, then wait for both tasks.
    pub async fn shutdown(self) {
        self.handle.cancel();
        let _ = self.orchestrator_task.await;
        let _ = self.pump_task.await;
    }
}

struct SignalingPump {
    socket: RelaySocket,
    outbound: mpsc::UnboundedReceiver<ClientEvent>,
    mesh: MeshHandle,
    cancel_token: CancellationToken,
}

impl SignalingPump {
    #[instrument(skip_all, name = "mesh.signaling")]
    async fn run(self) {
        let Self {
            socket,
            mut outbound,
            mesh,
            cancel_token,
        } = self;
        let (mut sink, mut stream) = socket.split();

        let lost = loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break false;
                }

                Some(event) = outbound.recv() => {
                    let text = match encode_client(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(
                                target: "mesh.signaling",
                                event = event.name(),
                                error = %e,
                                "Failed to encode event"
                            );
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        warn!(target: "mesh.signaling", error = %e, "Relay write failed");
                        break true;
                    }
                }

                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            match decode_server(&text, MAX_FRAME_BYTES) {
                                Ok(event) => {
                                    if mesh.deliver(event).await.is_err() {
                                        break false;
                                    }
                                }
                                Err(e) => {
                                    warn!(
                                        target: "mesh.signaling",
                                        error = %e,
                                        "Undecodable relay frame"
                                    );
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!(target: "mesh.signaling", "Relay closed the connection");
                            break true;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(target: "mesh.signaling", error = %e, "Relay read failed");
                            break true;
                        }
                    }
                }
            }
        };

        if lost {
            let _ = mesh.signaling_lost().await;
        }
        debug!(target: "mesh.signaling", "Signaling pump stopped");
    }
}
