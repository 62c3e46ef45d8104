//! Per-connection session task.
//!
//! Each WebSocket connection gets one `SessionActor`:
//! - Registers with the [`SignalingRelay`] and receives a session id
//! - Reads inbound text frames and hands them to the relay in arrival order
//! - Drains its bounded outbox to the socket, one writer per connection
//! - Is evicted through its token when it stops draining fast enough
//! - Leaves its room and unregisters when the socket closes or shutdown begins
//!
//! # Lifecycle
//!
//! 1. Spawned by the `/ws` upgrade handler
//! 2. Runs until the peer closes, the socket errors, or the token is cancelled
//!    (relay shutdown or eviction)
//! 3. Always ends with [`SignalingRelay::disconnect`], so the rest of the
//!    room is told the participant left

use crate::relay::{Outbox, Session, SignalingRelay};
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use signaling_protocol::codec::encode_server;
use signaling_protocol::events::ServerEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Events queued per session before it counts as a slow consumer.
pub const SESSION_OUTBOX_BUFFER: usize = 256;

/// Upper bound on sending the close frame to a peer that is not reading.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a session loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Peer sent a close frame or the stream ended.
    Closed,
    /// Reading or writing the socket failed.
    TransportError,
    /// Relay shutdown, or eviction after the outbox filled up.
    Cancelled,
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    relay: Arc<SignalingRelay>,
    session: Session,
    outbox: mpsc::Receiver<ServerEvent>,
    sink: SplitSink<WebSocket, Message>,
    stream: SplitStream<WebSocket>,
    cancel_token: CancellationToken,
}

impl SessionActor {
    /// Register `socket` with the relay and spawn its session loop.
    ///
    /// `cancel_token` should be a child of the relay's shutdown token; the
    /// relay cancels it to evict the session.
    pub fn spawn(
        socket: WebSocket,
        relay: Arc<SignalingRelay>,
        cancel_token: CancellationToken,
    ) -> JoinHandle<SessionEnd> {
        let (tx, outbox) = mpsc::channel(SESSION_OUTBOX_BUFFER);
        let session = relay.connect(Outbox::new(tx, cancel_token.clone()));
        let (sink, stream) = socket.split();

        let actor = Self {
            relay,
            session,
            outbox,
            sink,
            stream,
            cancel_token,
        };

        tokio::spawn(actor.run())
    }

    #[instrument(skip_all, name = "relay.session", fields(session_id = %self.session.id))]
    async fn run(mut self) -> SessionEnd {
        debug!(target: "relay.session", "Session loop started");
        let cancel_token = self.cancel_token.clone();

        let end = loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    let close = self.sink.send(Message::Close(None));
                    let _ = tokio::time::timeout(CLOSE_FRAME_TIMEOUT, close).await;
                    break SessionEnd::Cancelled;
                }

                Some(event) = self.outbox.recv() => {
                    // A peer that stops reading stalls the write; eviction
                    // must still get through.
                    tokio::select! {
                        result = self.write(&event) => {
                            if let Err(end) = result {
                                break end;
                            }
                        }
                        () = cancel_token.cancelled() => break SessionEnd::Cancelled,
                    }
                }

                inbound = self.stream.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            self.relay.handle_frame(&mut self.session, &text);
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            // Some clients send JSON as binary frames.
                            self.relay.handle_binary_frame(&mut self.session, &bytes);
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                        Some(Ok(Message::Close(_))) | None => break SessionEnd::Closed,
                        Some(Err(e)) => {
                            warn!(target: "relay.session", error = %e, "Socket read failed");
                            break SessionEnd::TransportError;
                        }
                    }
                }
            }
        };

        self.relay.disconnect(&mut self.session);

        // Anything queued after the loop ended has nowhere to go.
        self.outbox.close();
        let mut discarded = 0usize;
        while self.outbox.try_recv().is_ok() {
            discarded += 1;
        }

        info!(
            target: "relay.session",
            end = ?end,
            discarded,
            "Session loop exiting"
        );
        end
    }

    async fn write(&mut self, event: &ServerEvent) -> Result<(), SessionEnd> {
        let text = match encode_server(event) {
            Ok(text) => text,
            Err(e) => {
                error!(
                    target: "relay.session",
                    event = event.name(),
                    error = %e,
                    "Failed to encode outbound event"
                );
                return Ok(());
            }
        };

        self.sink.send(Message::Text(text)).await.map_err(|e| {
            warn!(target: "relay.session", error = %e, "Socket write failed");
            SessionEnd::TransportError
        })
    }
}
