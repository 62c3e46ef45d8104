//! `LinkWorker` - runs one link's media-stack calls in order.
//!
//! The orchestrator never awaits the media stack. It submits [`LinkOp`]s
//! here and continues; each result comes back on the shared completion
//! channel as a [`LinkCompletion`] tagged with this worker's epoch. Ops for
//! one link execute strictly one after another, so a candidate submitted
//! after a remote description is applied after it.
//!
//! The worker owns the connection's lifetime: cancelling it closes the
//! connection.

use super::{LinkCompletion, LinkEvent};
use crate::errors::MediaError;
use crate::media::{MediaConnection, MediaTrack};
use common::types::SessionId;
use signaling_protocol::negotiation::{IceCandidate, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// One media-stack call.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkOp {
    CreateOffer,
    CreateAnswer,
    ApplyRemoteDescription(SessionDescription),
    ApplyCandidate(IceCandidate),
    RestartTransport,
    ReplaceTrack(MediaTrack),
}

/// Handle to a `LinkWorker`.
#[derive(Debug, Clone)]
pub struct LinkWorkerHandle {
    sender: mpsc::UnboundedSender<LinkOp>,
    cancel_token: CancellationToken,
}

impl LinkWorkerHandle {
    /// Queue an op. Returns `false` if the worker has already stopped.
    pub fn submit(&self, op: LinkOp) -> bool {
        self.sender.send(op).is_ok()
    }

    /// Stop the worker and close its connection. Queued ops are dropped.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

pub struct LinkWorker {
    remote: SessionId,
    epoch: u64,
    connection: Arc<dyn MediaConnection>,
    receiver: mpsc::UnboundedReceiver<LinkOp>,
    completions: mpsc::UnboundedSender<LinkCompletion>,
    cancel_token: CancellationToken,
}

impl LinkWorker {
    pub fn spawn(
        remote: SessionId,
        epoch: u64,
        connection: Arc<dyn MediaConnection>,
        completions: mpsc::UnboundedSender<LinkCompletion>,
        cancel_token: CancellationToken,
    ) -> (LinkWorkerHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();

        let worker = Self {
            remote,
            epoch,
            connection,
            receiver,
            completions,
            cancel_token: cancel_token.clone(),
        };

        let task_handle = tokio::spawn(worker.run());

        (
            LinkWorkerHandle {
                sender,
                cancel_token,
            },
            task_handle,
        )
    }

    #[instrument(skip_all, name = "mesh.link", fields(remote = %self.remote, epoch = self.epoch))]
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => break,

                op = self.receiver.recv() => {
                    match op {
                        Some(op) => {
                            // An op in flight still runs to completion if
                            // cancelled meanwhile; its completion is stale.
                            self.execute(op).await;
                        }
                        None => break,
                    }
                }
            }
        }

        self.connection.close().await;
        debug!(target: "mesh.link", "Link worker stopped, connection closed");
    }

    async fn execute(&self, op: LinkOp) {
        match op {
            LinkOp::CreateOffer => match self.connection.create_offer().await {
                Ok(offer) => self.complete(LinkEvent::LocalOfferReady(offer)),
                Err(e) => self.complete(LinkEvent::LocalOfferFailed(e)),
            },
            LinkOp::CreateAnswer => match self.connection.create_answer().await {
                Ok(answer) => self.complete(LinkEvent::LocalAnswerReady(answer)),
                Err(e) => self.complete(LinkEvent::LocalAnswerFailed(e)),
            },
            LinkOp::ApplyRemoteDescription(description) => {
                match self.connection.set_remote_description(description).await {
                    Ok(()) => self.complete(LinkEvent::RemoteDescriptionApplied),
                    Err(e) => self.complete(LinkEvent::RemoteDescriptionFailed(e)),
                }
            }
            LinkOp::ApplyCandidate(candidate) => {
                if let Err(e) = self.connection.add_ice_candidate(candidate).await {
                    self.complete(LinkEvent::CandidateFailed(e));
                }
            }
            LinkOp::RestartTransport => {
                if let Err(e) = self.connection.restart_ice().await {
                    // The restart timer still bounds the wait.
                    self.log_failure("restart", &e);
                }
            }
            LinkOp::ReplaceTrack(track) => {
                if let Err(e) = self.connection.replace_outgoing_track(track).await {
                    self.log_failure("replace-track", &e);
                }
            }
        }
    }

    fn complete(&self, event: LinkEvent) {
        let _ = self.completions.send(LinkCompletion {
            remote: self.remote,
            epoch: self.epoch,
            event,
        });
    }

    fn log_failure(&self, op: &'static str, error: &MediaError) {
        warn!(
            target: "mesh.link",
            op = op,
            error = %error,
            "Media operation failed"
        );
    }
}
