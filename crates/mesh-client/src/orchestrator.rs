//! `MeshOrchestrator` - reconciles peer links with room membership.
//!
//! The orchestrator is the only owner of the link map. It consumes relay
//! events, application commands and link completions from one loop, so
//! creating and destroying links is serialized while each link's media
//! work runs concurrently in its own [`LinkWorker`].
//!
//! # Role Assignment
//!
//! - `existing-participants`: we are the newcomer, so we initiate toward
//!   every listed member.
//! - `participant-joined`: the newcomer will initiate toward us, so the
//!   link is created as an answerer and waits for the offer.
//!
//! A rebuilt link keeps its role: the rule that assigned it still holds.
//!
//! # Teardown
//!
//! `participant-left` closes the link unconditionally and remembers the id.
//! Offers, answers and candidates from a departed id are dropped, and so is
//! any completion tagged with an epoch that is no longer live.

use crate::config::MeshConfig;
use crate::errors::{MeshError, NegotiationError};
use crate::media::{ConnectionConfig, ConnectionEvents, MediaStack, MediaTrack};
use crate::peer::{
    LinkCompletion, LinkEffect, LinkEvent, LinkOp, LinkState, LinkWorker, LinkWorkerHandle,
    PeerLink, Role,
};
use common::types::{Identity, Presence, RoomCode, SessionId};
use signaling_protocol::events::{
    ErrorNotice, JoinRoom, OutgoingChat, OutgoingReaction, ParticipantSummary, RelayedCandidate,
    RelayedChat, RelayedDescription, RelayedHandRaise, RelayedPresence, RelayedReaction,
    TargetedCandidate, TargetedDescription,
};
use signaling_protocol::ice::IceServer;
use signaling_protocol::negotiation::{IceCandidate, SdpKind, SessionDescription};
use signaling_protocol::{ClientEvent, ServerEvent};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the orchestrator mailbox.
const MESH_CHANNEL_BUFFER: usize = 256;

/// What the orchestrator reports to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// Our join was accepted; these members were already present.
    RoomJoined {
        participants: Vec<ParticipantSummary>,
    },
    ParticipantJoined {
        id: SessionId,
        identity: Identity,
    },
    ParticipantLeft {
        id: SessionId,
    },
    /// Link to `remote` is usable.
    PeerConnected {
        remote: SessionId,
    },
    /// A media track from `remote` was handed to the renderer.
    RemoteTrack {
        remote: SessionId,
        track: MediaTrack,
    },
    /// Link to `remote` was torn down.
    PeerClosed {
        remote: SessionId,
    },
    /// Negotiation with `remote` failed. `rebuilding` says whether a fresh
    /// link has replaced it.
    PeerFailed {
        remote: SessionId,
        error: NegotiationError,
        rebuilding: bool,
    },
    Chat(RelayedChat),
    Reaction(RelayedReaction),
    HandRaised(RelayedHandRaise),
    PresenceChanged(RelayedPresence),
    /// Join rejected: the room is at capacity.
    RoomFull,
    /// The relay rejected a message.
    Rejected(ErrorNotice),
    /// The relay connection is gone; every link has been torn down.
    SignalingLost,
}

/// Point-in-time view of one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub remote: SessionId,
    pub role: Role,
    pub state: LinkState,
    pub epoch: u64,
    pub pending_candidates: usize,
}

/// Point-in-time view of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MeshSnapshot {
    /// Relay-assigned id, once `welcome` has arrived.
    pub local_id: Option<SessionId>,
    pub room: Option<RoomCode>,
    /// Live links ordered by remote id.
    pub links: Vec<LinkSnapshot>,
}

impl MeshSnapshot {
    #[must_use]
    pub fn link(&self, remote: SessionId) -> Option<&LinkSnapshot> {
        self.links.iter().find(|l| l.remote == remote)
    }
}

/// Messages the orchestrator handles.
#[derive(Debug)]
pub enum MeshMessage {
    /// An event from the relay.
    Signal(ServerEvent),
    /// The relay connection closed.
    SignalingLost,
    Join {
        room: RoomCode,
        identity: Identity,
    },
    Leave,
    Chat {
        message: String,
        /// `None` addresses the whole room.
        target: Option<SessionId>,
    },
    React {
        emoji: String,
    },
    RaiseHand,
    SetPresence(Presence),
    /// Swap the outgoing video track on every live link. Responds with the
    /// number of links it was queued on.
    ReplaceOutgoingTrack {
        track: MediaTrack,
        respond_to: oneshot::Sender<usize>,
    },
    Snapshot {
        respond_to: oneshot::Sender<MeshSnapshot>,
    },
}

/// Handle to a `MeshOrchestrator`.
#[derive(Clone)]
pub struct MeshHandle {
    sender: mpsc::Sender<MeshMessage>,
    cancel_token: CancellationToken,
}

impl MeshHandle {
    /// Feed one relay event to the orchestrator.
    pub async fn deliver(&self, event: ServerEvent) -> Result<(), MeshError> {
        self.send(MeshMessage::Signal(event)).await
    }

    /// Report that the relay connection closed.
    pub async fn signaling_lost(&self) -> Result<(), MeshError> {
        self.send(MeshMessage::SignalingLost).await
    }

    /// Ask the relay to put us in `room`.
    pub async fn join(&self, room: RoomCode, identity: Identity) -> Result<(), MeshError> {
        self.send(MeshMessage::Join { room, identity }).await
    }

    /// Leave the room and tear down every link. The relay connection stays
    /// open.
    pub async fn leave(&self) -> Result<(), MeshError> {
        self.send(MeshMessage::Leave).await
    }

    /// Send a chat line to the room, or privately to `target`.
    pub async fn send_chat(
        &self,
        message: impl Into<String>,
        target: Option<SessionId>,
    ) -> Result<(), MeshError> {
        self.send(MeshMessage::Chat {
            message: message.into(),
            target,
        })
        .await
    }

    pub async fn react(&self, emoji: impl Into<String>) -> Result<(), MeshError> {
        self.send(MeshMessage::React {
            emoji: emoji.into(),
        })
        .await
    }

    pub async fn raise_hand(&self) -> Result<(), MeshError> {
        self.send(MeshMessage::RaiseHand).await
    }

    pub async fn set_presence(&self, presence: Presence) -> Result<(), MeshError> {
        self.send(MeshMessage::SetPresence(presence)).await
    }

    /// Swap the outgoing video track (e.g. camera to screen share) on every
    /// live link. Returns how many links the swap was queued on.
    pub async fn replace_outgoing_track(&self, track: MediaTrack) -> Result<usize, MeshError> {
        let (tx, rx) = oneshot::channel();
        self.send(MeshMessage::ReplaceOutgoingTrack {
            track,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| MeshError::Internal(format!("response receive failed: {e}")))
    }

    /// Current state of every link.
    pub async fn snapshot(&self) -> Result<MeshSnapshot, MeshError> {
        let (tx, rx) = oneshot::channel();
        self.send(MeshMessage::Snapshot { respond_to: tx }).await?;

        rx.await
            .map_err(|e| MeshError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop the orchestrator; every link is closed.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Child token for tasks that should stop with the orchestrator.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    async fn send(&self, message: MeshMessage) -> Result<(), MeshError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| MeshError::Internal(format!("channel send failed: {e}")))
    }
}

/// One live link and the resources it holds.
struct LinkEntry {
    link: PeerLink,
    worker: LinkWorkerHandle,
    restart_timer: Option<CancellationToken>,
}

/// The `MeshOrchestrator` implementation.
pub struct MeshOrchestrator {
    config: MeshConfig,
    media: Arc<dyn MediaStack>,
    ice_servers: Vec<IceServer>,
    receiver: mpsc::Receiver<MeshMessage>,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    events: mpsc::UnboundedSender<MeshEvent>,
    completions_tx: mpsc::UnboundedSender<LinkCompletion>,
    completions_rx: mpsc::UnboundedReceiver<LinkCompletion>,
    cancel_token: CancellationToken,
    local_id: Option<SessionId>,
    room: Option<RoomCode>,
    links: HashMap<SessionId, LinkEntry>,
    /// Ids that left the room; their late negotiation traffic is dropped.
    departed: HashSet<SessionId>,
}

impl MeshOrchestrator {
    /// Spawn the orchestrator.
    ///
    /// Client events bound for the relay are written to `outbound`; the
    /// returned receiver carries [`MeshEvent`]s for the application.
    pub fn spawn(
        config: MeshConfig,
        media: Arc<dyn MediaStack>,
        ice_servers: Vec<IceServer>,
        outbound: mpsc::UnboundedSender<ClientEvent>,
        cancel_token: CancellationToken,
    ) -> (
        MeshHandle,
        mpsc::UnboundedReceiver<MeshEvent>,
        JoinHandle<()>,
    ) {
        let (sender, receiver) = mpsc::channel(MESH_CHANNEL_BUFFER);
        let (events, events_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        let orchestrator = Self {
            config,
            media,
            ice_servers,
            receiver,
            outbound,
            events,
            completions_tx,
            completions_rx,
            cancel_token: cancel_token.clone(),
            local_id: None,
            room: None,
            links: HashMap::new(),
            departed: HashSet::new(),
        };

        let task_handle = tokio::spawn(orchestrator.run());

        let handle = MeshHandle {
            sender,
            cancel_token,
        };

        (handle, events_rx, task_handle)
    }

    #[instrument(skip_all, name = "mesh.orchestrator")]
    async fn run(mut self) {
        debug!(target: "mesh.orchestrator", "Mesh orchestrator started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "mesh.orchestrator", "Mesh orchestrator cancelled");
                    break;
                }

                message = self.receiver.recv() => {
                    match message {
                        Some(message) => self.handle_message(message),
                        None => {
                            debug!(target: "mesh.orchestrator", "All handles dropped, exiting");
                            break;
                        }
                    }
                }

                Some(completion) = self.completions_rx.recv() => {
                    self.handle_completion(completion);
                }
            }
        }

        self.close_all_links();
        info!(target: "mesh.orchestrator", "Mesh orchestrator stopped");
    }

    fn handle_message(&mut self, message: MeshMessage) {
        match message {
            MeshMessage::Signal(event) => self.handle_signal(event),
            MeshMessage::SignalingLost => {
                warn!(
                    target: "mesh.orchestrator",
                    links = self.links.len(),
                    "Signaling lost, tearing down all links"
                );
                self.close_all_links();
                self.local_id = None;
                self.room = None;
                self.emit(MeshEvent::SignalingLost);
            }
            MeshMessage::Join { room, identity } => {
                info!(target: "mesh.orchestrator", room = %room, "Joining room");
                self.send_signal(ClientEvent::JoinRoom(JoinRoom {
                    room_id: room.as_str().to_string(),
                    identity: identity.as_str().to_string(),
                }));
                self.room = Some(room);
            }
            MeshMessage::Leave => {
                info!(target: "mesh.orchestrator", links = self.links.len(), "Leaving room");
                self.send_signal(ClientEvent::LeaveRoom);
                self.close_all_links();
                self.room = None;
            }
            MeshMessage::Chat { message, target } => {
                self.send_signal(ClientEvent::ChatMessage(OutgoingChat {
                    message,
                    target: target.map(|id| id.to_string()),
                }));
            }
            MeshMessage::React { emoji } => {
                self.send_signal(ClientEvent::Reaction(OutgoingReaction { emoji }));
            }
            MeshMessage::RaiseHand => self.send_signal(ClientEvent::HandRaise),
            MeshMessage::SetPresence(presence) => {
                self.send_signal(ClientEvent::PresenceStatus(presence));
            }
            MeshMessage::ReplaceOutgoingTrack { track, respond_to } => {
                let queued = self
                    .links
                    .values()
                    .filter(|entry| entry.link.state() != LinkState::Closed)
                    .filter(|entry| entry.worker.submit(LinkOp::ReplaceTrack(track.clone())))
                    .count();
                debug!(
                    target: "mesh.orchestrator",
                    track = %track.id,
                    links = queued,
                    "Replacing outgoing track"
                );
                let _ = respond_to.send(queued);
            }
            MeshMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    fn handle_signal(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Welcome(welcome) => {
                debug!(target: "mesh.orchestrator", local_id = %welcome.id, "Session id assigned");
                self.local_id = Some(welcome.id);
            }
            ServerEvent::ExistingParticipants(participants) => {
                self.on_existing_participants(&participants);
                self.emit(MeshEvent::RoomJoined { participants });
            }
            ServerEvent::ParticipantJoined(joined) => {
                if self.is_local(joined.id) {
                    return;
                }
                self.departed.remove(&joined.id);
                if self.links.contains_key(&joined.id) {
                    debug!(
                        target: "mesh.orchestrator",
                        remote = %joined.id,
                        "Participant already tracked, ignoring repeated join"
                    );
                    return;
                }
                self.open_link(PeerLink::new(joined.id, Role::Answerer));
                self.emit(MeshEvent::ParticipantJoined {
                    id: joined.id,
                    identity: joined.identity,
                });
            }
            ServerEvent::ParticipantLeft(left) => {
                self.departed.insert(left.id);
                self.emit(MeshEvent::ParticipantLeft { id: left.id });
                self.close_link(left.id);
            }
            ServerEvent::RoomFull => {
                warn!(target: "mesh.orchestrator", "Room is full");
                self.room = None;
                self.emit(MeshEvent::RoomFull);
            }
            ServerEvent::Offer(relayed) => self.on_offer(relayed),
            ServerEvent::Answer(relayed) => self.on_answer(&relayed),
            ServerEvent::IceCandidate(relayed) => self.on_candidate(&relayed),
            ServerEvent::ChatMessage(chat) => self.emit(MeshEvent::Chat(chat)),
            ServerEvent::Reaction(reaction) => self.emit(MeshEvent::Reaction(reaction)),
            ServerEvent::HandRaise(hand) => self.emit(MeshEvent::HandRaised(hand)),
            ServerEvent::PresenceStatus(presence) => {
                self.emit(MeshEvent::PresenceChanged(presence));
            }
            ServerEvent::Error(notice) => {
                warn!(
                    target: "mesh.orchestrator",
                    code = %notice.code,
                    "Relay rejected a message"
                );
                self.emit(MeshEvent::Rejected(notice));
            }
        }
    }

    fn on_existing_participants(&mut self, participants: &[ParticipantSummary]) {
        info!(
            target: "mesh.orchestrator",
            count = participants.len(),
            "Joined room, initiating toward existing participants"
        );

        for participant in participants {
            let remote = participant.id;
            if self.is_local(remote) {
                continue;
            }
            self.departed.remove(&remote);

            match self.links.get(&remote) {
                None => {
                    if self.open_link(PeerLink::new(remote, Role::Initiator)) {
                        self.drive(remote, LinkEvent::Start);
                    }
                }
                Some(entry)
                    if entry.link.role() == Role::Initiator
                        && entry.link.state() == LinkState::Idle =>
                {
                    debug!(
                        target: "mesh.orchestrator",
                        remote = %remote,
                        "Retrying offer on membership re-sync"
                    );
                    self.drive(remote, LinkEvent::Start);
                }
                Some(_) => {}
            }
        }
    }

    fn on_offer(&mut self, relayed: RelayedDescription) {
        let remote = relayed.caller_id;
        if !self.accepts_negotiation_from(remote, "offer") {
            return;
        }

        let offer = match SessionDescription::from_value(&relayed.sdp, SdpKind::Offer) {
            Ok(offer) => offer,
            Err(e) => {
                self.malformed(remote, e.into());
                return;
            }
        };

        // Answerer links are normally created on participant-joined; the
        // offer may still overtake it.
        if !self.links.contains_key(&remote)
            && !self.open_link(PeerLink::new(remote, Role::Answerer))
        {
            return;
        }
        self.drive(remote, LinkEvent::RemoteOffer(offer));
    }

    fn on_answer(&mut self, relayed: &RelayedDescription) {
        let remote = relayed.caller_id;
        if !self.accepts_negotiation_from(remote, "answer") || !self.has_link(remote, "answer") {
            return;
        }
        match SessionDescription::from_value(&relayed.sdp, SdpKind::Answer) {
            Ok(answer) => self.drive(remote, LinkEvent::RemoteAnswer(answer)),
            Err(e) => self.malformed(remote, e.into()),
        }
    }

    fn on_candidate(&mut self, relayed: &RelayedCandidate) {
        let remote = relayed.caller_id;
        if !self.accepts_negotiation_from(remote, "ice-candidate")
            || !self.has_link(remote, "ice-candidate")
        {
            return;
        }
        match IceCandidate::from_value(&relayed.candidate) {
            Ok(candidate) => self.drive(remote, LinkEvent::RemoteCandidate(candidate)),
            Err(e) => self.malformed(remote, e.into()),
        }
    }

    fn accepts_negotiation_from(&self, remote: SessionId, event: &'static str) -> bool {
        if self.departed.contains(&remote) {
            debug!(
                target: "mesh.orchestrator",
                remote = %remote,
                event = event,
                "Dropping negotiation message from departed participant"
            );
            return false;
        }
        if self.room.is_none() || self.is_local(remote) {
            debug!(
                target: "mesh.orchestrator",
                remote = %remote,
                event = event,
                "Dropping negotiation message outside a room"
            );
            return false;
        }
        true
    }

    fn has_link(&self, remote: SessionId, event: &'static str) -> bool {
        if self.links.contains_key(&remote) {
            return true;
        }
        debug!(
            target: "mesh.orchestrator",
            remote = %remote,
            event = event,
            "Dropping negotiation message for unknown link"
        );
        false
    }

    fn malformed(&mut self, remote: SessionId, error: NegotiationError) {
        warn!(
            target: "mesh.orchestrator",
            remote = %remote,
            error = %error,
            "Malformed negotiation payload"
        );
        if self.links.contains_key(&remote) {
            self.rebuild(remote, error);
        } else {
            self.emit(MeshEvent::PeerFailed {
                remote,
                error,
                rebuilding: false,
            });
        }
    }

    fn handle_completion(&mut self, completion: LinkCompletion) {
        let live = self
            .links
            .get(&completion.remote)
            .is_some_and(|entry| entry.link.epoch() == completion.epoch);
        if !live {
            debug!(
                target: "mesh.orchestrator",
                remote = %completion.remote,
                epoch = completion.epoch,
                "Discarding stale completion"
            );
            return;
        }
        self.drive(completion.remote, completion.event);
    }

    /// Feed one event to the link for `remote` and carry out its effects.
    fn drive(&mut self, remote: SessionId, event: LinkEvent) {
        let Some(entry) = self.links.get_mut(&remote) else {
            return;
        };
        let effects = entry.link.handle(event);
        self.apply(remote, effects);
    }

    fn apply(&mut self, remote: SessionId, effects: Vec<LinkEffect>) {
        for effect in effects {
            match effect {
                LinkEffect::CreateOffer => self.submit(remote, LinkOp::CreateOffer),
                LinkEffect::CreateAnswer => self.submit(remote, LinkOp::CreateAnswer),
                LinkEffect::ApplyRemoteDescription(description) => {
                    self.submit(remote, LinkOp::ApplyRemoteDescription(description));
                }
                LinkEffect::ApplyCandidate(candidate) => {
                    self.submit(remote, LinkOp::ApplyCandidate(candidate));
                }
                LinkEffect::RestartTransport => {
                    info!(target: "mesh.orchestrator", remote = %remote, "Restarting transport");
                    self.submit(remote, LinkOp::RestartTransport);
                }
                LinkEffect::SendOffer(offer) => self.send_description(remote, &offer),
                LinkEffect::SendAnswer(answer) => self.send_description(remote, &answer),
                LinkEffect::SendCandidate(candidate) => match candidate.to_value() {
                    Ok(candidate) => {
                        self.send_signal(ClientEvent::IceCandidate(TargetedCandidate {
                            candidate,
                            target: remote,
                            sender: self.local_id,
                        }));
                    }
                    Err(e) => {
                        warn!(
                            target: "mesh.orchestrator",
                            error = %e,
                            "Failed to encode candidate"
                        );
                    }
                },
                LinkEffect::StartRestartTimer(attempt) => self.arm_restart_timer(remote, attempt),
                LinkEffect::CancelRestartTimer => {
                    if let Some(timer) = self
                        .links
                        .get_mut(&remote)
                        .and_then(|entry| entry.restart_timer.take())
                    {
                        timer.cancel();
                    }
                }
                LinkEffect::AttachRemoteTrack(track) => {
                    self.media.attach_remote_track(remote, track.clone());
                    self.emit(MeshEvent::RemoteTrack { remote, track });
                }
                LinkEffect::Connected => {
                    info!(target: "mesh.orchestrator", remote = %remote, "Peer connected");
                    self.emit(MeshEvent::PeerConnected { remote });
                }
                LinkEffect::ReportError(error) => {
                    warn!(
                        target: "mesh.orchestrator",
                        remote = %remote,
                        error = %error,
                        "Negotiation step failed"
                    );
                    self.emit(MeshEvent::PeerFailed {
                        remote,
                        error,
                        rebuilding: false,
                    });
                }
                LinkEffect::Rebuild(error) => {
                    self.rebuild(remote, error);
                    return;
                }
                LinkEffect::Dispose => {
                    if let Some(entry) = self.links.remove(&remote) {
                        self.release(remote, entry);
                        self.emit(MeshEvent::PeerClosed { remote });
                    }
                    return;
                }
            }
        }
    }

    /// Create the connection and worker for `link` and start tracking it.
    /// Returns `false` if the media stack refused.
    fn open_link(&mut self, link: PeerLink) -> bool {
        let remote = link.remote();
        let epoch = link.epoch();
        let config = ConnectionConfig {
            ice_servers: self.ice_servers.clone(),
            local_tracks: self.media.local_tracks(),
        };
        let events = ConnectionEvents::new(remote, epoch, self.completions_tx.clone());

        let connection = match self.media.open_connection(remote, &config, events) {
            Ok(connection) => connection,
            Err(e) => {
                warn!(
                    target: "mesh.orchestrator",
                    remote = %remote,
                    error = %e,
                    "Failed to open connection"
                );
                self.emit(MeshEvent::PeerFailed {
                    remote,
                    error: e.into(),
                    rebuilding: false,
                });
                return false;
            }
        };

        let (worker, _task) = LinkWorker::spawn(
            remote,
            epoch,
            connection,
            self.completions_tx.clone(),
            self.cancel_token.child_token(),
        );

        debug!(
            target: "mesh.orchestrator",
            remote = %remote,
            role = ?link.role(),
            epoch = epoch,
            "Link created"
        );

        self.links.insert(
            remote,
            LinkEntry {
                link,
                worker,
                restart_timer: None,
            },
        );
        true
    }

    /// Replace the link for `remote` with a fresh one of the same role.
    fn rebuild(&mut self, remote: SessionId, error: NegotiationError) {
        let Some(entry) = self.links.remove(&remote) else {
            return;
        };
        let next = entry.link.rebuilt();
        self.release(remote, entry);

        warn!(
            target: "mesh.orchestrator",
            remote = %remote,
            epoch = next.epoch(),
            error = %error,
            "Rebuilding link"
        );
        self.emit(MeshEvent::PeerFailed {
            remote,
            error,
            rebuilding: true,
        });

        if self.open_link(next) {
            self.drive(remote, LinkEvent::Start);
        }
    }

    fn close_link(&mut self, remote: SessionId) {
        self.drive(remote, LinkEvent::Close);
    }

    fn close_all_links(&mut self) {
        let remotes: Vec<SessionId> = self.links.keys().copied().collect();
        for remote in remotes {
            self.close_link(remote);
        }
        self.departed.clear();
    }

    /// Stop everything a removed link holds. Its connection is closed by
    /// the worker on the way out.
    fn release(&self, remote: SessionId, entry: LinkEntry) {
        if let Some(timer) = entry.restart_timer {
            timer.cancel();
        }
        entry.worker.cancel();
        self.media.detach_remote(remote);
    }

    fn arm_restart_timer(&mut self, remote: SessionId, attempt: u32) {
        let Some(entry) = self.links.get_mut(&remote) else {
            return;
        };
        if let Some(previous) = entry.restart_timer.take() {
            previous.cancel();
        }

        let timer = self.cancel_token.child_token();
        let cancelled = timer.clone();
        let completions = self.completions_tx.clone();
        let epoch = entry.link.epoch();
        let deadline = tokio::time::Instant::now() + self.config.reconnect_timeout;

        tokio::spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {
                    let _ = completions.send(LinkCompletion {
                        remote,
                        epoch,
                        event: LinkEvent::RestartDeadlineElapsed(attempt),
                    });
                }
            }
        });

        entry.restart_timer = Some(timer);
    }

    fn submit(&self, remote: SessionId, op: LinkOp) {
        if let Some(entry) = self.links.get(&remote) {
            if !entry.worker.submit(op) {
                warn!(target: "mesh.orchestrator", remote = %remote, "Link worker stopped");
            }
        }
    }

    fn send_description(&self, remote: SessionId, description: &SessionDescription) {
        let sdp = match description.to_value() {
            Ok(sdp) => sdp,
            Err(e) => {
                warn!(target: "mesh.orchestrator", error = %e, "Failed to encode description");
                return;
            }
        };
        let targeted = TargetedDescription {
            sdp,
            target: remote,
            sender: self.local_id,
        };
        let event = match description.kind {
            SdpKind::Offer => ClientEvent::Offer(targeted),
            SdpKind::Answer => ClientEvent::Answer(targeted),
        };
        debug!(
            target: "mesh.orchestrator",
            remote = %remote,
            event = event.name(),
            sdp_bytes = description.sdp.len(),
            "Sending description"
        );
        self.send_signal(event);
    }

    fn send_signal(&self, event: ClientEvent) {
        if self.outbound.send(event).is_err() {
            debug!(
                target: "mesh.orchestrator",
                "Signaling channel closed, dropping outbound event"
            );
        }
    }

    fn emit(&self, event: MeshEvent) {
        let _ = self.events.send(event);
    }

    fn is_local(&self, id: SessionId) -> bool {
        self.local_id == Some(id)
    }

    fn snapshot(&self) -> MeshSnapshot {
        let mut links: Vec<LinkSnapshot> = self
            .links
            .values()
            .map(|entry| LinkSnapshot {
                remote: entry.link.remote(),
                role: entry.link.role(),
                state: entry.link.state(),
                epoch: entry.link.epoch(),
                pending_candidates: entry.link.pending_candidates(),
            })
            .collect();
        links.sort_by_key(|l| l.remote);

        MeshSnapshot {
            local_id: self.local_id,
            room: self.room.clone(),
            links,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::mock::MockMediaStack;
    use signaling_protocol::events::Welcome;

    fn spawn() -> (
        MeshHandle,
        mpsc::UnboundedReceiver<MeshEvent>,
        mpsc::UnboundedReceiver<ClientEvent>,
        JoinHandle<()>,
    ) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (handle, events, task) = MeshOrchestrator::spawn(
            MeshConfig::default(),
            Arc::new(MockMediaStack::new()),
            Vec::new(),
            outbound,
            CancellationToken::new(),
        );
        (handle, events, outbound_rx, task)
    }

    #[tokio::test]
    async fn test_join_sends_join_room() {
        let (handle, _events, mut outbound, _task) = spawn();
        handle
            .join(
                RoomCode::parse("a1b2c3").unwrap(),
                Identity::parse("ana@example.com").unwrap(),
            )
            .await
            .unwrap();

        let sent = outbound.recv().await.unwrap();
        assert_eq!(
            sent,
            ClientEvent::JoinRoom(JoinRoom {
                room_id: "A1B2C3".to_string(),
                identity: "ana@example.com".to_string(),
            })
        );

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.room.unwrap().as_str(), "A1B2C3");
        assert!(snapshot.links.is_empty());
    }

    #[tokio::test]
    async fn test_welcome_sets_local_id() {
        let (handle, _events, _outbound, _task) = spawn();
        let id = SessionId::new();
        handle
            .deliver(ServerEvent::Welcome(Welcome { id }))
            .await
            .unwrap();
        assert_eq!(handle.snapshot().await.unwrap().local_id, Some(id));
    }

    #[tokio::test]
    async fn test_app_commands_become_client_events() {
        let (handle, _events, mut outbound, _task) = spawn();
        let target = SessionId::new();

        handle.send_chat("hi", Some(target)).await.unwrap();
        handle.react("🎉").await.unwrap();
        handle.raise_hand().await.unwrap();
        handle
            .set_presence(Presence {
                camera: false,
                mic: true,
            })
            .await
            .unwrap();

        assert_eq!(
            outbound.recv().await.unwrap(),
            ClientEvent::ChatMessage(OutgoingChat {
                message: "hi".to_string(),
                target: Some(target.to_string()),
            })
        );
        assert_eq!(
            outbound.recv().await.unwrap(),
            ClientEvent::Reaction(OutgoingReaction {
                emoji: "🎉".to_string()
            })
        );
        assert_eq!(outbound.recv().await.unwrap(), ClientEvent::HandRaise);
        assert_eq!(
            outbound.recv().await.unwrap(),
            ClientEvent::PresenceStatus(Presence {
                camera: false,
                mic: true
            })
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_orchestrator() {
        let (handle, _events, _outbound, task) = spawn();
        assert!(!handle.is_cancelled());

        let child = handle.child_token();
        handle.cancel();
        task.await.unwrap();

        assert!(handle.is_cancelled());
        assert!(child.is_cancelled());
        assert!(handle.snapshot().await.is_err());
    }
}
