//! Peer Negotiation State Machine.
//!
//! A [`PeerLink`] is a pure value: [`PeerLink::handle`] takes one
//! [`LinkEvent`] and returns the [`LinkEffect`]s the orchestrator must
//! carry out. It never performs I/O, so every transition is testable
//! without a transport.
//!
//! ```text
//! idle ──► offering ──┐
//!   └───► answering ──┴─► connected ◄──► reconnecting
//!                                            │ deadline
//!   any ──────────────────────────────► closed ◄┘
//! ```
//!
//! Remote candidates that arrive before the remote description has been
//! applied are buffered in arrival order and drained, in that order, the
//! moment the media stack confirms the apply. Local candidates gathered
//! before our own description has been sent are held back the same way so
//! the remote never sees a candidate ahead of the description it belongs to.
//!
//! One bounded wait guards two states: `reconnecting` (the transport must
//! come back) and `offering` once the offer is out (the answer must arrive).
//! Either expiring abandons the link for a rebuild.

use crate::errors::{MediaError, NegotiationError};
use crate::media::{MediaTrack, TransportState};
use common::types::SessionId;
use signaling_protocol::negotiation::{IceCandidate, SessionDescription};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Which side of the pair sends the offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Learned of the remote from `existing-participants`: we joined last.
    Initiator,
    /// Learned of the remote from `participant-joined`: they joined last.
    Answerer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Offering,
    Answering,
    Connected,
    Reconnecting,
    Closed,
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Begin negotiating. Only an idle initiator reacts.
    Start,
    LocalOfferReady(SessionDescription),
    LocalOfferFailed(MediaError),
    RemoteOffer(SessionDescription),
    RemoteAnswer(SessionDescription),
    RemoteDescriptionApplied,
    RemoteDescriptionFailed(MediaError),
    LocalAnswerReady(SessionDescription),
    LocalAnswerFailed(MediaError),
    RemoteCandidate(IceCandidate),
    CandidateFailed(MediaError),
    LocalCandidate(IceCandidate),
    TransportState(TransportState),
    /// The bounded wait for the given attempt fired. Armed while an offer
    /// awaits its answer and while the transport restarts.
    RestartDeadlineElapsed(u32),
    RemoteTrack(MediaTrack),
    /// Remote departed or local teardown.
    Close,
}

/// Work the orchestrator must carry out for a link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEffect {
    CreateOffer,
    SendOffer(SessionDescription),
    ApplyRemoteDescription(SessionDescription),
    CreateAnswer,
    SendAnswer(SessionDescription),
    ApplyCandidate(IceCandidate),
    SendCandidate(IceCandidate),
    RestartTransport,
    /// Arm the bounded wait for attempt `n`.
    StartRestartTimer(u32),
    CancelRestartTimer,
    AttachRemoteTrack(MediaTrack),
    /// The link just became usable.
    Connected,
    /// Non-fatal failure; the link stays as it is.
    ReportError(NegotiationError),
    /// The link is abandoned; replace it with a fresh one of the same role.
    Rebuild(NegotiationError),
    /// The link is closed; release its resources.
    Dispose,
}

/// Negotiation state for one remote participant.
#[derive(Debug, Clone)]
pub struct PeerLink {
    remote: SessionId,
    role: Role,
    state: LinkState,
    epoch: u64,
    local_description_sent: bool,
    applying_remote: bool,
    remote_description_applied: bool,
    transport_connected: bool,
    awaiting_answer: bool,
    restart_attempt: u32,
    pending_remote: VecDeque<IceCandidate>,
    pending_local: VecDeque<IceCandidate>,
}

impl PeerLink {
    #[must_use]
    pub fn new(remote: SessionId, role: Role) -> Self {
        Self::with_epoch(remote, role, 0)
    }

    #[must_use]
    pub fn with_epoch(remote: SessionId, role: Role, epoch: u64) -> Self {
        Self {
            remote,
            role,
            state: LinkState::Idle,
            epoch,
            local_description_sent: false,
            applying_remote: false,
            remote_description_applied: false,
            transport_connected: false,
            awaiting_answer: false,
            restart_attempt: 0,
            pending_remote: VecDeque::new(),
            pending_local: VecDeque::new(),
        }
    }

    /// Fresh link for the same remote and role, one epoch later.
    #[must_use]
    pub fn rebuilt(&self) -> Self {
        Self::with_epoch(self.remote, self.role, self.epoch.wrapping_add(1))
    }

    #[must_use]
    pub fn remote(&self) -> SessionId {
        self.remote
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Remote candidates waiting for the remote description.
    #[must_use]
    pub fn pending_candidates(&self) -> usize {
        self.pending_remote.len()
    }

    #[must_use]
    pub fn remote_description_applied(&self) -> bool {
        self.remote_description_applied
    }

    /// Apply one event.
    pub fn handle(&mut self, event: LinkEvent) -> Vec<LinkEffect> {
        if self.state == LinkState::Closed {
            debug!(
                target: "mesh.link",
                remote = %self.remote,
                epoch = self.epoch,
                event = event_name(&event),
                "Ignoring event for closed link"
            );
            return Vec::new();
        }

        match event {
            LinkEvent::Start => self.on_start(),
            LinkEvent::LocalOfferReady(offer) => self.on_local_offer(offer),
            LinkEvent::LocalOfferFailed(e) => self.on_local_offer_failed(e),
            LinkEvent::RemoteOffer(offer) => self.on_remote_offer(offer),
            LinkEvent::RemoteAnswer(answer) => self.on_remote_answer(answer),
            LinkEvent::RemoteDescriptionApplied => self.on_remote_applied(),
            LinkEvent::RemoteDescriptionFailed(e) => {
                if !self.applying_remote {
                    return Vec::new();
                }
                self.abandon(e.into())
            }
            LinkEvent::LocalAnswerReady(answer) => self.on_local_answer(answer),
            LinkEvent::LocalAnswerFailed(e) => {
                if self.state != LinkState::Answering {
                    return Vec::new();
                }
                self.abandon(e.into())
            }
            LinkEvent::RemoteCandidate(candidate) => self.on_remote_candidate(candidate),
            LinkEvent::CandidateFailed(e) => {
                warn!(
                    target: "mesh.link",
                    remote = %self.remote,
                    error = %e,
                    "Remote candidate rejected"
                );
                Vec::new()
            }
            LinkEvent::LocalCandidate(candidate) => {
                if self.local_description_sent {
                    vec![LinkEffect::SendCandidate(candidate)]
                } else {
                    self.pending_local.push_back(candidate);
                    Vec::new()
                }
            }
            LinkEvent::TransportState(state) => self.on_transport(state),
            LinkEvent::RestartDeadlineElapsed(attempt) => {
                if attempt != self.restart_attempt {
                    return Vec::new();
                }
                match self.state {
                    LinkState::Reconnecting => self.abandon(NegotiationError::RestartTimedOut),
                    LinkState::Offering if self.awaiting_answer => {
                        self.abandon(NegotiationError::AnswerTimedOut)
                    }
                    _ => Vec::new(),
                }
            }
            LinkEvent::RemoteTrack(track) => vec![LinkEffect::AttachRemoteTrack(track)],
            LinkEvent::Close => self.close(),
        }
    }

    fn on_start(&mut self) -> Vec<LinkEffect> {
        if self.role != Role::Initiator || self.state != LinkState::Idle {
            return Vec::new();
        }
        self.state = LinkState::Offering;
        self.local_description_sent = false;
        vec![LinkEffect::CreateOffer]
    }

    fn on_local_offer(&mut self, offer: SessionDescription) -> Vec<LinkEffect> {
        if self.state != LinkState::Offering || self.local_description_sent {
            return Vec::new();
        }
        self.local_description_sent = true;
        self.awaiting_answer = true;
        self.restart_attempt = self.restart_attempt.wrapping_add(1);
        let mut effects = vec![LinkEffect::SendOffer(offer)];
        self.flush_local_candidates(&mut effects);
        effects.push(LinkEffect::StartRestartTimer(self.restart_attempt));
        effects
    }

    fn on_local_offer_failed(&mut self, error: MediaError) -> Vec<LinkEffect> {
        if self.state != LinkState::Offering || self.local_description_sent {
            return Vec::new();
        }
        // Retried on the next membership re-sync.
        self.state = LinkState::Idle;
        vec![LinkEffect::ReportError(error.into())]
    }

    fn on_remote_offer(&mut self, offer: SessionDescription) -> Vec<LinkEffect> {
        let mut effects = Vec::new();
        if self.state == LinkState::Reconnecting || self.awaiting_answer {
            effects.push(LinkEffect::CancelRestartTimer);
        }
        self.awaiting_answer = false;
        if self.state != LinkState::Idle {
            debug!(
                target: "mesh.link",
                remote = %self.remote,
                from = ?self.state,
                "Renegotiation offer applied in place"
            );
        }

        self.state = LinkState::Answering;
        self.local_description_sent = false;
        self.applying_remote = true;
        self.remote_description_applied = false;
        effects.push(LinkEffect::ApplyRemoteDescription(offer));
        effects
    }

    fn on_remote_answer(&mut self, answer: SessionDescription) -> Vec<LinkEffect> {
        let expecting = self.state == LinkState::Offering
            && self.local_description_sent
            && !self.applying_remote
            && !self.remote_description_applied;
        if !expecting {
            debug!(
                target: "mesh.link",
                remote = %self.remote,
                state = ?self.state,
                "Ignoring unexpected answer"
            );
            return Vec::new();
        }
        self.applying_remote = true;
        vec![LinkEffect::ApplyRemoteDescription(answer)]
    }

    fn on_remote_applied(&mut self) -> Vec<LinkEffect> {
        if !self.applying_remote {
            return Vec::new();
        }
        self.applying_remote = false;
        self.remote_description_applied = true;

        let mut effects: Vec<LinkEffect> = self
            .pending_remote
            .drain(..)
            .map(LinkEffect::ApplyCandidate)
            .collect();

        if self.awaiting_answer {
            self.awaiting_answer = false;
            effects.push(LinkEffect::CancelRestartTimer);
        }

        match self.state {
            LinkState::Answering => effects.push(LinkEffect::CreateAnswer),
            LinkState::Offering if self.transport_connected => {
                self.state = LinkState::Connected;
                effects.push(LinkEffect::Connected);
            }
            _ => {}
        }
        effects
    }

    fn on_local_answer(&mut self, answer: SessionDescription) -> Vec<LinkEffect> {
        if self.state != LinkState::Answering || self.local_description_sent {
            return Vec::new();
        }
        self.local_description_sent = true;
        let mut effects = vec![LinkEffect::SendAnswer(answer)];
        self.flush_local_candidates(&mut effects);
        if self.transport_connected {
            self.state = LinkState::Connected;
            effects.push(LinkEffect::Connected);
        }
        effects
    }

    fn on_remote_candidate(&mut self, candidate: IceCandidate) -> Vec<LinkEffect> {
        if self.remote_description_applied {
            vec![LinkEffect::ApplyCandidate(candidate)]
        } else {
            self.pending_remote.push_back(candidate);
            Vec::new()
        }
    }

    fn on_transport(&mut self, state: TransportState) -> Vec<LinkEffect> {
        match state {
            TransportState::Connected => {
                self.transport_connected = true;
                match self.state {
                    LinkState::Reconnecting => {
                        self.state = LinkState::Connected;
                        vec![LinkEffect::CancelRestartTimer, LinkEffect::Connected]
                    }
                    LinkState::Offering if self.remote_description_applied => {
                        self.state = LinkState::Connected;
                        vec![LinkEffect::Connected]
                    }
                    LinkState::Answering if self.local_description_sent => {
                        self.state = LinkState::Connected;
                        vec![LinkEffect::Connected]
                    }
                    // Picked up once negotiation completes.
                    _ => Vec::new(),
                }
            }
            TransportState::Disconnected | TransportState::Failed => {
                self.transport_connected = false;
                match self.state {
                    LinkState::Connected => {
                        self.state = LinkState::Reconnecting;
                        self.restart_attempt = self.restart_attempt.wrapping_add(1);
                        vec![
                            LinkEffect::RestartTransport,
                            LinkEffect::StartRestartTimer(self.restart_attempt),
                        ]
                    }
                    LinkState::Offering | LinkState::Answering
                        if state == TransportState::Failed =>
                    {
                        self.abandon(NegotiationError::Media(MediaError::Transport(
                            "transport failed during negotiation".to_string(),
                        )))
                    }
                    _ => Vec::new(),
                }
            }
            TransportState::Closed => {
                self.transport_connected = false;
                self.abandon(NegotiationError::TransportClosed)
            }
        }
    }

    fn flush_local_candidates(&mut self, effects: &mut Vec<LinkEffect>) {
        effects.extend(self.pending_local.drain(..).map(LinkEffect::SendCandidate));
    }

    fn abandon(&mut self, error: NegotiationError) -> Vec<LinkEffect> {
        debug!(
            target: "mesh.link",
            remote = %self.remote,
            epoch = self.epoch,
            from = ?self.state,
            error = %error,
            "Abandoning link"
        );
        self.state = LinkState::Closed;
        self.awaiting_answer = false;
        self.pending_remote.clear();
        self.pending_local.clear();
        vec![LinkEffect::Rebuild(error)]
    }

    fn close(&mut self) -> Vec<LinkEffect> {
        let mut effects = Vec::new();
        if self.state == LinkState::Reconnecting || self.awaiting_answer {
            effects.push(LinkEffect::CancelRestartTimer);
        }
        if !self.pending_remote.is_empty() {
            debug!(
                target: "mesh.link",
                remote = %self.remote,
                discarded = self.pending_remote.len(),
                "Discarding buffered candidates"
            );
        }
        self.state = LinkState::Closed;
        self.awaiting_answer = false;
        self.pending_remote.clear();
        self.pending_local.clear();
        effects.push(LinkEffect::Dispose);
        effects
    }
}

fn event_name(event: &LinkEvent) -> &'static str {
    match event {
        LinkEvent::Start => "start",
        LinkEvent::LocalOfferReady(_) => "local-offer-ready",
        LinkEvent::LocalOfferFailed(_) => "local-offer-failed",
        LinkEvent::RemoteOffer(_) => "remote-offer",
        LinkEvent::RemoteAnswer(_) => "remote-answer",
        LinkEvent::RemoteDescriptionApplied => "remote-description-applied",
        LinkEvent::RemoteDescriptionFailed(_) => "remote-description-failed",
        LinkEvent::LocalAnswerReady(_) => "local-answer-ready",
        LinkEvent::LocalAnswerFailed(_) => "local-answer-failed",
        LinkEvent::RemoteCandidate(_) => "remote-candidate",
        LinkEvent::CandidateFailed(_) => "candidate-failed",
        LinkEvent::LocalCandidate(_) => "local-candidate",
        LinkEvent::TransportState(_) => "transport-state",
        LinkEvent::RestartDeadlineElapsed(_) => "restart-deadline",
        LinkEvent::RemoteTrack(_) => "remote-track",
        LinkEvent::Close => "close",
    }
}
