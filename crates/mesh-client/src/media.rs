//! Seam to the external real-time media stack.
//!
//! The mesh client never touches media itself. It asks a [`MediaStack`] for
//! one [`MediaConnection`] per remote participant and drives it through the
//! offer/answer/candidate exchange. Asynchronous notifications from a
//! connection (local candidates, transport state, remote tracks) flow back
//! through the [`ConnectionEvents`] sink it was opened with, tagged with the
//! link they belong to.

use crate::errors::MediaError;
use crate::peer::{LinkCompletion, LinkEvent};
use async_trait::async_trait;
use common::types::SessionId;
use signaling_protocol::ice::IceServer;
use signaling_protocol::negotiation::{IceCandidate, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Handle to a media track owned by the media stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

impl MediaTrack {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// Transport state as reported by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connected,
    /// Connectivity lost; may come back on its own.
    Disconnected,
    /// Connectivity checks failed; needs a restart.
    Failed,
    Closed,
}

/// Everything a new connection is opened with.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub ice_servers: Vec<IceServer>,
    /// Local tracks to send on the connection.
    pub local_tracks: Vec<MediaTrack>,
}

/// Notification sink handed to [`MediaStack::open_connection`].
///
/// Each emitted notification is tagged with the link's remote id and epoch,
/// so notifications from a torn-down connection are recognised as stale.
#[derive(Debug, Clone)]
pub struct ConnectionEvents {
    remote: SessionId,
    epoch: u64,
    tx: mpsc::UnboundedSender<LinkCompletion>,
}

impl ConnectionEvents {
    #[must_use]
    pub fn new(remote: SessionId, epoch: u64, tx: mpsc::UnboundedSender<LinkCompletion>) -> Self {
        Self { remote, epoch, tx }
    }

    #[must_use]
    pub fn remote(&self) -> SessionId {
        self.remote
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// A local transport candidate was gathered.
    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.emit(LinkEvent::LocalCandidate(candidate));
    }

    pub fn transport_state(&self, state: TransportState) {
        self.emit(LinkEvent::TransportState(state));
    }

    /// The remote sent a media track.
    pub fn remote_track(&self, track: MediaTrack) {
        self.emit(LinkEvent::RemoteTrack(track));
    }

    fn emit(&self, event: LinkEvent) {
        // A closed receiver means the orchestrator is gone; nothing to do.
        let _ = self.tx.send(LinkCompletion {
            remote: self.remote,
            epoch: self.epoch,
            event,
        });
    }
}

/// Factory for per-peer connections plus the capture/render collaborator.
pub trait MediaStack: Send + Sync {
    /// Create a connection to `remote`. Local tracks from `config` are
    /// attached before any description is created.
    ///
    /// # Errors
    ///
    /// Returns `MediaError::Setup` if the connection cannot be created.
    fn open_connection(
        &self,
        remote: SessionId,
        config: &ConnectionConfig,
        events: ConnectionEvents,
    ) -> Result<Arc<dyn MediaConnection>, MediaError>;

    /// Tracks captured locally (camera, microphone, or a shared screen).
    fn local_tracks(&self) -> Vec<MediaTrack>;

    /// Hand a received track to the renderer for `remote`.
    fn attach_remote_track(&self, remote: SessionId, track: MediaTrack);

    /// Stop rendering everything received from `remote`.
    fn detach_remote(&self, remote: SessionId);
}

/// One negotiated connection to one remote participant.
///
/// `create_offer` and `create_answer` also install the result as the local
/// description.
#[async_trait]
pub trait MediaConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;

    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;

    async fn set_remote_description(&self, description: SessionDescription)
        -> Result<(), MediaError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;

    /// Restart transport connectivity without renegotiating.
    async fn restart_ice(&self) -> Result<(), MediaError>;

    /// Swap the outgoing video track (e.g. camera to screen share).
    async fn replace_outgoing_track(&self, track: MediaTrack) -> Result<(), MediaError>;

    async fn close(&self);
}

/// Mock media stack for testing.
pub mod mock {
    use super::{
        async_trait, ConnectionConfig, ConnectionEvents, IceCandidate, MediaConnection,
        MediaError, MediaStack, MediaTrack, SessionDescription, SessionId, TrackKind,
        TransportState,
    };
    use signaling_protocol::negotiation::SdpKind;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Operation recorded by a [`MockConnection`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum MockOp {
        CreateOffer,
        CreateAnswer,
        SetRemoteDescription(SdpKind),
        AddCandidate(String),
        RestartIce,
        ReplaceTrack(String),
        Close,
    }

    /// Failure switches shared by every connection of one stack.
    #[derive(Debug, Default)]
    pub struct MockFailures {
        pub offer: AtomicBool,
        pub answer: AtomicBool,
        pub remote_description: AtomicBool,
        pub candidate: AtomicBool,
        pub setup: AtomicBool,
    }

    /// Mock connection that records operations and lets tests emit
    /// transport notifications.
    pub struct MockConnection {
        remote: SessionId,
        events: ConnectionEvents,
        failures: Arc<MockFailures>,
        auto_connect: bool,
        ops: Mutex<Vec<MockOp>>,
        has_local: AtomicBool,
        has_remote: AtomicBool,
        connected: AtomicBool,
        closed: AtomicBool,
        candidates_emitted: AtomicUsize,
    }

    impl MockConnection {
        #[must_use]
        pub fn remote(&self) -> SessionId {
            self.remote
        }

        #[must_use]
        pub fn epoch(&self) -> u64 {
            self.events.epoch()
        }

        #[must_use]
        pub fn ops(&self) -> Vec<MockOp> {
            lock(&self.ops).clone()
        }

        /// Candidates applied so far, in order.
        #[must_use]
        pub fn applied_candidates(&self) -> Vec<String> {
            lock(&self.ops)
                .iter()
                .filter_map(|op| match op {
                    MockOp::AddCandidate(c) => Some(c.clone()),
                    _ => None,
                })
                .collect()
        }

        #[must_use]
        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        pub fn emit_transport(&self, state: TransportState) {
            self.events.transport_state(state);
        }

        pub fn emit_local_candidate(&self, candidate: &str) {
            self.events
                .local_candidate(IceCandidate::new(candidate.to_string()));
        }

        pub fn emit_remote_track(&self, track: MediaTrack) {
            self.events.remote_track(track);
        }

        fn record(&self, op: MockOp) {
            lock(&self.ops).push(op);
        }

        /// In auto-connect mode, trickle one candidate per local description
        /// and report the transport up once both descriptions are in place.
        fn after_description(&self) {
            if !self.auto_connect {
                return;
            }
            if self.has_local.load(Ordering::SeqCst) {
                let n = self.candidates_emitted.fetch_add(1, Ordering::SeqCst);
                self.emit_local_candidate(&format!(
                    "candidate:{n} 1 udp 2122260223 192.0.2.1 {} typ host",
                    50000 + n
                ));
            }
            if self.has_local.load(Ordering::SeqCst)
                && self.has_remote.load(Ordering::SeqCst)
                && !self.connected.swap(true, Ordering::SeqCst)
            {
                self.emit_transport(TransportState::Connected);
                self.emit_remote_track(MediaTrack::new(
                    format!("remote-video-{}", self.remote),
                    TrackKind::Video,
                ));
            }
        }
    }

    #[async_trait]
    impl MediaConnection for MockConnection {
        async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
            self.record(MockOp::CreateOffer);
            if self.failures.offer.load(Ordering::SeqCst) {
                return Err(MediaError::LocalDescription("mock offer failure".to_string()));
            }
            self.has_local.store(true, Ordering::SeqCst);
            self.after_description();
            Ok(SessionDescription::offer(format!("v=0 mock offer to {}", self.remote)))
        }

        async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
            self.record(MockOp::CreateAnswer);
            if self.failures.answer.load(Ordering::SeqCst) {
                return Err(MediaError::LocalDescription("mock answer failure".to_string()));
            }
            self.has_local.store(true, Ordering::SeqCst);
            self.after_description();
            Ok(SessionDescription::answer(format!("v=0 mock answer to {}", self.remote)))
        }

        async fn set_remote_description(
            &self,
            description: SessionDescription,
        ) -> Result<(), MediaError> {
            self.record(MockOp::SetRemoteDescription(description.kind));
            if self.failures.remote_description.load(Ordering::SeqCst) {
                return Err(MediaError::RemoteDescription(
                    "mock remote description failure".to_string(),
                ));
            }
            self.has_remote.store(true, Ordering::SeqCst);
            // Answerers get their local description afterwards.
            if description.kind == SdpKind::Answer {
                self.after_description();
            }
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
            self.record(MockOp::AddCandidate(candidate.candidate));
            if self.failures.candidate.load(Ordering::SeqCst) {
                return Err(MediaError::Candidate("mock candidate failure".to_string()));
            }
            Ok(())
        }

        async fn restart_ice(&self) -> Result<(), MediaError> {
            self.record(MockOp::RestartIce);
            Ok(())
        }

        async fn replace_outgoing_track(&self, track: MediaTrack) -> Result<(), MediaError> {
            self.record(MockOp::ReplaceTrack(track.id));
            Ok(())
        }

        async fn close(&self) {
            self.record(MockOp::Close);
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Mock media stack.
    pub struct MockMediaStack {
        failures: Arc<MockFailures>,
        auto_connect: bool,
        local_tracks: Vec<MediaTrack>,
        connections: Mutex<Vec<Arc<MockConnection>>>,
        attached: Mutex<Vec<(SessionId, MediaTrack)>>,
        detached: Mutex<Vec<SessionId>>,
    }

    impl Default for MockMediaStack {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockMediaStack {
        /// Manual mode: transport notifications are emitted by the test.
        #[must_use]
        pub fn new() -> Self {
            Self {
                failures: Arc::new(MockFailures::default()),
                auto_connect: false,
                local_tracks: vec![
                    MediaTrack::new("local-audio", TrackKind::Audio),
                    MediaTrack::new("local-video", TrackKind::Video),
                ],
                connections: Mutex::new(Vec::new()),
                attached: Mutex::new(Vec::new()),
                detached: Mutex::new(Vec::new()),
            }
        }

        /// Connections trickle candidates and come up on their own once
        /// both descriptions are set.
        #[must_use]
        pub fn auto_connecting() -> Self {
            Self {
                auto_connect: true,
                ..Self::new()
            }
        }

        #[must_use]
        pub fn failures(&self) -> &MockFailures {
            &self.failures
        }

        /// Most recent connection opened to `remote`.
        #[must_use]
        pub fn connection(&self, remote: SessionId) -> Option<Arc<MockConnection>> {
            lock(&self.connections)
                .iter()
                .rev()
                .find(|c| c.remote == remote)
                .cloned()
        }

        /// Every connection ever opened to `remote`, oldest first.
        #[must_use]
        pub fn connections_to(&self, remote: SessionId) -> Vec<Arc<MockConnection>> {
            lock(&self.connections)
                .iter()
                .filter(|c| c.remote == remote)
                .cloned()
                .collect()
        }

        #[must_use]
        pub fn connection_count(&self) -> usize {
            lock(&self.connections).len()
        }

        #[must_use]
        pub fn attached(&self) -> Vec<(SessionId, MediaTrack)> {
            lock(&self.attached).clone()
        }

        #[must_use]
        pub fn detached(&self) -> Vec<SessionId> {
            lock(&self.detached).clone()
        }
    }

    impl MediaStack for MockMediaStack {
        fn open_connection(
            &self,
            remote: SessionId,
            _config: &ConnectionConfig,
            events: ConnectionEvents,
        ) -> Result<Arc<dyn MediaConnection>, MediaError> {
            if self.failures.setup.load(Ordering::SeqCst) {
                return Err(MediaError::Setup("mock setup failure".to_string()));
            }
            let connection = Arc::new(MockConnection {
                remote,
                events,
                failures: Arc::clone(&self.failures),
                auto_connect: self.auto_connect,
                ops: Mutex::new(Vec::new()),
                has_local: AtomicBool::new(false),
                has_remote: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                candidates_emitted: AtomicUsize::new(0),
            });
            lock(&self.connections).push(Arc::clone(&connection));
            Ok(connection)
        }

        fn local_tracks(&self) -> Vec<MediaTrack> {
            self.local_tracks.clone()
        }

        fn attach_remote_track(&self, remote: SessionId, track: MediaTrack) {
            lock(&self.attached).push((remote, track));
        }

        fn detach_remote(&self, remote: SessionId) {
            lock(&self.detached).push(remote);
        }
    }
}
