//! Signaling Relay: routes events between sessions of a room.
//!
//! Each connected session owns a bounded outbox drained by exactly one
//! writer, so events from one sender to one target keep their order. A
//! session whose outbox is full has stopped reading: the event is dropped
//! and the session is evicted through its token, which disconnects it the
//! usual way.
//!
//! Negotiation events go to exactly the named target, with the sender
//! stamped from the session's own id. Chat, reactions, hand-raise and
//! presence fan out to the rest of the room. Free text is stripped of
//! markup before anyone else sees it.
//!
//! Membership changes commit in the [`RoomRegistry`] first; the
//! `participant-joined`/`participant-left` notifications are queued after.

use crate::errors::RelayError;
use crate::observability::metrics;
use crate::registry::RoomRegistry;
use common::sanitize::strip_markup;
use common::types::{Identity, Presence, RoomCode, SessionId};
use dashmap::DashMap;
use signaling_protocol::codec::decode_client;
use signaling_protocol::events::{
    ChatRecipient, ClientEvent, JoinRoom, OutgoingChat, OutgoingReaction, ParticipantJoined,
    ParticipantLeft, RelayedCandidate, RelayedChat, RelayedDescription, RelayedHandRaise,
    RelayedPresence, RelayedReaction, ServerEvent, TargetedCandidate, TargetedDescription,
    Welcome,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest reaction accepted, in characters.
pub const MAX_REACTION_CHARS: usize = 16;

/// Sending half of a session's outbox.
#[derive(Debug, Clone)]
pub struct Outbox {
    sender: mpsc::Sender<ServerEvent>,
    evict: CancellationToken,
}

impl Outbox {
    /// `evict` is cancelled if the session falls behind.
    #[must_use]
    pub fn new(sender: mpsc::Sender<ServerEvent>, evict: CancellationToken) -> Self {
        Self { sender, evict }
    }
}

/// Relay-side record of one live connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    /// Set by the first accepted join.
    pub identity: Option<Identity>,
    pub room: Option<RoomCode>,
    pub presence: Presence,
}

/// Routes client events through the room registry to session outboxes.
#[derive(Debug)]
pub struct SignalingRelay {
    registry: RoomRegistry,
    directory: DashMap<SessionId, Outbox>,
    max_message_bytes: usize,
}

impl SignalingRelay {
    #[must_use]
    pub fn new(room_capacity: usize, max_message_bytes: usize) -> Self {
        Self {
            registry: RoomRegistry::new(room_capacity),
            directory: DashMap::new(),
            max_message_bytes,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Number of connected sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.directory.len()
    }

    /// Register a new connection and greet it with its session id.
    pub fn connect(&self, outbox: Outbox) -> Session {
        let session = Session {
            id: SessionId::new(),
            identity: None,
            room: None,
            presence: Presence::default(),
        };
        self.directory.insert(session.id, outbox);
        metrics::set_sessions_active(self.directory.len());

        info!(target: "relay.session", session_id = %session.id, "Session connected");

        self.deliver(session.id, ServerEvent::Welcome(Welcome { id: session.id }));
        session
    }

    /// Tear down a connection: leave its room, then forget its outbox.
    pub fn disconnect(&self, session: &mut Session) {
        self.leave_room(session);
        self.directory.remove(&session.id);
        metrics::set_sessions_active(self.directory.len());

        info!(target: "relay.session", session_id = %session.id, "Session disconnected");
    }

    /// Decode one inbound text frame and act on it. Failures are reported
    /// back to the sender as an `error` event; nothing else is affected.
    pub fn handle_frame(&self, session: &mut Session, text: &str) {
        let result = decode_client(text, self.max_message_bytes)
            .map_err(|e| RelayError::Malformed(e.to_string()))
            .and_then(|event| self.handle(session, event));

        if let Err(e) = result {
            match &e {
                RelayError::Malformed(detail) => {
                    debug!(
                        target: "relay.session",
                        session_id = %session.id,
                        len = text.len(),
                        error = %detail,
                        "Malformed frame"
                    );
                    metrics::record_message_dropped("malformed");
                }
                RelayError::NotInRoom => metrics::record_message_dropped("not_in_room"),
                _ => debug!(
                    target: "relay.session",
                    session_id = %session.id,
                    error = %e,
                    "Event rejected"
                ),
            }
            self.deliver(session.id, ServerEvent::Error(e.to_notice()));
        }
    }

    /// Binary frames must carry the same UTF-8 JSON as text frames.
    pub fn handle_binary_frame(&self, session: &mut Session, bytes: &[u8]) {
        match std::str::from_utf8(bytes) {
            Ok(text) => self.handle_frame(session, text),
            Err(e) => {
                debug!(
                    target: "relay.session",
                    session_id = %session.id,
                    len = bytes.len(),
                    error = %e,
                    "Binary frame is not UTF-8"
                );
                metrics::record_message_dropped("malformed");
                let error = RelayError::Malformed(format!("frame is not valid UTF-8: {e}"));
                self.deliver(session.id, ServerEvent::Error(error.to_notice()));
            }
        }
    }

        /// Act on one decoded client event.
    ///
    /// # Errors
    ///
    /// Returns the rejection to report to the sender. Room capacity is not an
    /// error here: a full room answers with `room-full`.
    pub fn handle(&self, session: &mut Session, event: ClientEvent) -> Result<(), RelayError> {
        match event {
            ClientEvent::JoinRoom(join) => self.join_room(session, join),
            ClientEvent::LeaveRoom => {
                self.leave_room(session);
                Ok(())
            }
            ClientEvent::Offer(offer) => self.forward_description(session, offer, true),
            ClientEvent::Answer(answer) => self.forward_description(session, answer, false),
            ClientEvent::IceCandidate(candidate) => self.forward_candidate(session, candidate),
            ClientEvent::ChatMessage(chat) => self.relay_chat(session, &chat),
            ClientEvent::Reaction(reaction) => self.relay_reaction(session, &reaction),
            ClientEvent::HandRaise => self.relay_hand_raise(session),
            ClientEvent::PresenceStatus(presence) => {
                self.update_presence(session, presence);
                Ok(())
            }
        }
    }

    fn join_room(&self, session: &mut Session, join: JoinRoom) -> Result<(), RelayError> {
        // Validate before touching any state.
        let room = RoomCode::parse(&join.room_id).inspect_err(|_| {
            metrics::record_join_rejected("INVALID_ROOM_CODE");
        })?;
        let identity = Identity::parse(&join.identity).inspect_err(|_| {
            metrics::record_join_rejected("INVALID_IDENTITY");
        })?;

        let outcome =
            match self
                .registry
                .join(&room, session.id, identity.clone(), session.presence)
            {
                Ok(outcome) => outcome,
                Err(RelayError::RoomFull(_)) => {
                    metrics::record_join_rejected("ROOM_FULL");
                    info!(
                        target: "relay.session",
                        session_id = %session.id,
                        room = %room,
                        "Join rejected, room full"
                    );
                    self.deliver(session.id, ServerEvent::RoomFull);
                    return Ok(());
                }
                Err(e) => {
                    metrics::record_join_rejected(e.error_code());
                    return Err(e);
                }
            };

        session.room = Some(room.clone());
        session.identity = Some(outcome.identity.clone());
        metrics::set_rooms_active(self.registry.stats().rooms);

        info!(
            target: "relay.session",
            session_id = %session.id,
            room = %room,
            existing = outcome.existing.len(),
            rejoin = !outcome.inserted,
            "Session joined room"
        );

        let announcement = ServerEvent::ParticipantJoined(ParticipantJoined {
            id: session.id,
            identity: outcome.identity.clone(),
        });
        self.fan_out(&outcome.notify(), &announcement);

        let existing = outcome.existing.iter().map(|m| m.summary()).collect();
        self.deliver(session.id, ServerEvent::ExistingParticipants(existing));
        Ok(())
    }

    /// Leave the current room, if any. Registry removal commits before the
    /// remaining members are told.
    pub fn leave_room(&self, session: &mut Session) {
        session.room = None;
        let Some(outcome) = self.registry.leave(session.id) else {
            return;
        };
        metrics::set_rooms_active(self.registry.stats().rooms);

        info!(
            target: "relay.session",
            session_id = %session.id,
            room = %outcome.room,
            remaining = outcome.remaining.len(),
            room_closed = outcome.room_closed,
            "Session left room"
        );

        let departure = ServerEvent::ParticipantLeft(ParticipantLeft { id: session.id });
        self.fan_out(&outcome.remaining, &departure);
    }

    fn forward_description(
        &self,
        session: &Session,
        description: TargetedDescription,
        is_offer: bool,
    ) -> Result<(), RelayError> {
        let room = session.room.as_ref().ok_or(RelayError::NotInRoom)?;
        if !self.target_in_room(session, room, description.target) {
            return Ok(());
        }

        let event = if is_offer {
            ServerEvent::Offer(RelayedDescription {
                sdp: description.sdp,
                caller_id: session.id,
                caller_identity: session.identity.clone(),
            })
        } else {
            ServerEvent::Answer(RelayedDescription {
                sdp: description.sdp,
                caller_id: session.id,
                caller_identity: None,
            })
        };
        self.deliver(description.target, event);
        Ok(())
    }

    fn forward_candidate(
        &self,
        session: &Session,
        candidate: TargetedCandidate,
    ) -> Result<(), RelayError> {
        let room = session.room.as_ref().ok_or(RelayError::NotInRoom)?;
        if !self.target_in_room(session, room, candidate.target) {
            return Ok(());
        }

        self.deliver(
            candidate.target,
            ServerEvent::IceCandidate(RelayedCandidate {
                candidate: candidate.candidate,
                caller_id: session.id,
            }),
        );
        Ok(())
    }

    fn relay_chat(&self, session: &Session, chat: &OutgoingChat) -> Result<(), RelayError> {
        let (room, identity) = Self::membership(session)?;
        let recipient = chat.recipient()?;

        let message = strip_markup(chat.message.trim());
        if message.is_empty() {
            metrics::record_message_dropped("empty");
            return Ok(());
        }

        match recipient {
            ChatRecipient::Room => {
                let event = ServerEvent::ChatMessage(RelayedChat {
                    id: session.id,
                    identity: identity.clone(),
                    message,
                    private: false,
                });
                self.fan_out(&self.registry.others(session.id), &event);
                self.deliver(session.id, event);
            }
            ChatRecipient::Member(target) => {
                if !self.target_in_room(session, room, target) {
                    return Ok(());
                }
                let event = ServerEvent::ChatMessage(RelayedChat {
                    id: session.id,
                    identity: identity.clone(),
                    message,
                    private: true,
                });
                self.deliver(target, event.clone());
                if target != session.id {
                    self.deliver(session.id, event);
                }
            }
        }
        Ok(())
    }

    fn relay_reaction(
        &self,
        session: &Session,
        reaction: &OutgoingReaction,
    ) -> Result<(), RelayError> {
        let (_, identity) = Self::membership(session)?;

        let emoji = strip_markup(reaction.emoji.trim());
        if emoji.is_empty() || emoji.chars().count() > MAX_REACTION_CHARS {
            return Err(RelayError::Malformed(format!(
                "reaction of {} chars",
                emoji.chars().count()
            )));
        }

        let event = ServerEvent::Reaction(RelayedReaction {
            id: session.id,
            identity: identity.clone(),
            emoji,
        });
        self.fan_out(&self.registry.others(session.id), &event);
        self.deliver(session.id, event);
        Ok(())
    }

    fn relay_hand_raise(&self, session: &Session) -> Result<(), RelayError> {
        let (_, identity) = Self::membership(session)?;

        let event = ServerEvent::HandRaise(RelayedHandRaise {
            id: session.id,
            identity: identity.clone(),
        });
        self.fan_out(&self.registry.others(session.id), &event);
        Ok(())
    }

    /// Presence set outside a room is remembered and applied on join.
    fn update_presence(&self, session: &mut Session, presence: Presence) {
        session.presence = presence;
        let Some(recipients) = self.registry.set_presence(session.id, presence) else {
            return;
        };

        let event = ServerEvent::PresenceStatus(RelayedPresence {
            id: session.id,
            camera: presence.camera,
            mic: presence.mic,
        });
        self.fan_out(&recipients, &event);
    }

    fn membership(session: &Session) -> Result<(&RoomCode, &Identity), RelayError> {
        match (&session.room, &session.identity) {
            (Some(room), Some(identity)) => Ok((room, identity)),
            _ => Err(RelayError::NotInRoom),
        }
    }

    /// Whether `target` shares the sender's room. Unknown targets are dropped
    /// silently; the sender's own timeouts deal with the missing reply.
    fn target_in_room(&self, session: &Session, room: &RoomCode, target: SessionId) -> bool {
        if self.registry.is_member(room, target) {
            return true;
        }
        debug!(
            target: "relay.session",
            session_id = %session.id,
            target_id = %target,
            room = %room,
            "Dropping event for session outside the room"
        );
        metrics::record_message_dropped("unknown_target");
        false
    }

    fn fan_out(&self, recipients: &[SessionId], event: &ServerEvent) {
        for recipient in recipients {
            self.deliver(*recipient, event.clone());
        }
    }

    /// Queue `event` on a session's outbox. Returns false if it was dropped.
    /// A gone session is cleaned up by its own disconnect path; a full one is
    /// evicted and then takes the same path.
    fn deliver(&self, to: SessionId, event: ServerEvent) -> bool {
        let name = event.name();
        let Some(outbox) = self.directory.get(&to) else {
            debug!(target: "relay.session", session_id = %to, event = name, "Recipient gone");
            metrics::record_message_dropped("recipient_gone");
            return false;
        };

        match outbox.sender.try_send(event) {
            Ok(()) => {
                metrics::record_message_forwarded(name);
                true
            }
            Err(TrySendError::Full(_)) => {
                if !outbox.evict.is_cancelled() {
                    warn!(
                        target: "relay.session",
                        session_id = %to,
                        event = name,
                        "Recipient outbox full, evicting slow consumer"
                    );
                    outbox.evict.cancel();
                }
                metrics::record_message_dropped("slow_consumer");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(
                    target: "relay.session",
                    session_id = %to,
                    event = name,
                    "Recipient outbox closed"
                );
                metrics::record_message_dropped("recipient_gone");
                false
            }
        }
    }
}
