//! Event vocabulary exchanged between clients and the relay.
//!
//! Negotiation payloads (`sdp`, `candidate`) are carried as opaque JSON
//! values. The relay forwards them untouched; only the mesh client gives
//! them a type (see [`crate::negotiation`]).

use common::error::ValidationError;
use common::types::{Identity, Presence, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Chat target meaning "everyone in the room".
pub const GROUP_TARGET: &str = "group";

/// Events a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Enter a room.
    JoinRoom(JoinRoom),
    /// Leave the current room without closing the connection.
    LeaveRoom,
    /// Session description offer for one peer.
    Offer(TargetedDescription),
    /// Session description answer for one peer.
    Answer(TargetedDescription),
    /// Transport candidate for one peer.
    IceCandidate(TargetedCandidate),
    /// Chat line for the room or one member.
    ChatMessage(OutgoingChat),
    /// Emoji reaction for the room.
    Reaction(OutgoingReaction),
    /// Raise a hand.
    HandRaise,
    /// Camera/microphone toggle.
    PresenceStatus(Presence),
}

impl ClientEvent {
    /// Wire name of the event, used for logging and metric labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join-room",
            ClientEvent::LeaveRoom => "leave-room",
            ClientEvent::Offer(_) => "offer",
            ClientEvent::Answer(_) => "answer",
            ClientEvent::IceCandidate(_) => "ice-candidate",
            ClientEvent::ChatMessage(_) => "chat-message",
            ClientEvent::Reaction(_) => "reaction",
            ClientEvent::HandRaise => "hand-raise",
            ClientEvent::PresenceStatus(_) => "presence-status",
        }
    }
}

/// `join-room` payload. Fields stay raw so the relay can report which one
/// is malformed instead of failing the whole frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room_id: String,
    pub identity: String,
}

/// `offer` / `answer` payload as sent by a client.
///
/// `sender` is optional and never trusted; the relay overwrites it with
/// the session's own id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetedDescription {
    pub sdp: Value,
    pub target: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<SessionId>,
}

/// `ice-candidate` payload as sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetedCandidate {
    pub candidate: Value,
    pub target: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<SessionId>,
}

/// `chat-message` payload as sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingChat {
    pub message: String,
    /// `"group"`, a session id, or absent (treated as `"group"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Who a chat line is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRecipient {
    Room,
    Member(SessionId),
}

impl OutgoingChat {
    /// Resolve the raw target into a recipient.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidSessionId` when the target is neither
    /// `"group"` nor a session id.
    pub fn recipient(&self) -> Result<ChatRecipient, ValidationError> {
        match self.target.as_deref() {
            None | Some(GROUP_TARGET) => Ok(ChatRecipient::Room),
            Some(raw) => raw.parse().map(ChatRecipient::Member),
        }
    }
}

/// `reaction` payload as sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingReaction {
    pub emoji: String,
}

/// Events the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// First frame on every connection: the relay-assigned session id.
    Welcome(Welcome),
    /// Reply to an accepted join: everyone already in the room.
    ExistingParticipants(Vec<ParticipantSummary>),
    /// A newcomer entered the room.
    ParticipantJoined(ParticipantJoined),
    /// A member left the room.
    ParticipantLeft(ParticipantLeft),
    /// Join rejected because the room is at capacity.
    RoomFull,
    /// Offer relayed from `caller_id`.
    Offer(RelayedDescription),
    /// Answer relayed from `caller_id`.
    Answer(RelayedDescription),
    /// Transport candidate relayed from `caller_id`.
    IceCandidate(RelayedCandidate),
    /// Sanitized chat line.
    ChatMessage(RelayedChat),
    /// Sanitized reaction.
    Reaction(RelayedReaction),
    /// A member raised a hand.
    HandRaise(RelayedHandRaise),
    /// A member toggled camera or microphone.
    PresenceStatus(RelayedPresence),
    /// A client message was rejected.
    Error(ErrorNotice),
}

impl ServerEvent {
    /// Wire name of the event, used for logging and metric labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ServerEvent::Welcome(_) => "welcome",
            ServerEvent::ExistingParticipants(_) => "existing-participants",
            ServerEvent::ParticipantJoined(_) => "participant-joined",
            ServerEvent::ParticipantLeft(_) => "participant-left",
            ServerEvent::RoomFull => "room-full",
            ServerEvent::Offer(_) => "offer",
            ServerEvent::Answer(_) => "answer",
            ServerEvent::IceCandidate(_) => "ice-candidate",
            ServerEvent::ChatMessage(_) => "chat-message",
            ServerEvent::Reaction(_) => "reaction",
            ServerEvent::HandRaise(_) => "hand-raise",
            ServerEvent::PresenceStatus(_) => "presence-status",
            ServerEvent::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    pub id: SessionId,
}

/// One entry of `existing-participants`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub id: SessionId,
    pub identity: Identity,
    pub camera: bool,
    pub mic: bool,
}

impl ParticipantSummary {
    #[must_use]
    pub fn presence(&self) -> Presence {
        Presence {
            camera: self.camera,
            mic: self.mic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantJoined {
    pub id: SessionId,
    pub identity: Identity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantLeft {
    pub id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedDescription {
    pub sdp: Value,
    pub caller_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_identity: Option<Identity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedCandidate {
    pub candidate: Value,
    pub caller_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedChat {
    pub id: SessionId,
    pub identity: Identity,
    pub message: String,
    /// True when the line was addressed to one member only.
    pub private: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedReaction {
    pub id: SessionId,
    pub identity: Identity,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedHandRaise {
    pub id: SessionId,
    pub identity: Identity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedPresence {
    pub id: SessionId,
    pub camera: bool,
    pub mic: bool,
}

/// Client-safe rejection notice. `code` is stable, `message` is for humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_names_match_wire_tags() {
        let events = [
            ClientEvent::LeaveRoom,
            ClientEvent::HandRaise,
            ClientEvent::PresenceStatus(Presence::default()),
            ClientEvent::Reaction(OutgoingReaction {
                emoji: "🎉".to_string(),
            }),
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["event"], event.name());
        }
    }

    #[test]
    fn test_server_event_names_match_wire_tags() {
        let id = SessionId::new();
        let events = [
            ServerEvent::RoomFull,
            ServerEvent::ParticipantLeft(ParticipantLeft { id }),
            ServerEvent::Welcome(Welcome { id }),
            ServerEvent::ExistingParticipants(vec![]),
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["event"], event.name());
        }
    }

    #[test]
    fn test_chat_recipient_resolution() {
        let group = OutgoingChat {
            message: "hi".to_string(),
            target: Some("group".to_string()),
        };
        assert_eq!(group.recipient(), Ok(ChatRecipient::Room));

        let absent = OutgoingChat {
            message: "hi".to_string(),
            target: None,
        };
        assert_eq!(absent.recipient(), Ok(ChatRecipient::Room));

        let id = SessionId::new();
        let direct = OutgoingChat {
            message: "hi".to_string(),
            target: Some(id.to_string()),
        };
        assert_eq!(direct.recipient(), Ok(ChatRecipient::Member(id)));

        let bogus = OutgoingChat {
            message: "hi".to_string(),
            target: Some("everyone".to_string()),
        };
        assert_eq!(bogus.recipient(), Err(ValidationError::InvalidSessionId));
    }

    #[test]
    fn test_relayed_offer_wire_shape() {
        let caller = SessionId::new();
        let event = ServerEvent::Offer(RelayedDescription {
            sdp: json!({"type": "offer", "sdp": "v=0"}),
            caller_id: caller,
            caller_identity: Some(Identity::parse("a@b.io").unwrap()),
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "offer",
                "data": {
                    "sdp": {"type": "offer", "sdp": "v=0"},
                    "callerId": caller.to_string(),
                    "callerIdentity": "a@b.io",
                }
            })
        );
    }

    #[test]
    fn test_existing_participants_wire_shape() {
        let id = SessionId::new();
        let event = ServerEvent::ExistingParticipants(vec![ParticipantSummary {
            id,
            identity: Identity::parse("p1@example.com").unwrap(),
            camera: true,
            mic: false,
        }]);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "existing-participants",
                "data": [
                    {
                        "id": id.to_string(),
                        "identity": "p1@example.com",
                        "camera": true,
                        "mic": false
                    }
                ]
            })
        );
    }
}
