//! Room Registry: which session belongs to which room.
//!
//! Rooms live in a `DashMap`, each behind its own `Mutex`, so mutations of
//! one room are serialized while different rooms proceed in parallel. A
//! secondary index maps every session to the single room it occupies.
//!
//! No method awaits or performs I/O while a room lock is held. Callers get
//! back the recipients of the membership notification and deliver it after
//! the mutation has committed.
//!
//! A room is created on first join and removed when its last member
//! leaves. Removal marks the room `closed` under its lock before the map
//! entry is dropped, so a concurrent joiner holding a stale handle retries
//! against a fresh room instead of joining a room that is going away.

use crate::errors::RelayError;
use common::types::{Identity, Presence, RoomCode, SessionId};
use dashmap::DashMap;
use signaling_protocol::events::ParticipantSummary;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// One room member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: SessionId,
    pub identity: Identity,
    pub presence: Presence,
}

impl Member {
    /// Wire form used in `existing-participants`.
    #[must_use]
    pub fn summary(&self) -> ParticipantSummary {
        ParticipantSummary {
            id: self.id,
            identity: self.identity.clone(),
            camera: self.presence.camera,
            mic: self.presence.mic,
        }
    }
}

#[derive(Debug, Default)]
struct Room {
    /// Members in join order.
    members: Vec<Member>,
    closed: bool,
}

/// Result of an accepted join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub room: RoomCode,
    /// Everyone else in the room, in join order.
    pub existing: Vec<Member>,
    /// False when the session was already a member (idempotent re-join).
    pub inserted: bool,
    /// Identity on record. A re-join keeps the one from the first join.
    pub identity: Identity,
}

impl JoinOutcome {
    /// Sessions that must receive `participant-joined`. Empty for a re-join.
    #[must_use]
    pub fn notify(&self) -> Vec<SessionId> {
        if self.inserted {
            self.existing.iter().map(|m| m.id).collect()
        } else {
            Vec::new()
        }
    }
}

/// Result of a leave that removed a member.
#[derive(Debug, Clone)]
pub struct LeaveOutcome {
    pub room: RoomCode,
    pub member: Member,
    /// Sessions that must receive `participant-left`.
    pub remaining: Vec<SessionId>,
    /// The room became empty and was removed.
    pub room_closed: bool,
}

/// Point-in-time counts for gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub rooms: usize,
    pub sessions: usize,
}

/// Capacity-bounded room membership.
#[derive(Debug)]
pub struct RoomRegistry {
    capacity: usize,
    rooms: DashMap<RoomCode, Arc<Mutex<Room>>>,
    sessions: DashMap<SessionId, RoomCode>,
}

impl RoomRegistry {
    /// Create an empty registry. `capacity` is clamped to at least 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rooms: DashMap::new(),
            sessions: DashMap::new(),
        }
    }

    /// Maximum members per room.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add `session` to `room`.
    ///
    /// Re-joining the room the session is already in is a no-op that still
    /// returns the current membership.
    ///
    /// # Errors
    ///
    /// - `RelayError::RoomFull` if the room holds `capacity` members
    /// - `RelayError::AlreadyInRoom` if the session is in a different room
    ///
    /// A rejected join leaves the registry unchanged.
    pub fn join(
        &self,
        room: &RoomCode,
        session: SessionId,
        identity: Identity,
        presence: Presence,
    ) -> Result<JoinOutcome, RelayError> {
        if let Some(current) = self.room_of(session) {
            if &current != room {
                return Err(RelayError::AlreadyInRoom(current));
            }
        }

        loop {
            let handle = Arc::clone(
                self.rooms
                    .entry(room.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(Room::default())))
                    .value(),
            );
            let mut guard = lock(&handle);

            if guard.closed {
                drop(guard);
                self.rooms.remove_if(room, |_, r| Arc::ptr_eq(r, &handle));
                continue;
            }

            if let Some(current) = guard.members.iter().find(|m| m.id == session) {
                let identity = current.identity.clone();
                let existing = guard
                    .members
                    .iter()
                    .filter(|m| m.id != session)
                    .cloned()
                    .collect();
                return Ok(JoinOutcome {
                    room: room.clone(),
                    existing,
                    inserted: false,
                    identity,
                });
            }

            if guard.members.len() >= self.capacity {
                debug!(
                    target: "relay.registry",
                    room = %room,
                    session_id = %session,
                    capacity = self.capacity,
                    "Join rejected, room full"
                );
                return Err(RelayError::RoomFull(room.clone()));
            }

            let existing = guard.members.clone();
            guard.members.push(Member {
                id: session,
                identity: identity.clone(),
                presence,
            });
            self.sessions.insert(session, room.clone());

            debug!(
                target: "relay.registry",
                room = %room,
                session_id = %session,
                members = guard.members.len(),
                "Session joined room"
            );

            return Ok(JoinOutcome {
                room: room.clone(),
                existing,
                inserted: true,
                identity,
            });
        }
    }

    /// Remove `session` from whatever room it occupies. Returns `None` if it
    /// was not in a room.
    pub fn leave(&self, session: SessionId) -> Option<LeaveOutcome> {
        let (_, room) = self.sessions.remove(&session)?;
        let handle = self.rooms.get(&room).map(|r| Arc::clone(r.value()))?;

        let mut guard = lock(&handle);
        let position = guard.members.iter().position(|m| m.id == session)?;
        let member = guard.members.remove(position);
        let remaining: Vec<SessionId> = guard.members.iter().map(|m| m.id).collect();
        let room_closed = guard.members.is_empty();

        if room_closed {
            guard.closed = true;
            drop(guard);
            self.rooms.remove_if(&room, |_, r| Arc::ptr_eq(r, &handle));
        }

        debug!(
            target: "relay.registry",
            room = %room,
            session_id = %session,
            remaining = remaining.len(),
            room_closed,
            "Session left room"
        );

        Some(LeaveOutcome {
            room,
            member,
            remaining,
            room_closed,
        })
    }

    /// Consistent snapshot of a room's members in join order.
    #[must_use]
    pub fn members(&self, room: &RoomCode) -> Vec<Member> {
        self.room_handle(room)
            .map(|handle| lock(&handle).members.clone())
            .unwrap_or_default()
    }

    /// Room the session currently occupies.
    #[must_use]
    pub fn room_of(&self, session: SessionId) -> Option<RoomCode> {
        self.sessions.get(&session).map(|r| r.value().clone())
    }

    /// Whether `session` is currently a member of `room`.
    #[must_use]
    pub fn is_member(&self, room: &RoomCode, session: SessionId) -> bool {
        self.sessions
            .get(&session)
            .is_some_and(|r| r.value() == room)
    }

    /// Fan-out snapshot: everyone in the session's room except the session.
    #[must_use]
    pub fn others(&self, session: SessionId) -> Vec<SessionId> {
        let Some(room) = self.room_of(session) else {
            return Vec::new();
        };
        self.room_handle(&room)
            .map(|handle| {
                lock(&handle)
                    .members
                    .iter()
                    .map(|m| m.id)
                    .filter(|id| *id != session)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Record new presence flags. Returns the sessions to notify, or `None`
    /// if the session is not in a room.
    pub fn set_presence(&self, session: SessionId, presence: Presence) -> Option<Vec<SessionId>> {
        let room = self.room_of(session)?;
        let handle = self.room_handle(&room)?;
        let mut guard = lock(&handle);
        let member = guard.members.iter_mut().find(|m| m.id == session)?;
        member.presence = presence;
        Some(
            guard
                .members
                .iter()
                .map(|m| m.id)
                .filter(|id| *id != session)
                .collect(),
        )
    }

    /// Current room and session counts.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            rooms: self.rooms.len(),
            sessions: self.sessions.len(),
        }
    }

    fn room_handle(&self, room: &RoomCode) -> Option<Arc<Mutex<Room>>> {
        self.rooms.get(room).map(|r| Arc::clone(r.value()))
    }
}

/// A panic while holding a room lock cannot leave `Room` half-updated
/// (every mutation is a single push/remove/assign), so poisoning is ignored.
fn lock(room: &Mutex<Room>) -> MutexGuard<'_, Room> {
    room.lock().unwrap_or_else(PoisonError::into_inner)
}
