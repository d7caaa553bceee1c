//! Room registry: which connections are in which room.
//!
//! # Responsibilities
//! - Map room ids to their ordered member lists
//! - Keep every connection in at most one room
//! - Make deregistration idempotent
//!
//! # Design Decisions
//! - Member order is join order, and broadcasts follow it
//! - Rooms are created on first join and dropped once empty
//! - A room's member list is locked for the duration of one mutation or one
//!   broadcast pass, so the two never interleave

use std::fmt;

use dashmap::DashMap;

use crate::net::connection::{ConnectionId, OutboundSender};

/// Room identifier taken from the `room` query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(String);

impl RoomId {
    /// Room used when the client names none.
    pub const DEFAULT: &'static str = "0";

    /// Build a room id; an empty name maps to the default room.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.is_empty() {
            Self::default()
        } else {
            Self(name)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Process-wide room membership.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Vec<OutboundSender>>,
    memberships: DashMap<ConnectionId, RoomId>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a connection to a room, creating the room if needed.
    ///
    /// A connection already registered elsewhere is moved.
    pub fn register(&self, member: OutboundSender, room: RoomId) {
        let id = member.id();
        if let Some(previous) = self.memberships.insert(id, room.clone()) {
            if previous != room {
                self.remove_from_room(&previous, id);
            } else {
                // Re-registering in the same room keeps the original position.
                return;
            }
        }
        self.rooms.entry(room.clone()).or_default().push(member);
        tracing::debug!(connection_id = %id, room = %room, "Joined room");
    }

    /// Remove a connection from its room. Safe to call more than once.
    ///
    /// Returns the room it was in, if any.
    pub fn deregister(&self, id: ConnectionId) -> Option<RoomId> {
        let (_, room) = self.memberships.remove(&id)?;
        self.remove_from_room(&room, id);
        tracing::debug!(connection_id = %id, room = %room, "Left room");
        Some(room)
    }

    /// Run `f` with exclusive access to a room's member list.
    ///
    /// Returns `None` when the room does not exist. Members removed by `f`
    /// must be passed to [`RoomRegistry::forget`] afterwards.
    pub(crate) fn with_members<R>(
        &self,
        room: &RoomId,
        f: impl FnOnce(&mut Vec<OutboundSender>) -> R,
    ) -> Option<R> {
        let mut members = self.rooms.get_mut(room)?;
        Some(f(&mut *members))
    }

    /// Drop membership records for connections already removed from `room`.
    pub(crate) fn forget(&self, room: &RoomId, ids: &[ConnectionId]) {
        for id in ids {
            self.memberships.remove_if(id, |_, current| current == room);
        }
        self.remove_if_empty(room);
    }

    /// Room the connection currently belongs to.
    pub fn room_of(&self, id: ConnectionId) -> Option<RoomId> {
        self.memberships.get(&id).map(|r| r.value().clone())
    }

    /// Member ids of a room in join order.
    pub fn room_members(&self, room: &RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().map(OutboundSender::id).collect())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.memberships.len()
    }

    fn remove_from_room(&self, room: &RoomId, id: ConnectionId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.retain(|member| member.id() != id);
        }
        self.remove_if_empty(room);
    }

    fn remove_if_empty(&self, room: &RoomId) {
        if self.rooms.remove_if(room, |_, members| members.is_empty()).is_some() {
            tracing::debug!(room = %room, "Room emptied");
        }
    }
}
