//! Room abstraction for the relay.
//!
//! Rooms are named groups of connections eligible for broadcast. A room
//! exists only while it has members.

use crate::connection::ConnectionId;
use std::collections::HashSet;
use tracing::debug;

/// Maximum room name length in bytes.
pub const MAX_ROOM_NAME_LENGTH: usize = 256;

/// Validate a room name.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if name.chars().any(char::is_control) {
        return Err("Room name contains control characters");
    }
    Ok(())
}

/// Membership of one room.
#[derive(Debug)]
pub(crate) struct Room {
    name: String,
    members: HashSet<ConnectionId>,
}

impl Room {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        debug!(room = %name, "Creating room");
        Self {
            name,
            members: HashSet::new(),
        }
    }

    pub(crate) fn join(&mut self, id: ConnectionId) -> bool {
        let added = self.members.insert(id);
        if added {
            debug!(room = %self.name, members = self.members.len(), "Member joined");
        }
        added
    }

    pub(crate) fn leave(&mut self, id: &str) -> bool {
        let removed = self.members.remove(id);
        if removed {
            debug!(room = %self.name, members = self.members.len(), "Member left");
        }
        removed
    }

    pub(crate) fn members(&self) -> impl Iterator<Item = &ConnectionId> + '_ {
        self.members.iter()
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
