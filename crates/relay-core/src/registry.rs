//! Connection and room registry.
//!
//! Two coupled views: connection id -> record, and room name -> member ids.
//! Every registered connection with a room is a member of exactly that room,
//! and a room entry exists only while it has members. The registry is owned
//! by the dispatch engine task and never shared.

use crate::connection::{ConnectionId, ConnectionRecord};
use crate::room::Room;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub(crate) struct Registry {
    connections: HashMap<ConnectionId, ConnectionRecord>,
    rooms: HashMap<String, Room>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a record and join its room.
    ///
    /// Hands the record back if the id is already registered.
    pub(crate) fn insert(&mut self, record: ConnectionRecord) -> Result<(), ConnectionRecord> {
        if self.connections.contains_key(record.id()) {
            return Err(record);
        }

        if let Some(room) = record.room() {
            self.rooms
                .entry(room.to_string())
                .or_insert_with(|| Room::new(room))
                .join(record.id().clone());
        }
        self.connections.insert(record.id().clone(), record);
        Ok(())
    }

    /// Remove a record and leave its room, deleting the room if it empties.
    pub(crate) fn remove(&mut self, id: &str) -> Option<ConnectionRecord> {
        let record = self.connections.remove(id)?;

        if let Some(name) = record.room() {
            if let Some(room) = self.rooms.get_mut(name) {
                room.leave(id);
                if room.is_empty() {
                    self.rooms.remove(name);
                    debug!(room = %name, "Deleted empty room");
                }
            }
        }

        Some(record)
    }

    pub(crate) fn get(&self, id: &str) -> Option<&ConnectionRecord> {
        self.connections.get(id)
    }

    pub(crate) fn room_exists(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Records of every member of `room` except `exclude`.
    pub(crate) fn room_recipients<'a>(
        &'a self,
        room: &str,
        exclude: &'a str,
    ) -> impl Iterator<Item = &'a ConnectionRecord> + 'a {
        self.rooms
            .get(room)
            .into_iter()
            .flat_map(|r| r.members())
            .filter(move |id| id.as_str() != exclude)
            .filter_map(move |id| self.connections.get(id))
    }

    /// Member ids of `room`, sorted.
    pub(crate) fn room_members(&self, room: &str) -> Vec<ConnectionId> {
        let mut members: Vec<ConnectionId> = self
            .rooms
            .get(room)
            .map(|r| r.members().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub(crate) fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Remove every record.
    pub(crate) fn drain(&mut self) -> Vec<ConnectionRecord> {
        self.rooms.clear();
        self.connections.drain().map(|(_, record)| record).collect()
    }

    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let members_registered = self.rooms.iter().all(|(name, room)| {
            !room.is_empty()
                && room.members().all(|id| {
                    self.connections
                        .get(id)
                        .map_or(false, |r| r.room() == Some(name.as_str()))
                })
        });
        let records_indexed = self.connections.values().all(|r| match r.room() {
            Some(name) => self.rooms.get(name).map_or(false, |room| room.contains(r.id().as_str())),
            None => true,
        });
        members_registered && records_indexed
    }
}
