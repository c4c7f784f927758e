//! In-memory room registry: lifecycle entry and removal.
//!
//! Owned exclusively by the session engine; handlers never reach a
//! room except through it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::types::{Room, RoomId};
use crate::error::{RoomError, RoomResult};

/// One row of the room discovery list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub current_count: usize,
    pub capacity: usize,
}

/// Mapping of room id to room state.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new room. Fails if the id is already taken.
    pub fn create(&mut self, room: Room) -> RoomResult<&mut Room> {
        let id = room.room_id.clone();
        if self.rooms.contains_key(&id) {
            return Err(RoomError::DuplicateRoom(id));
        }
        Ok(self.rooms.entry(id).or_insert(room))
    }

    /// Insert or replace a room (used when loading a snapshot).
    pub fn insert(&mut self, room: Room) -> &mut Room {
        let id = room.room_id.clone();
        self.rooms.insert(id.clone(), room);
        self.rooms.get_mut(&id).expect("just inserted")
    }

    pub fn get(&self, room_id: &str) -> RoomResult<&Room> {
        self.rooms
            .get(room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))
    }

    pub fn get_mut(&mut self, room_id: &str) -> RoomResult<&mut Room> {
        self.rooms
            .get_mut(room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))
    }

    /// Remove a room, returning it if it existed.
    pub fn remove(&mut self, room_id: &str) -> Option<Room> {
        self.rooms.remove(room_id)
    }

    /// Discovery list for connected clients. Order unspecified.
    pub fn list(&self) -> Vec<RoomSummary> {
        self.rooms
            .values()
            .map(|r| RoomSummary {
                room_id: r.room_id.clone(),
                current_count: r.participants.len(),
                capacity: r.capacity,
            })
            .collect()
    }

    /// Room ids a given client currently belongs to.
    pub fn rooms_of(&self, client_id: &str) -> Vec<RoomId> {
        self.rooms
            .values()
            .filter(|r| r.participants.contains_key(client_id))
            .map(|r| r.room_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::types::{ResolutionPolicy, RoomConfig};

    fn sample(id: &str) -> Room {
        Room::new(
            RoomConfig {
                room_id: id.to_string(),
                capacity: 3,
                policy: ResolutionPolicy::Plurality,
                backlog: vec!["a".to_string()],
            },
            "c1".to_string(),
            "alice".to_string(),
        )
    }

    #[test]
    fn test_create_and_get() {
        let mut reg = RoomRegistry::new();
        reg.create(sample("r1")).unwrap();
        assert_eq!(reg.get("r1").unwrap().room_id, "r1");
        assert!(matches!(reg.get("r2"), Err(RoomError::RoomNotFound(_))));
    }

    #[test]
    fn test_duplicate_create_rejected() {
        let mut reg = RoomRegistry::new();
        reg.create(sample("r1")).unwrap();
        let err = reg.create(sample("r1")).unwrap_err();
        assert!(matches!(err, RoomError::DuplicateRoom(_)));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_remove_then_get_fails() {
        let mut reg = RoomRegistry::new();
        reg.create(sample("r1")).unwrap();
        assert!(reg.remove("r1").is_some());
        assert!(matches!(reg.get("r1"), Err(RoomError::RoomNotFound(_))));
        assert!(reg.remove("r1").is_none());
    }

    #[test]
    fn test_list_summaries() {
        let mut reg = RoomRegistry::new();
        reg.create(sample("r1")).unwrap();
        let mut r2 = sample("r2");
        r2.add_participant("c2".to_string(), "bob".to_string())
            .unwrap();
        reg.create(r2).unwrap();

        let mut list = reg.list();
        list.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].current_count, 1);
        assert_eq!(list[1].current_count, 2);
        assert_eq!(list[1].capacity, 3);
    }

    #[test]
    fn test_rooms_of_client() {
        let mut reg = RoomRegistry::new();
        reg.create(sample("r1")).unwrap();
        reg.create(sample("r2")).unwrap();
        let rooms = reg.rooms_of("c1");
        assert_eq!(rooms.len(), 2);
        assert!(reg.rooms_of("nobody").is_empty());
    }

    #[test]
    fn test_insert_replaces() {
        let mut reg = RoomRegistry::new();
        reg.create(sample("r1")).unwrap();
        let mut replacement = sample("r1");
        replacement.capacity = 9;
        reg.insert(replacement);
        assert_eq!(reg.get("r1").unwrap().capacity, 9);
        assert_eq!(reg.len(), 1);
    }
}
