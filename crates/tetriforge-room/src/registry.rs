//! The room registry: every room the server knows about.
//!
//! Like the session registries, `RoomRegistry` is not synchronized; the
//! server keeps it behind a mutex and never holds that mutex while calling
//! into a room.

use std::sync::Arc;

use tetriforge_protocol::RoomId;

use crate::{GameRoom, RoomError};

/// Capacity-checked collection of rooms, in creation order.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: Vec<Arc<GameRoom>>,
    capacity: usize,
}

impl RoomRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: Vec::new(),
            capacity,
        }
    }

    /// # Errors
    /// [`RoomError::TooManyRooms`] when full, [`RoomError::NameAlreadyUsed`]
    /// when another room has the same name (case-insensitive).
    pub fn add(&mut self, room: Arc<GameRoom>) -> Result<(), RoomError> {
        if self.rooms.len() >= self.capacity {
            return Err(RoomError::TooManyRooms(self.capacity));
        }
        if self.by_name(room.name()).is_some() {
            return Err(RoomError::NameAlreadyUsed(room.name().to_owned()));
        }
        self.rooms.push(room);
        Ok(())
    }

    pub fn remove(&mut self, id: RoomId) -> Option<Arc<GameRoom>> {
        let index = self.rooms.iter().position(|r| r.id() == id)?;
        Some(self.rooms.remove(index))
    }

    pub fn by_id(&self, id: RoomId) -> Option<Arc<GameRoom>> {
        self.rooms.iter().find(|r| r.id() == id).cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<GameRoom>> {
        self.rooms
            .iter()
            .find(|r| r.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn rooms(&self) -> Vec<Arc<GameRoom>> {
        self.rooms.clone()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.rooms.clear();
    }
}
