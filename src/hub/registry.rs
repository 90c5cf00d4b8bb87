//! Connection and room bookkeeping for the notification hub
//!
//! The registry owns the only `Sender` for every connection queue.
//! Removing a connection drops that sender, which closes the queue.

use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::ConnectionId;

/// Connections that must be evicted after a failed delivery
pub(crate) type Evictions = Vec<(String, ConnectionId)>;

#[derive(Default)]
pub(crate) struct Registry {
    connections: HashMap<String, HashMap<ConnectionId, mpsc::Sender<Bytes>>>,
    rooms: HashMap<String, HashSet<String>>,
    memberships: HashMap<String, HashSet<String>>,
}

impl Registry {
    pub fn insert(&mut self, user_id: &str, id: ConnectionId, sender: mpsc::Sender<Bytes>) {
        self.connections
            .entry(user_id.to_string())
            .or_default()
            .insert(id, sender);
    }

    /// Drop a connection. Returns false when it was already gone.
    pub fn remove(&mut self, user_id: &str, id: ConnectionId) -> bool {
        let Some(conns) = self.connections.get_mut(user_id) else {
            return false;
        };
        if conns.remove(&id).is_none() {
            return false;
        }

        if conns.is_empty() {
            self.connections.remove(user_id);
            self.leave_all_rooms(user_id);
        }
        true
    }

    /// Add a connected user to a room. Unknown users are refused.
    pub fn subscribe(&mut self, user_id: &str, room_id: &str) -> bool {
        if !self.connections.contains_key(user_id) {
            return false;
        }
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.to_string());
        self.memberships
            .entry(user_id.to_string())
            .or_default()
            .insert(room_id.to_string());
        true
    }

    pub fn unsubscribe(&mut self, user_id: &str, room_id: &str) -> bool {
        let removed = match self.rooms.get_mut(room_id) {
            Some(members) => {
                let removed = members.remove(user_id);
                if members.is_empty() {
                    self.rooms.remove(room_id);
                }
                removed
            }
            None => false,
        };
        if let Some(rooms) = self.memberships.get_mut(user_id) {
            rooms.remove(room_id);
            if rooms.is_empty() {
                self.memberships.remove(user_id);
            }
        }
        removed
    }

    fn leave_all_rooms(&mut self, user_id: &str) {
        let Some(rooms) = self.memberships.remove(user_id) else {
            return;
        };
        for room_id in rooms {
            if let Some(members) = self.rooms.get_mut(&room_id) {
                members.remove(user_id);
                if members.is_empty() {
                    self.rooms.remove(&room_id);
                }
            }
        }
    }

    pub fn deliver_to_user(&self, user_id: &str, frame: &Bytes, evictions: &mut Evictions) -> usize {
        let Some(conns) = self.connections.get(user_id) else {
            return 0;
        };
        conns
            .iter()
            .filter(|(id, sender)| offer(user_id, **id, sender, frame, evictions))
            .count()
    }

    pub fn deliver_to_room(&self, room_id: &str, frame: &Bytes, evictions: &mut Evictions) -> usize {
        let Some(members) = self.rooms.get(room_id) else {
            return 0;
        };
        members
            .iter()
            .map(|user_id| self.deliver_to_user(user_id, frame, evictions))
            .sum()
    }

    pub fn deliver_to_all(&self, frame: &Bytes, evictions: &mut Evictions) -> usize {
        self.connections
            .keys()
            .map(|user_id| self.deliver_to_user(user_id, frame, evictions))
            .sum()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.values().map(HashMap::len).sum()
    }

    pub fn user_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.connections.contains_key(user_id)
    }

    pub fn room_members(&self, room_id: &str) -> Vec<String> {
        let mut members: Vec<String> = self
            .rooms
            .get(room_id)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    pub fn rooms_of(&self, user_id: &str) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .memberships
            .get(user_id)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// Drop every connection, closing all queues
    pub fn clear(&mut self) {
        self.connections.clear();
        self.rooms.clear();
        self.memberships.clear();
    }
}

/// Non-blocking enqueue. A full or closed queue marks the connection for eviction.
fn offer(
    user_id: &str,
    id: ConnectionId,
    sender: &mpsc::Sender<Bytes>,
    frame: &Bytes,
    evictions: &mut Evictions,
) -> bool {
    match sender.try_send(frame.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(user_id = %user_id, connection_id = %id, "Connection queue full, evicting");
            evictions.push((user_id.to_string(), id));
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(user_id = %user_id, connection_id = %id, "Connection queue closed, evicting");
            evictions.push((user_id.to_string(), id));
            false
        }
    }
}
