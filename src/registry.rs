//! Session registry and presence tracking.
//!
//! Owns the shared routing tables: connection id → live connection handle,
//! and project id → room (member connection ids plus presence records).
//! All compound mutations happen through the methods here, under a single
//! `DashMap` entry lock per room, so callers never do read-modify-write
//! cycles on the raw maps. Presence is keyed by connection id inside the
//! room, which makes "replace presence on AUTH" a plain map insert and rules
//! out duplicate records for one connection.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use serde_json::{json, Value};

use crate::ws::ConnectionSender;

/// A connection's identity/display record within a room.
///
/// `user_id` stays `None` until the client authenticates; anonymous
/// connections occupy a room slot but are excluded from the visible roster.
#[derive(Debug, Clone)]
pub struct Presence {
    pub connection_id: String,
    pub user_id: Option<i64>,
    pub username: String,
    pub email: String,
    pub project_id: String,
    pub connected_at: i64,
}

impl Presence {
    /// Display shape used in ONLINE_USERS / USER_JOINED / USER_LEFT frames.
    pub fn display(&self) -> Value {
        json!({
            "id": self.user_id,
            "username": self.username,
            "email": self.email,
            "connectionId": self.connection_id,
            "connectedAt": self.connected_at,
        })
    }
}

/// A live connection: the sender half of its writer-task channel.
/// The channel closes when the writer task exits, so `is_open` doubles as
/// the connection's liveness flag.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub sender: ConnectionSender,
}

impl ConnectionHandle {
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Per-project room: member connection ids and their presence records.
#[derive(Debug, Default)]
struct Room {
    members: HashSet<String>,
    presence: HashMap<String, Presence>,
}

/// The shared registry. Rooms are created lazily on first join and dropped
/// when their last member leaves.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    connections: DashMap<String, ConnectionHandle>,
    rooms: DashMap<String, Room>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection anonymously and join its project room.
    /// Returns the anonymous presence record.
    pub fn admit(
        &self,
        connection_id: &str,
        project_id: &str,
        sender: ConnectionSender,
    ) -> Presence {
        let presence = Presence {
            connection_id: connection_id.to_string(),
            user_id: None,
            username: "Anonymous".to_string(),
            email: String::new(),
            project_id: project_id.to_string(),
            connected_at: crate::messages::now_millis(),
        };

        self.connections
            .insert(connection_id.to_string(), ConnectionHandle { sender });

        let mut room = self.rooms.entry(project_id.to_string()).or_default();
        room.members.insert(connection_id.to_string());
        room.presence
            .insert(connection_id.to_string(), presence.clone());

        presence
    }

    /// Replace the presence record for a connection with an authenticated
    /// identity. The insert under the room entry lock removes the old record
    /// and installs the new one as one step. Returns the new record, or
    /// `None` if the connection is not in the room (already gone).
    pub fn authenticate(
        &self,
        connection_id: &str,
        project_id: &str,
        user_id: Option<i64>,
        username: &str,
        email: &str,
    ) -> Option<Presence> {
        let mut room = self.rooms.get_mut(project_id)?;
        if !room.members.contains(connection_id) {
            return None;
        }
        let presence = Presence {
            connection_id: connection_id.to_string(),
            user_id,
            username: username.to_string(),
            email: email.to_string(),
            project_id: project_id.to_string(),
            connected_at: crate::messages::now_millis(),
        };
        room.presence
            .insert(connection_id.to_string(), presence.clone());
        Some(presence)
    }

    /// Remove a connection from the registry and its room; drops the room if
    /// it is now empty. Returns the departing presence record so the caller
    /// can announce authenticated departures.
    pub fn remove(&self, connection_id: &str, project_id: &str) -> Option<Presence> {
        self.connections.remove(connection_id);

        let mut departed = None;
        if let Some(mut room) = self.rooms.get_mut(project_id) {
            room.members.remove(connection_id);
            departed = room.presence.remove(connection_id);
        }
        self.rooms
            .remove_if(project_id, |_, room| room.members.is_empty());
        departed
    }

    /// Drop a dead connection encountered mid-broadcast. Leaves the presence
    /// record alone — the connection's own actor removes it on close.
    pub fn prune(&self, connection_id: &str, project_id: &str) {
        self.connections.remove(connection_id);
        if let Some(mut room) = self.rooms.get_mut(project_id) {
            room.members.remove(connection_id);
        }
    }

    pub fn sender_of(&self, connection_id: &str) -> Option<ConnectionSender> {
        self.connections
            .get(connection_id)
            .filter(|h| h.is_open())
            .map(|h| h.sender.clone())
    }

    /// Snapshot of a room's members for fan-out.
    pub fn room_senders(&self, project_id: &str) -> Vec<(String, ConnectionSender)> {
        let Some(room) = self.rooms.get(project_id) else {
            return Vec::new();
        };
        room.members
            .iter()
            .filter_map(|id| {
                self.connections
                    .get(id)
                    .map(|h| (id.clone(), h.sender.clone()))
            })
            .collect()
    }

    /// Authenticated presence records for a room, in display order.
    pub fn online_users(&self, project_id: &str) -> Vec<Presence> {
        let Some(room) = self.rooms.get(project_id) else {
            return Vec::new();
        };
        let mut users: Vec<Presence> = room
            .presence
            .values()
            .filter(|p| p.user_id.is_some())
            .cloned()
            .collect();
        users.sort_by_key(|p| p.connected_at);
        users
    }

    /// The presence record for a single connection, if any.
    pub fn presence_of(&self, connection_id: &str, project_id: &str) -> Option<Presence> {
        self.rooms
            .get(project_id)?
            .presence
            .get(connection_id)
            .cloned()
    }

    /// Resolve the connection id of an authenticated user within a room.
    pub fn find_connection_by_user(&self, project_id: &str, user_id: i64) -> Option<String> {
        self.rooms.get(project_id)?.presence.values().find_map(|p| {
            (p.user_id == Some(user_id)).then(|| p.connection_id.clone())
        })
    }

    pub fn room_exists(&self, project_id: &str) -> bool {
        self.rooms.contains_key(project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn sender() -> ConnectionSender {
        mpsc::unbounded_channel().0
    }

    #[test]
    fn admit_creates_anonymous_presence() {
        let reg = SessionRegistry::new();
        let p = reg.admit("c1", "7", sender());
        assert_eq!(p.user_id, None);
        assert_eq!(p.username, "Anonymous");
        assert!(reg.online_users("7").is_empty());
        assert_eq!(reg.room_senders("7").len(), 1);
    }

    #[test]
    fn authenticate_replaces_presence_without_duplicates() {
        let reg = SessionRegistry::new();
        reg.admit("c1", "7", sender());
        reg.authenticate("c1", "7", Some(5), "ann", "ann@example.com")
            .unwrap();
        // A second AUTH for the same connection replaces, never accumulates.
        reg.authenticate("c1", "7", Some(5), "ann2", "ann@example.com")
            .unwrap();

        let online = reg.online_users("7");
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].username, "ann2");
        assert_eq!(online[0].user_id, Some(5));
    }

    #[test]
    fn authenticate_unknown_connection_is_none() {
        let reg = SessionRegistry::new();
        assert!(reg
            .authenticate("ghost", "7", Some(1), "x", "")
            .is_none());
    }

    #[test]
    fn remove_clears_presence_and_drops_empty_room() {
        let reg = SessionRegistry::new();
        reg.admit("c1", "7", sender());
        reg.admit("c2", "7", sender());
        reg.authenticate("c1", "7", Some(5), "ann", "").unwrap();

        let departed = reg.remove("c1", "7").unwrap();
        assert_eq!(departed.user_id, Some(5));
        assert!(reg.online_users("7").is_empty());
        assert!(reg.room_exists("7"));

        reg.remove("c2", "7");
        assert!(!reg.room_exists("7"));
    }

    #[test]
    fn remove_is_idempotent() {
        let reg = SessionRegistry::new();
        reg.admit("c1", "7", sender());
        assert!(reg.remove("c1", "7").is_some());
        assert!(reg.remove("c1", "7").is_none());
    }

    #[test]
    fn rooms_are_independent() {
        let reg = SessionRegistry::new();
        reg.admit("c1", "7", sender());
        reg.admit("c2", "8", sender());
        reg.authenticate("c2", "8", Some(9), "bob", "").unwrap();

        assert!(reg.online_users("7").is_empty());
        assert_eq!(reg.online_users("8").len(), 1);
        assert_eq!(reg.room_senders("7").len(), 1);
    }

    #[test]
    fn find_connection_by_user_scans_room_presence() {
        let reg = SessionRegistry::new();
        reg.admit("c1", "7", sender());
        reg.admit("c2", "7", sender());
        reg.authenticate("c2", "7", Some(9), "bob", "").unwrap();

        assert_eq!(reg.find_connection_by_user("7", 9).as_deref(), Some("c2"));
        assert_eq!(reg.find_connection_by_user("7", 5), None);
        assert_eq!(reg.find_connection_by_user("8", 9), None);
    }

    #[test]
    fn prune_removes_member_but_keeps_presence() {
        let reg = SessionRegistry::new();
        reg.admit("c1", "7", sender());
        reg.authenticate("c1", "7", Some(5), "ann", "").unwrap();

        reg.prune("c1", "7");
        assert!(reg.room_senders("7").is_empty());
        // Presence cleanup belongs to the actor's close path.
        assert_eq!(reg.online_users("7").len(), 1);
    }
}
