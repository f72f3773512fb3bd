//! Broadcast hub: room fan-out and best-effort direct sends.
//!
//! A message is serialized once per broadcast. Transport failures are
//! terminal only for the failing connection — it is pruned from the room's
//! index as a side effect and delivery continues to the rest. Nothing here
//! ever raises to the caller.

use axum::extract::ws::{CloseFrame, Message};
use serde_json::Value;
use tracing::{debug, warn};

use crate::messages;
use crate::registry::SessionRegistry;

/// Close code sent when a user is forcibly removed from a project.
const CLOSE_KICKED: u16 = 4004;

/// Fan a message out to every live connection in a project room. Dead
/// connections found along the way are dropped from the registry.
pub fn broadcast_to_project(registry: &SessionRegistry, project_id: &str, message: &Value) {
    let text = match serde_json::to_string(message) {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "failed to serialize broadcast message");
            return;
        }
    };

    for (connection_id, sender) in registry.room_senders(project_id) {
        if sender.send(Message::Text(text.clone().into())).is_err() {
            warn!(
                connection_id = %connection_id,
                project_id = %project_id,
                "removing dead connection from room"
            );
            registry.prune(&connection_id, project_id);
        }
    }
}

/// Best-effort single-connection send; failures are logged, never thrown.
pub fn send_to_connection(registry: &SessionRegistry, connection_id: &str, message: &Value) {
    let Some(sender) = registry.sender_of(connection_id) else {
        debug!(connection_id = %connection_id, "send to unknown or closed connection");
        return;
    };
    let text = match serde_json::to_string(message) {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "failed to serialize message");
            return;
        }
    };
    if sender.send(Message::Text(text.into())).is_err() {
        warn!(connection_id = %connection_id, "failed to send message to connection");
    }
}

/// Broadcast the current authenticated roster to a room.
pub fn broadcast_online_users(registry: &SessionRegistry, project_id: &str) {
    let users: Vec<Value> = registry
        .online_users(project_id)
        .iter()
        .map(|p| p.display())
        .collect();
    debug!(project_id = %project_id, count = users.len(), "online users broadcast");
    broadcast_to_project(registry, project_id, &messages::online_users(users));
}

/// Reply to a single connection with its room's authenticated roster.
pub fn send_online_users(registry: &SessionRegistry, connection_id: &str, project_id: &str) {
    let users: Vec<Value> = registry
        .online_users(project_id)
        .iter()
        .map(|p| p.display())
        .collect();
    send_to_connection(registry, connection_id, &messages::online_users(users));
}

/// Force-close a connection's transport (kick path). The close frame goes
/// through the same writer task as every other frame, so anything queued
/// before it is still delivered first.
pub fn force_close_connection(registry: &SessionRegistry, connection_id: &str, reason: &str) {
    if let Some(sender) = registry.sender_of(connection_id) {
        let frame = CloseFrame {
            code: CLOSE_KICKED,
            reason: reason.into(),
        };
        let _ = sender.send(Message::Close(Some(frame)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn broadcast_delivers_to_live_connections_and_prunes_dead_ones() {
        let registry = SessionRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        registry.admit("c1", "7", tx1);
        registry.admit("c2", "7", tx2);
        registry.admit("c3", "7", tx3);
        // c2's writer task is gone.
        drop(rx2);

        broadcast_to_project(&registry, "7", &messages::error("probe"));

        assert!(rx1.try_recv().is_ok());
        assert!(rx3.try_recv().is_ok());

        let remaining: Vec<String> = registry
            .room_senders("7")
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(!remaining.contains(&"c2".to_string()));
    }

    #[tokio::test]
    async fn broadcast_serializes_frames_clients_can_parse() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.admit("c1", "7", tx);

        broadcast_online_users(&registry, "7");

        let Some(Message::Text(text)) = rx.try_recv().ok() else {
            panic!("expected a text frame");
        };
        let value: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["type"], "ONLINE_USERS");
        assert_eq!(value["count"], 0);
    }

    #[tokio::test]
    async fn send_to_unknown_connection_is_a_no_op() {
        let registry = SessionRegistry::new();
        send_to_connection(&registry, "ghost", &messages::error("probe"));
    }
}
