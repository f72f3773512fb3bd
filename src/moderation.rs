//! Kick handling: remove another user's connection from the project.
//!
//! The target is resolved by scanning the room's presence records for the
//! requested user id. It gets a USER_KICKED notice, a short grace period for
//! the frame to flush, then its transport is force-closed; the room hears a
//! USER_KICKED_BROADCAST afterwards. The target's own actor performs the
//! registry cleanup when its socket drops.

use std::time::Duration;

use tracing::{info, warn};

use crate::messages;
use crate::state::AppState;
use crate::ws::broadcast;

/// Pause between notifying the target and closing its transport, so the
/// notice actually reaches the client before the socket dies.
const KICK_NOTICE_DELAY: Duration = Duration::from_millis(100);

pub async fn kick_user(
    state: &AppState,
    connection_id: &str,
    project_id: &str,
    target_user_id: i64,
) {
    let Some(kicker) = state.registry.presence_of(connection_id, project_id) else {
        broadcast::send_to_connection(
            &state.registry,
            connection_id,
            &messages::error("Authentication required"),
        );
        return;
    };

    info!(
        kicker = ?kicker.user_id,
        target = target_user_id,
        project_id = %project_id,
        "kick requested"
    );

    let Some(target_connection) = state
        .registry
        .find_connection_by_user(project_id, target_user_id)
    else {
        warn!(target = target_user_id, project_id = %project_id, "kick target not found");
        broadcast::send_to_connection(
            &state.registry,
            connection_id,
            &messages::error("User not found or not connected"),
        );
        return;
    };

    broadcast::send_to_connection(
        &state.registry,
        &target_connection,
        &messages::user_kicked(&kicker.username),
    );

    tokio::time::sleep(KICK_NOTICE_DELAY).await;

    broadcast::force_close_connection(
        &state.registry,
        &target_connection,
        "You have been removed from the project",
    );

    broadcast::broadcast_to_project(
        &state.registry,
        project_id,
        &messages::user_kicked_broadcast(target_user_id, kicker.user_id, &kicker.username),
    );

    info!(target = target_user_id, project_id = %project_id, "user kicked");
}
