//! Client message router.
//!
//! Stateless dispatch on the inbound `type` tag. Every failure while
//! handling a message is caught here and turned into a sender-directed
//! ERROR frame — nothing propagates to the connection's read loop.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::execution::bridge::{self, ExecutePayload};
use crate::files::{FileError, FileKind};
use crate::messages::{self, ClientMessage};
use crate::moderation;
use crate::state::AppState;
use crate::ws::broadcast;

#[derive(Debug, Error)]
enum DispatchError {
    #[error("{0}")]
    File(#[from] FileError),
}

/// Parse one inbound text frame and dispatch it. Never returns an error.
pub async fn handle_message(
    state: &AppState,
    connection_id: &str,
    project_id: &str,
    text: &str,
) {
    debug!(
        connection_id = %connection_id,
        project_id = %project_id,
        payload = text,
        "received client message"
    );

    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(connection_id = %connection_id, error = %e, "malformed inbound JSON");
            broadcast::send_to_connection(
                &state.registry,
                connection_id,
                &messages::error(&format!("Message processing error: {e}")),
            );
            return;
        }
    };

    let message = match serde_json::from_value::<ClientMessage>(value.clone()) {
        Ok(m) => m,
        Err(e) => {
            let reply = match value.get("type").and_then(Value::as_str) {
                Some(t) if e.to_string().starts_with("unknown variant") => {
                    warn!(connection_id = %connection_id, message_type = t, "unknown message type");
                    format!("Unknown message type: {t}")
                }
                Some(_) | None => format!("Message processing error: {e}"),
            };
            broadcast::send_to_connection(
                &state.registry,
                connection_id,
                &messages::error(&reply),
            );
            return;
        }
    };

    if let Err(e) = dispatch(state, connection_id, project_id, message).await {
        error!(connection_id = %connection_id, error = %e, "error handling message");
        broadcast::send_to_connection(
            &state.registry,
            connection_id,
            &messages::error(&format!("Message processing error: {e}")),
        );
    }
}

async fn dispatch(
    state: &AppState,
    connection_id: &str,
    project_id: &str,
    message: ClientMessage,
) -> Result<(), DispatchError> {
    match message {
        ClientMessage::Auth {
            user_id,
            username,
            email,
        } => handle_auth(state, connection_id, project_id, user_id, username, email),
        ClientMessage::GetOnlineUsers => {
            info!(project_id = %project_id, "online users requested");
            broadcast::send_online_users(&state.registry, connection_id, project_id);
            Ok(())
        }
        ClientMessage::FileSave { file_id, content } => {
            handle_file_save(state, connection_id, project_id, file_id, &content);
            Ok(())
        }
        ClientMessage::FileCreate {
            file_name,
            path,
            file_type,
            parent_id,
        } => handle_file_create(
            state,
            connection_id,
            project_id,
            &file_name,
            &path,
            &file_type,
            parent_id,
        ),
        ClientMessage::FileDelete { file_id } => {
            handle_file_delete(state, connection_id, project_id, file_id)
        }
        ClientMessage::FileRename {
            file_id,
            new_file_name,
        } => handle_file_rename(state, connection_id, project_id, file_id, &new_file_name),
        ClientMessage::ExecuteCode { code, files, .. } => {
            handle_execute_code(state, connection_id, code, files);
            Ok(())
        }
        ClientMessage::SendInput { input, .. } => {
            bridge::send_input(state, connection_id, &input).await;
            Ok(())
        }
        ClientMessage::StopExecution { .. } => {
            bridge::stop(state, connection_id).await;
            Ok(())
        }
        ClientMessage::CursorMove => {
            debug!(project_id = %project_id, "cursor move");
            Ok(())
        }
        ClientMessage::KickUser { user_id } => {
            moderation::kick_user(state, connection_id, project_id, user_id).await;
            Ok(())
        }
    }
}

/// Upgrade the connection's presence with the identity asserted by the
/// client. The claim is taken at face value — there is deliberately no
/// verification at this layer (see DESIGN.md).
fn handle_auth(
    state: &AppState,
    connection_id: &str,
    project_id: &str,
    user_id: Option<i64>,
    username: Option<String>,
    email: Option<String>,
) -> Result<(), DispatchError> {
    let username = username.unwrap_or_else(|| "Unknown".to_string());
    let email = email.unwrap_or_default();

    info!(
        connection_id = %connection_id,
        project_id = %project_id,
        user_id = ?user_id,
        username = %username,
        "authentication"
    );

    let Some(presence) =
        state
            .registry
            .authenticate(connection_id, project_id, user_id, &username, &email)
    else {
        // Connection left the room before the AUTH frame was handled.
        return Ok(());
    };

    broadcast::send_to_connection(
        &state.registry,
        connection_id,
        &messages::auth_success(presence.display()),
    );
    broadcast::broadcast_to_project(
        &state.registry,
        project_id,
        &messages::user_joined(presence.display()),
    );
    broadcast::broadcast_online_users(&state.registry, project_id);
    Ok(())
}

fn handle_file_save(
    state: &AppState,
    connection_id: &str,
    project_id: &str,
    file_id: i64,
    content: &str,
) {
    match state.files.update_file(file_id, content) {
        Ok(()) => {
            broadcast::broadcast_to_project(
                &state.registry,
                project_id,
                &messages::file_saved_broadcast(file_id, content, connection_id),
            );
            broadcast::send_to_connection(
                &state.registry,
                connection_id,
                &messages::file_op_confirmation("FILE_SAVED", "File saved successfully"),
            );
        }
        Err(e) => {
            error!(connection_id = %connection_id, file_id, error = %e, "failed to save file");
            broadcast::send_to_connection(
                &state.registry,
                connection_id,
                &messages::error(&format!("Failed to save file: {e}")),
            );
        }
    }
}

fn handle_file_create(
    state: &AppState,
    connection_id: &str,
    project_id: &str,
    file_name: &str,
    path: &str,
    file_type: &str,
    parent_id: i64,
) -> Result<(), DispatchError> {
    info!(project_id = %project_id, file_name = %file_name, "file create requested");
    let kind = FileKind::parse(file_type)?;
    let record = state
        .files
        .create_file(project_id, file_name, path, kind, parent_id)?;
    let file = serde_json::to_value(&record).unwrap_or(Value::Null);
    broadcast::broadcast_to_project(
        &state.registry,
        project_id,
        &messages::file_created_broadcast(file, connection_id),
    );
    Ok(())
}

fn handle_file_delete(
    state: &AppState,
    connection_id: &str,
    project_id: &str,
    file_id: i64,
) -> Result<(), DispatchError> {
    info!(project_id = %project_id, file_id, "file delete requested");
    state.files.delete_file(file_id)?;
    broadcast::broadcast_to_project(
        &state.registry,
        project_id,
        &messages::file_deleted_broadcast(file_id, connection_id),
    );
    broadcast::send_to_connection(
        &state.registry,
        connection_id,
        &messages::file_op_confirmation("FILE_DELETED", "File deleted successfully"),
    );
    Ok(())
}

fn handle_file_rename(
    state: &AppState,
    connection_id: &str,
    project_id: &str,
    file_id: i64,
    name: &str,
) -> Result<(), DispatchError> {
    info!(project_id = %project_id, file_id, "file rename requested");
    state.files.rename_file(file_id, name)?;
    broadcast::broadcast_to_project(
        &state.registry,
        project_id,
        &messages::file_renamed_broadcast(file_id, name, connection_id),
    );
    broadcast::send_to_connection(
        &state.registry,
        connection_id,
        &messages::file_op_confirmation("FILE_RENAMED", "File renamed successfully"),
    );
    Ok(())
}

/// Launch an execution off this connection's message loop so the client
/// stays responsive while the engine runs.
fn handle_execute_code(
    state: &AppState,
    connection_id: &str,
    code: Option<String>,
    files: Option<std::collections::HashMap<String, String>>,
) {
    let payload = if let Some(files) = files {
        info!(connection_id = %connection_id, count = files.len(), "multi-file execution requested");
        ExecutePayload::Multi { files }
    } else if let Some(code) = code {
        info!(connection_id = %connection_id, len = code.len(), "single-file execution requested");
        ExecutePayload::Single { code }
    } else {
        broadcast::send_to_connection(
            &state.registry,
            connection_id,
            &messages::error("No code or files provided"),
        );
        return;
    };

    tokio::spawn(bridge::start(
        state.clone(),
        connection_id.to_string(),
        payload,
    ));
}
