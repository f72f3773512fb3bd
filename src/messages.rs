//! Wire protocol for the client-facing WebSocket.
//!
//! Every frame in either direction is a UTF-8 JSON object tagged by a `type`
//! field. Outbound frames additionally carry a `timestamp` in epoch
//! milliseconds. Inbound frames are deserialized into [`ClientMessage`];
//! outbound frames are built by the constructor functions below so the
//! shapes live in one place.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{json, Value};

/// Epoch milliseconds for outbound frame timestamps.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// An inbound client frame, dispatched on its `type` tag.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "AUTH", rename_all = "camelCase")]
    Auth {
        user_id: Option<i64>,
        username: Option<String>,
        email: Option<String>,
    },
    #[serde(rename = "GET_ONLINE_USERS")]
    GetOnlineUsers,
    #[serde(rename = "FILE_SAVE", rename_all = "camelCase")]
    FileSave { file_id: i64, content: String },
    #[serde(rename = "FILE_CREATE", rename_all = "camelCase")]
    FileCreate {
        file_name: String,
        path: String,
        file_type: String,
        parent_id: i64,
    },
    #[serde(rename = "FILE_DELETE", rename_all = "camelCase")]
    FileDelete { file_id: i64 },
    #[serde(rename = "FILE_RENAME", rename_all = "camelCase")]
    FileRename { file_id: i64, new_file_name: String },
    #[serde(rename = "EXECUTE_CODE", rename_all = "camelCase")]
    ExecuteCode {
        code: Option<String>,
        files: Option<HashMap<String, String>>,
        file_path: Option<String>,
        connection_id: Option<String>,
    },
    #[serde(rename = "SEND_INPUT", rename_all = "camelCase")]
    SendInput {
        input: String,
        connection_id: Option<String>,
    },
    #[serde(rename = "STOP_EXECUTION", rename_all = "camelCase")]
    StopExecution {
        connection_id: Option<String>,
    },
    #[serde(rename = "CURSOR_MOVE")]
    CursorMove,
    #[serde(rename = "KICK_USER", rename_all = "camelCase")]
    KickUser { user_id: i64 },
}

// --- Outbound frame constructors ---

pub fn session_info(connection_id: &str) -> Value {
    json!({
        "type": "SESSION_INFO",
        "connectionId": connection_id,
        "message": "Connected successfully",
        "timestamp": now_millis(),
    })
}

pub fn project_state(project_id: &str) -> Value {
    json!({
        "type": "PROJECT_STATE",
        "projectId": project_id,
        "timestamp": now_millis(),
    })
}

pub fn error(message: &str) -> Value {
    json!({
        "type": "ERROR",
        "message": message,
        "timestamp": now_millis(),
    })
}

/// `users` entries are the display shape produced by
/// [`crate::registry::Presence::display`].
pub fn online_users(users: Vec<Value>) -> Value {
    json!({
        "type": "ONLINE_USERS",
        "count": users.len(),
        "users": users,
        "timestamp": now_millis(),
    })
}

pub fn auth_success(user: Value) -> Value {
    json!({
        "type": "AUTH_SUCCESS",
        "message": "Authenticated successfully",
        "user": user,
        "timestamp": now_millis(),
    })
}

pub fn user_joined(user: Value) -> Value {
    json!({
        "type": "USER_JOINED",
        "user": user,
        "timestamp": now_millis(),
    })
}

pub fn user_left(user: Value) -> Value {
    json!({
        "type": "USER_LEFT",
        "user": user,
        "timestamp": now_millis(),
    })
}

pub fn user_kicked(kicked_by: &str) -> Value {
    json!({
        "type": "USER_KICKED",
        "message": "You have been removed from the project",
        "kickedBy": kicked_by,
        "timestamp": now_millis(),
    })
}

pub fn user_kicked_broadcast(
    user_id: i64,
    kicked_by: Option<i64>,
    kicked_by_username: &str,
) -> Value {
    json!({
        "type": "USER_KICKED_BROADCAST",
        "userId": user_id,
        "kickedBy": kicked_by,
        "kickedByUsername": kicked_by_username,
        "timestamp": now_millis(),
    })
}

pub fn file_saved_broadcast(file_id: i64, content: &str, origin: &str) -> Value {
    json!({
        "type": "FILE_SAVED",
        "fileId": file_id,
        "content": content,
        "userId": origin,
        "timestamp": now_millis(),
    })
}

pub fn file_created_broadcast(file: Value, origin: &str) -> Value {
    json!({
        "type": "FILE_CREATED",
        "file": file,
        "userId": origin,
        "timestamp": now_millis(),
    })
}

pub fn file_deleted_broadcast(file_id: i64, origin: &str) -> Value {
    json!({
        "type": "FILE_DELETED",
        "fileId": file_id,
        "userId": origin,
        "timestamp": now_millis(),
    })
}

pub fn file_renamed_broadcast(file_id: i64, name: &str, origin: &str) -> Value {
    json!({
        "type": "FILE_RENAMED",
        "fileId": file_id,
        "name": name,
        "userId": origin,
        "timestamp": now_millis(),
    })
}

/// Direct confirmation to the connection that performed a file mutation.
pub fn file_op_confirmation(event: &str, message: &str) -> Value {
    json!({
        "type": event,
        "message": message,
        "timestamp": now_millis(),
    })
}

pub fn execution_started() -> Value {
    json!({
        "type": "EXECUTION_STARTED",
        "message": "Connected to execution engine",
        "timestamp": now_millis(),
    })
}

pub fn execution_stopped() -> Value {
    json!({
        "type": "EXECUTION_STOPPED",
        "message": "Execution stopped by user",
        "timestamp": now_millis(),
    })
}

pub fn input_sent(input: &str) -> Value {
    json!({
        "type": "INPUT_SENT",
        "message": format!("Input sent: {input}"),
        "timestamp": now_millis(),
    })
}

/// A classified engine event relayed to the originating connection.
/// `OUTPUT`, `INPUT_REQUIRED`, `COMPILE_SUCCESS`, `COMPILE_ERROR`, `ERROR`.
pub fn engine_event(event: &str, message: &str, exit_code: Option<i64>) -> Value {
    json!({
        "type": event,
        "message": message,
        "exitCode": exit_code.unwrap_or(0),
        "timestamp": now_millis(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_parses_with_partial_fields() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"AUTH","userId":5,"username":"ann"}"#).unwrap();
        match msg {
            ClientMessage::Auth {
                user_id,
                username,
                email,
            } => {
                assert_eq!(user_id, Some(5));
                assert_eq!(username.as_deref(), Some("ann"));
                assert_eq!(email, None);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn execute_code_accepts_single_file_and_multi_file() {
        let single: ClientMessage =
            serde_json::from_str(r#"{"type":"EXECUTE_CODE","code":"int main(){}"}"#).unwrap();
        assert!(matches!(
            single,
            ClientMessage::ExecuteCode { code: Some(_), files: None, .. }
        ));

        let multi: ClientMessage = serde_json::from_str(
            r#"{"type":"EXECUTE_CODE","files":{"main.cpp":"int main(){}","util.h":""}}"#,
        )
        .unwrap();
        match multi {
            ClientMessage::ExecuteCode { files: Some(f), .. } => assert_eq!(f.len(), 2),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_a_parse_error() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"NOT_A_THING"}"#).is_err());
    }

    #[test]
    fn cursor_move_tolerates_extra_fields() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"CURSOR_MOVE","line":3,"column":14}"#).unwrap();
        assert!(matches!(msg, ClientMessage::CursorMove));
    }

    #[test]
    fn outbound_frames_carry_type_and_timestamp() {
        for frame in [
            session_info("c1"),
            error("boom"),
            online_users(vec![]),
            execution_started(),
            engine_event("OUTPUT", "hello", None),
        ] {
            assert!(frame["type"].is_string());
            assert!(frame["timestamp"].is_i64());
        }
    }
}
