use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::execution::bridge;
use crate::messages;
use crate::state::AppState;
use crate::ws::broadcast;
use crate::ws::protocol;

/// Run the actor-per-connection pattern for an admitted WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: processes incoming messages, dispatches to the router
///
/// The mpsc channel allows any part of the system to send messages to this
/// client by cloning the sender.
pub async fn run_connection(socket: WebSocket, state: AppState, project_id: String) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Spawn writer task: forwards mpsc messages to the WebSocket sink.
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Register anonymously and join the project room.
    state.registry.admit(&connection_id, &project_id, tx.clone());

    tracing::info!(
        connection_id = %connection_id,
        project_id = %project_id,
        "WebSocket connected"
    );

    broadcast::send_to_connection(
        &state.registry,
        &connection_id,
        &messages::session_info(&connection_id),
    );
    broadcast::broadcast_online_users(&state.registry, &project_id);

    // Project state goes out asynchronously so admission never blocks on it;
    // a failed send is logged inside the hub and otherwise ignored.
    {
        let registry = state.registry.clone();
        let conn = connection_id.clone();
        let project = project_id.clone();
        tokio::spawn(async move {
            broadcast::send_to_connection(&registry, &conn, &messages::project_state(&project));
        });
    }

    // Reader loop: client messages are handled sequentially, in arrival
    // order, for this connection. Handler failures never break the loop.
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_message(&state, &connection_id, &project_id, text.as_str())
                        .await;
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Pong(_) | Message::Binary(_) => {}
                Message::Close(frame) => {
                    tracing::info!(
                        connection_id = %connection_id,
                        reason = ?frame,
                        "client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(connection_id = %connection_id, "WebSocket stream ended");
                break;
            }
        }
    }

    writer_handle.abort();

    // Any active execution dies with its connection.
    bridge::teardown(&state, &connection_id, true).await;

    let departed = state.registry.remove(&connection_id, &project_id);

    tracing::info!(
        connection_id = %connection_id,
        project_id = %project_id,
        user = departed.as_ref().map(|p| p.username.as_str()).unwrap_or("Unknown"),
        "WebSocket disconnected"
    );

    // Only authenticated departures are announced; anonymous connections
    // were never on the visible roster.
    if let Some(presence) = departed.filter(|p| p.user_id.is_some()) {
        broadcast::broadcast_to_project(
            &state.registry,
            &project_id,
            &messages::user_left(presence.display()),
        );
        broadcast::broadcast_online_users(&state.registry, &project_id);
    }
}

/// Writer task: receives frames from the mpsc channel and forwards them to
/// the WebSocket sink. Being the only writer for this socket, it is what
/// serializes outbound sends per connection.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken.
            break;
        }
        if closing {
            break;
        }
    }
}
