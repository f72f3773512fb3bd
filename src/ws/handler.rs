use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    response::Response,
};

use crate::state::AppState;
use crate::ws::actor;

/// GET /ws/projects/{project_id}
/// WebSocket upgrade endpoint. The path segment is the project id — it keys
/// the room the connection joins. No token check here: the connection is
/// admitted anonymously and identifies itself with an AUTH frame.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| actor::run_connection(socket, state, project_id))
}
