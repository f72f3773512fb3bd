use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// GET /api/health — liveness probe.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Build the axum Router with the WebSocket endpoint and public routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/projects/{project_id}", get(ws_handler::ws_upgrade))
        .route("/api/health", get(health))
        .with_state(state)
}
