use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let blobs = if state.blobs.is_ready() { "ready" } else { "starting" };
    match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) if state.blobs.is_ready() => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "db": "connected", "blobs": blobs })),
        ),
        Ok(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "error", "db": "connected", "blobs": blobs })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "error", "db": e.to_string(), "blobs": blobs })),
        ),
    }
}
