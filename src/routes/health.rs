use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::AppState;

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "OMS Mini App Backend работает. Отправь /start боту в Telegram.",
    }))
}

#[axum::debug_handler]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let store = if state.store.is_ready() {
        "ready"
    } else {
        "unavailable"
    };
    let body = json!({
        "status": "ok",
        "store": store,
        "bots": state.bots.iter().map(|b| b.label()).collect::<Vec<_>>(),
    });
    (StatusCode::OK, Json(body))
}
