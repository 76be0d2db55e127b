pub mod actions;
pub mod bots;
pub mod chat;
pub mod content;
pub mod media;
pub mod scanner;
pub mod telegram;

use axum::{response::IntoResponse, Json};
use serde_json::json;

use crate::now_iso;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "now": now_iso() }))
}
