pub mod actions;
pub mod app;
pub mod auth;
pub mod channels;
pub mod chat;
pub mod config;
pub mod crypto;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod logging;
pub mod prompting;
pub mod retrieval;
pub mod routes;
pub mod scanner;
pub mod store;
pub mod types;

use chrono::Utc;

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}
