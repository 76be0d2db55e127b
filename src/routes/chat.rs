use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::{is_origin_allowed, request_origin_host, BOT_TOKEN_HEADER};
use crate::chat::{ChatError, IncomingMessage, TurnReply};
use crate::error::AppError;
use crate::prompting::apology_sentence;

const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageBody {
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub visitor_metadata: Value,
}

pub async fn post_chat_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ChatMessageBody>,
) -> Result<Json<TurnReply>, AppError> {
    let token = headers
        .get(BOT_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Unauthorized("missing bot token".to_string()))?;
    let bot = state
        .conversations
        .find_bot_by_token(token)
        .await?
        .ok_or_else(|| AppError::Unauthorized("unknown bot token".to_string()))?;

    let origin = request_origin_host(&headers);
    if !is_origin_allowed(&bot.allowed_domains, origin.as_deref()) {
        warn!(bot_id = %bot.id, origin = ?origin, "chat request from a domain outside the allow-list");
        return Err(AppError::Forbidden("domain not allowed".to_string()));
    }

    if body.message.trim().is_empty() {
        return Err(AppError::validation("message", "message is required"));
    }
    if body.message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::validation(
            "message",
            format!("message exceeds {MAX_MESSAGE_CHARS} characters"),
        ));
    }
    let session_id = body
        .session_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let metadata = if body.visitor_metadata.is_object() {
        body.visitor_metadata
    } else {
        Value::Object(Default::default())
    };

    let turn = state
        .orchestrator
        .handle_message(
            &bot,
            IncomingMessage {
                session_id: &session_id,
                text: &body.message,
                visitor_metadata: &metadata,
            },
        )
        .await;
    match turn {
        Ok(reply) => Ok(Json(reply)),
        Err(err @ (ChatError::EmptyMessage | ChatError::InactiveBot)) => Err(err.into()),
        Err(err) => {
            // Visitors only ever see the apology; the cause stays in the logs.
            error!(bot_id = %bot.id, %session_id, error = %err, "chat turn failed");
            Err(AppError::Internal(apology_sentence(bot.language).to_string()))
        }
    }
}
