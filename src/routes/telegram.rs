use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::app::AppState;
use crate::auth::{secrets_match, TELEGRAM_SECRET_HEADER};
use crate::chat::{ChatError, IncomingMessage};
use crate::error::AppError;
use crate::prompting::apology_sentence;

#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    #[serde(default)]
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub from: Option<TelegramUser>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

/// Telegram ingress. The bot comes from the path; the secret header proves the sender.
pub async fn telegram_webhook(
    Path(bot_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(update): Json<TelegramUpdate>,
) -> Result<StatusCode, AppError> {
    let bot = state
        .conversations
        .get_bot(&bot_id)
        .await?
        .ok_or_else(|| AppError::NotFound("bot not found".to_string()))?;
    let link = bot
        .telegram
        .clone()
        .ok_or_else(|| AppError::NotFound("telegram is not linked for this bot".to_string()))?;
    let provided = headers
        .get(TELEGRAM_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !secrets_match(&link.webhook_secret, provided) {
        warn!(%bot_id, "telegram webhook with a bad secret token");
        return Err(AppError::Unauthorized("invalid secret token".to_string()));
    }

    let Some(message) = update.message else {
        return Ok(StatusCode::OK);
    };
    let Some(text) = message.text.as_deref().filter(|text| !text.trim().is_empty()) else {
        return Ok(StatusCode::OK);
    };

    let session_id = format!("telegram:{}", message.chat.id);
    let metadata = json!({
        "channel": "telegram",
        "telegramUserId": message.from.as_ref().map(|user| user.id),
        "username": message.from.as_ref().and_then(|user| user.username.clone()),
        "firstName": message.from.as_ref().and_then(|user| user.first_name.clone()),
    });
    let reply = match state
        .orchestrator
        .handle_message(
            &bot,
            IncomingMessage {
                session_id: &session_id,
                text,
                visitor_metadata: &metadata,
            },
        )
        .await
    {
        Ok(reply) => reply.message,
        Err(ChatError::InactiveBot) => return Ok(StatusCode::OK),
        Err(err) => {
            warn!(%bot_id, update_id = update.update_id, error = %err, "telegram turn failed");
            apology_sentence(bot.language).to_string()
        }
    };

    if let Err(err) = state
        .telegram
        .send_message(&link.bot_token, message.chat.id, &reply)
        .await
    {
        warn!(%bot_id, chat_id = message.chat.id, error = %err, "telegram reply failed");
    } else {
        info!(%bot_id, chat_id = message.chat.id, "telegram reply sent");
    }
    Ok(StatusCode::OK)
}
