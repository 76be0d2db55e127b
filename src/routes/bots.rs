use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use rand::RngCore;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::{authenticate, authorize_owner};
use crate::error::AppError;
use crate::now_iso;
use crate::types::{Bot, BotLanguage, ModelSettings, TelegramLink};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBotBody {
    pub name: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub model: Option<ModelSettings>,
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

pub async fn create_bot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBotBody>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let claims = authenticate(&state.jwt, &headers)?;
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::validation("name", "name is required"));
    }
    let model = body.model.unwrap_or_else(|| ModelSettings {
        model: state.default_chat_model.clone(),
        ..ModelSettings::default()
    });
    if !(0.0..=2.0).contains(&model.temperature) {
        return Err(AppError::validation("model.temperature", "must be between 0 and 2"));
    }

    let telegram = body
        .telegram_bot_token
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .map(|bot_token| TelegramLink {
            bot_token,
            webhook_secret: random_hex(24),
        });
    let bot = Bot {
        id: Uuid::new_v4().to_string(),
        owner_id: claims.sub,
        name: name.to_string(),
        public_token: random_hex(16),
        language: body
            .language
            .as_deref()
            .map(BotLanguage::from_code)
            .unwrap_or_default(),
        model,
        is_active: true,
        is_trained: false,
        allowed_domains: body
            .allowed_domains
            .into_iter()
            .map(|domain| domain.trim().to_string())
            .filter(|domain| !domain.is_empty())
            .collect(),
        telegram,
        created_at: now_iso(),
    };
    state.conversations.save_bot(&bot).await?;
    info!(bot_id = %bot.id, owner_id = %bot.owner_id, "bot created");

    let telegram_webhook = bot.telegram.as_ref().map(|link| {
        json!({
            "url": format!("{}/telegram/webhook/{}", state.public_base_url, bot.id),
            "secretToken": link.webhook_secret,
        })
    });
    Ok((
        StatusCode::CREATED,
        Json(json!({ "bot": bot, "telegramWebhook": telegram_webhook })),
    ))
}

pub async fn get_bot(
    Path(bot_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Bot>, AppError> {
    let bot = authorize_owner(&state.jwt, state.conversations.as_ref(), &headers, &bot_id).await?;
    Ok(Json(bot))
}
