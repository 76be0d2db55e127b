//! Dashboard endpoints for action configuration, leads, appointments and the action log.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::actions::config::BotActionsConfig;
use crate::app::AppState;
use crate::auth::authorize_owner;
use crate::error::AppError;
use crate::types::{Appointment, Lead};

const DEFAULT_LOG_LIMIT: usize = 50;
const MAX_LOG_LIMIT: usize = 200;

pub async fn get_actions_config(
    Path(bot_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    authorize_owner(&state.jwt, state.conversations.as_ref(), &headers, &bot_id).await?;
    let config = state.actions.actions_config(&bot_id).await?.unwrap_or_default();
    let health = state.actions.channel_health(&bot_id).await?;
    Ok(Json(json!({ "config": config, "health": health })))
}

pub async fn put_actions_config(
    Path(bot_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(config): Json<BotActionsConfig>,
) -> Result<Json<BotActionsConfig>, AppError> {
    authorize_owner(&state.jwt, state.conversations.as_ref(), &headers, &bot_id).await?;
    config
        .validate()
        .map_err(|violation| AppError::validation(violation.field, violation.message))?;
    state.actions.save_actions_config(&bot_id, &config).await?;
    info!(%bot_id, features = ?config.features, "actions config saved");
    Ok(Json(config))
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn list_action_logs(
    Path(bot_id): Path<String>,
    Query(query): Query<LogQuery>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    authorize_owner(&state.jwt, state.conversations.as_ref(), &headers, &bot_id).await?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .clamp(1, MAX_LOG_LIMIT);
    let logs = state.actions.list_action_logs(&bot_id, limit).await?;
    Ok(Json(json!({ "logs": logs })))
}

#[derive(Debug, Deserialize)]
pub struct CreateLeadBody {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn list_leads(
    Path(bot_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Lead>>, AppError> {
    authorize_owner(&state.jwt, state.conversations.as_ref(), &headers, &bot_id).await?;
    Ok(Json(state.actions.list_leads(&bot_id).await?))
}

pub async fn create_lead(
    Path(bot_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateLeadBody>,
) -> Result<(StatusCode, Json<Lead>), AppError> {
    authorize_owner(&state.jwt, state.conversations.as_ref(), &headers, &bot_id).await?;
    let lead = state
        .executor
        .create_lead(
            &bot_id,
            &body.name,
            body.email.as_deref(),
            body.phone.as_deref(),
            body.notes.as_deref(),
            "dashboard",
        )
        .await?;
    Ok((StatusCode::CREATED, Json(lead)))
}

pub async fn delete_lead(
    Path((bot_id, lead_id)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    authorize_owner(&state.jwt, state.conversations.as_ref(), &headers, &bot_id).await?;
    if state.actions.delete_lead(&bot_id, &lead_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("lead not found".to_string()))
    }
}

pub async fn list_appointments(
    Path(bot_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Appointment>>, AppError> {
    authorize_owner(&state.jwt, state.conversations.as_ref(), &headers, &bot_id).await?;
    Ok(Json(state.actions.list_appointments(&bot_id).await?))
}

pub async fn renotify_appointment(
    Path((bot_id, appointment_id)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let bot = authorize_owner(&state.jwt, state.conversations.as_ref(), &headers, &bot_id).await?;
    let (appointment, report) = state
        .executor
        .renotify_appointment(&bot, &appointment_id)
        .await?;
    info!(
        %bot_id,
        %appointment_id,
        status = appointment.status.as_str(),
        "appointment notifications re-sent"
    );
    Ok(Json(json!({ "appointment": appointment, "notifications": report })))
}
