use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::auth::authorize_owner;
use crate::error::AppError;
use crate::scanner::{delete_scan, enqueue_scan, NewScan};
use crate::types::SiteScanJob;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartScanBody {
    pub bot_id: String,
    pub start_url_after_login: String,
    #[serde(default)]
    pub login_url: Option<String>,
    #[serde(default)]
    pub username_selector: Option<String>,
    #[serde(default)]
    pub password_selector: Option<String>,
    #[serde(default)]
    pub submit_selector: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

pub async fn start_scan(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StartScanBody>,
) -> Result<(StatusCode, Json<SiteScanJob>), AppError> {
    authorize_owner(&state.jwt, state.conversations.as_ref(), &headers, &body.bot_id).await?;
    let request = NewScan::parse(
        &body.bot_id,
        &body.start_url_after_login,
        body.login_url.as_deref(),
        body.username_selector.as_deref(),
        body.password_selector.as_deref(),
        body.submit_selector.as_deref(),
        body.username.as_deref(),
        body.password.as_deref(),
    )?;
    let job = enqueue_scan(
        state.scan_jobs.as_ref(),
        state.scan_queue.as_ref(),
        &state.cipher,
        state.scan_max_attempts,
        request,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn list_scan_jobs(
    Path(bot_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<SiteScanJob>>, AppError> {
    authorize_owner(&state.jwt, state.conversations.as_ref(), &headers, &bot_id).await?;
    Ok(Json(state.scan_jobs.list_jobs(&bot_id).await?))
}

pub async fn delete_scan_job(
    Path((job_id, bot_id)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    authorize_owner(&state.jwt, state.conversations.as_ref(), &headers, &bot_id).await?;
    if delete_scan(state.scan_jobs.as_ref(), state.scan_queue.as_ref(), &bot_id, &job_id).await? {
        Ok(Json(json!({ "deleted": true, "jobId": job_id })))
    } else {
        Err(AppError::NotFound("scan job not found".to_string()))
    }
}
