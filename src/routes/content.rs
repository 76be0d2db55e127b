use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::app::AppState;
use crate::auth::authorize_owner;
use crate::error::AppError;
use crate::knowledge::EmbedOutcome;
use crate::types::{ChunkSource, ChunkStatus};

#[derive(Debug, Deserialize)]
pub struct AddContentBody {
    #[serde(default)]
    pub title: Option<String>,
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmbedQuery {
    #[serde(default)]
    pub force: bool,
}

fn outcome_str(outcome: EmbedOutcome) -> &'static str {
    match outcome {
        EmbedOutcome::Created => "created",
        EmbedOutcome::AlreadyPresent => "already_present",
    }
}

pub async fn add_content(
    Path(bot_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<AddContentBody>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    authorize_owner(&state.jwt, state.conversations.as_ref(), &headers, &bot_id).await?;
    if body.text.trim().is_empty() {
        return Err(AppError::validation("text", "text is required"));
    }
    let source_ref = body
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .unwrap_or("manual");

    let chunks = state
        .embeddings
        .create_chunks(&bot_id, ChunkSource::Manual, source_ref, &body.text)
        .await?;
    let mut results = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        let status = match state.embeddings.generate_for_chunk(&bot_id, &chunk.id).await {
            Ok(_) => ChunkStatus::Completed,
            Err(err) => {
                warn!(%bot_id, chunk_id = %chunk.id, error = %err, "manual content embedding failed");
                ChunkStatus::Failed
            }
        };
        results.push(json!({ "chunkId": chunk.id, "wordCount": chunk.word_count, "status": status }));
    }
    Ok((StatusCode::CREATED, Json(json!({ "chunks": results }))))
}

pub async fn embed_content(
    Path((bot_id, chunk_id)): Path<(String, String)>,
    Query(query): Query<EmbedQuery>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    authorize_owner(&state.jwt, state.conversations.as_ref(), &headers, &bot_id).await?;
    let outcome = if query.force {
        state.embeddings.regenerate_for_chunk(&bot_id, &chunk_id).await?
    } else {
        state.embeddings.generate_for_chunk(&bot_id, &chunk_id).await?
    };
    Ok(Json(json!({ "chunkId": chunk_id, "outcome": outcome_str(outcome) })))
}

pub async fn delete_content(
    Path((bot_id, chunk_id)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    authorize_owner(&state.jwt, state.conversations.as_ref(), &headers, &bot_id).await?;
    if state.embeddings.delete_chunk(&bot_id, &chunk_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("content chunk not found".to_string()))
    }
}
