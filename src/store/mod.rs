//! Persistence seams. Tenant data (chunks, embeddings, chats, leads, appointments, logs and
//! job listings) is always read and written by bot id. Single crawl jobs and queue entries are
//! also addressed by their random id, which the worker takes from the queue payload.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::actions::config::{BotActionsConfig, ChannelHealth, ChannelHealthBoard, NotificationChannel};
use crate::error::StoreError;
use crate::types::*;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn insert_chunk(&self, chunk: &ContentChunk) -> Result<(), StoreError>;
    async fn get_chunk(&self, bot_id: &str, chunk_id: &str)
        -> Result<Option<ContentChunk>, StoreError>;
    async fn set_chunk_status(
        &self,
        bot_id: &str,
        chunk_id: &str,
        status: ChunkStatus,
    ) -> Result<(), StoreError>;
    /// Deletes a chunk together with its embedding.
    async fn delete_chunk(&self, bot_id: &str, chunk_id: &str) -> Result<bool, StoreError>;
    async fn has_embedding(&self, bot_id: &str, chunk_id: &str) -> Result<bool, StoreError>;
    /// Returns `false` when an embedding for `(bot_id, chunk_id)` already existed.
    async fn insert_embedding(&self, embedding: &Embedding) -> Result<bool, StoreError>;
    /// Writes the embedding for `(bot_id, chunk_id)`, overwriting any existing one in one step.
    async fn replace_embedding(&self, embedding: &Embedding) -> Result<(), StoreError>;
    /// Cosine-similarity search, descending by score.
    async fn search_embeddings(
        &self,
        bot_id: &str,
        query: &[f32],
        threshold: f64,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError>;
    async fn mark_bot_trained(&self, bot_id: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn save_bot(&self, bot: &Bot) -> Result<(), StoreError>;
    async fn get_bot(&self, bot_id: &str) -> Result<Option<Bot>, StoreError>;
    async fn find_bot_by_token(&self, public_token: &str) -> Result<Option<Bot>, StoreError>;
    async fn ensure_chat(
        &self,
        bot_id: &str,
        session_id: &str,
        visitor_metadata: &Value,
    ) -> Result<Chat, StoreError>;
    /// Appends a message and bumps the chat's running message count.
    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError>;
    /// The last `limit` messages of a chat, oldest first.
    async fn recent_messages(&self, chat_id: &str, limit: usize)
        -> Result<Vec<ChatMessage>, StoreError>;
    async fn increment_usage(&self, bot_id: &str, kind: UsageKind) -> Result<(), StoreError>;
    async fn usage_count(&self, bot_id: &str, kind: UsageKind) -> Result<i64, StoreError>;
}

#[async_trait]
pub trait ActionStore: Send + Sync {
    async fn actions_config(&self, bot_id: &str) -> Result<Option<BotActionsConfig>, StoreError>;
    async fn save_actions_config(
        &self,
        bot_id: &str,
        config: &BotActionsConfig,
    ) -> Result<(), StoreError>;
    async fn channel_health(&self, bot_id: &str) -> Result<ChannelHealthBoard, StoreError>;
    /// Replaces one channel's health in a single write.
    async fn record_channel_health(
        &self,
        bot_id: &str,
        channel: NotificationChannel,
        health: &ChannelHealth,
    ) -> Result<(), StoreError>;

    async fn insert_lead(&self, lead: &Lead) -> Result<(), StoreError>;
    async fn get_lead(&self, bot_id: &str, lead_id: &str) -> Result<Option<Lead>, StoreError>;
    async fn list_leads(&self, bot_id: &str) -> Result<Vec<Lead>, StoreError>;
    async fn delete_lead(&self, bot_id: &str, lead_id: &str) -> Result<bool, StoreError>;

    async fn insert_appointment(&self, appointment: &Appointment) -> Result<(), StoreError>;
    async fn get_appointment(
        &self,
        bot_id: &str,
        appointment_id: &str,
    ) -> Result<Option<Appointment>, StoreError>;
    async fn set_appointment_status(
        &self,
        bot_id: &str,
        appointment_id: &str,
        status: AppointmentStatus,
    ) -> Result<(), StoreError>;
    async fn list_appointments(&self, bot_id: &str) -> Result<Vec<Appointment>, StoreError>;

    async fn insert_action_log(&self, record: &ActionExecution) -> Result<(), StoreError>;
    async fn list_action_logs(
        &self,
        bot_id: &str,
        limit: usize,
    ) -> Result<Vec<ActionExecution>, StoreError>;
}

#[async_trait]
pub trait ScanJobStore: Send + Sync {
    async fn insert_job(&self, job: &SiteScanJob) -> Result<(), StoreError>;
    async fn get_job(&self, job_id: &str) -> Result<Option<SiteScanJob>, StoreError>;
    async fn list_jobs(&self, bot_id: &str) -> Result<Vec<SiteScanJob>, StoreError>;
    async fn update_job_status(
        &self,
        job_id: &str,
        status: ScanStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError>;
    async fn delete_job(&self, bot_id: &str, job_id: &str) -> Result<bool, StoreError>;
}

/// Durable crawl queue with leased claims and delayed redelivery.
#[async_trait]
pub trait ScanQueue: Send + Sync {
    async fn enqueue(&self, payload: &ScanPayload, max_attempts: u32) -> Result<String, StoreError>;
    /// Claims the oldest available entry and counts the attempt.
    async fn claim_next(&self) -> Result<Option<QueuedScan>, StoreError>;
    async fn complete(&self, queue_id: &str) -> Result<(), StoreError>;
    async fn retry_later(&self, queue_id: &str, delay: Duration) -> Result<(), StoreError>;
    async fn discard_for_job(&self, job_id: &str) -> Result<(), StoreError>;
}
