use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ActionStore, ConversationStore, KnowledgeStore, ScanJobStore, ScanQueue};
use crate::actions::config::{BotActionsConfig, ChannelHealth, ChannelHealthBoard, NotificationChannel};
use crate::error::StoreError;
use crate::now_iso;
use crate::types::*;

const QUEUE_LEASE: Duration = Duration::from_secs(15 * 60);

struct QueueEntry {
    id: String,
    payload: ScanPayload,
    attempts: u32,
    max_attempts: u32,
    available_at: Instant,
    locked_until: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    bots: HashMap<String, Bot>,
    chunks: HashMap<String, ContentChunk>,
    embeddings: HashMap<(String, String), Embedding>,
    chats: HashMap<String, Chat>,
    messages: HashMap<String, Vec<ChatMessage>>,
    usage: HashMap<(String, &'static str, String), i64>,
    action_configs: HashMap<String, BotActionsConfig>,
    channel_health: HashMap<String, ChannelHealthBoard>,
    leads: Vec<Lead>,
    appointments: Vec<Appointment>,
    action_logs: Vec<ActionExecution>,
    jobs: Vec<SiteScanJob>,
    queue: Vec<QueueEntry>,
}

/// Process-local store used by tests and `STORAGE_BACKEND=memory`.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries still waiting in the crawl queue.
    pub async fn queued_len(&self) -> usize {
        self.inner.read().await.queue.len()
    }

    /// Every chunk stored for `bot_id`, oldest first.
    pub async fn chunks_for_bot(&self, bot_id: &str) -> Vec<ContentChunk> {
        let mut chunks = self
            .inner
            .read()
            .await
            .chunks
            .values()
            .filter(|chunk| chunk.bot_id == bot_id)
            .cloned()
            .collect::<Vec<_>>();
        chunks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        chunks
    }
}

fn usage_period() -> String {
    Utc::now().format("%Y-%m").to_string()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    async fn insert_chunk(&self, chunk: &ContentChunk) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .chunks
            .insert(chunk.id.clone(), chunk.clone());
        Ok(())
    }

    async fn get_chunk(
        &self,
        bot_id: &str,
        chunk_id: &str,
    ) -> Result<Option<ContentChunk>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .chunks
            .get(chunk_id)
            .filter(|chunk| chunk.bot_id == bot_id)
            .cloned())
    }

    async fn set_chunk_status(
        &self,
        bot_id: &str,
        chunk_id: &str,
        status: ChunkStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(chunk) = inner
            .chunks
            .get_mut(chunk_id)
            .filter(|chunk| chunk.bot_id == bot_id)
        {
            chunk.status = status;
            chunk.updated_at = now_iso();
        }
        Ok(())
    }

    async fn delete_chunk(&self, bot_id: &str, chunk_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let owned = inner
            .chunks
            .get(chunk_id)
            .is_some_and(|chunk| chunk.bot_id == bot_id);
        if !owned {
            return Ok(false);
        }
        inner.chunks.remove(chunk_id);
        inner
            .embeddings
            .remove(&(bot_id.to_string(), chunk_id.to_string()));
        Ok(true)
    }

    async fn has_embedding(&self, bot_id: &str, chunk_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .embeddings
            .contains_key(&(bot_id.to_string(), chunk_id.to_string())))
    }

    async fn insert_embedding(&self, embedding: &Embedding) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let key = (embedding.bot_id.clone(), embedding.chunk_id.clone());
        if inner.embeddings.contains_key(&key) {
            return Ok(false);
        }
        inner.embeddings.insert(key, embedding.clone());
        Ok(true)
    }

    async fn replace_embedding(&self, embedding: &Embedding) -> Result<(), StoreError> {
        let key = (embedding.bot_id.clone(), embedding.chunk_id.clone());
        self.inner
            .write()
            .await
            .embeddings
            .insert(key, embedding.clone());
        Ok(())
    }

    async fn search_embeddings(
        &self,
        bot_id: &str,
        query: &[f32],
        threshold: f64,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let inner = self.inner.read().await;
        let mut scored = inner
            .embeddings
            .values()
            .filter(|embedding| embedding.bot_id == bot_id)
            .filter(|embedding| {
                inner
                    .chunks
                    .get(&embedding.chunk_id)
                    .is_some_and(|chunk| chunk.bot_id == bot_id)
            })
            .map(|embedding| ScoredChunk {
                chunk_id: embedding.chunk_id.clone(),
                text: embedding.content.clone(),
                score: cosine_similarity(query, &embedding.vector),
            })
            .filter(|chunk| chunk.score >= threshold)
            .collect::<Vec<_>>();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn mark_bot_trained(&self, bot_id: &str) -> Result<(), StoreError> {
        if let Some(bot) = self.inner.write().await.bots.get_mut(bot_id) {
            bot.is_trained = true;
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn save_bot(&self, bot: &Bot) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .bots
            .insert(bot.id.clone(), bot.clone());
        Ok(())
    }

    async fn get_bot(&self, bot_id: &str) -> Result<Option<Bot>, StoreError> {
        Ok(self.inner.read().await.bots.get(bot_id).cloned())
    }

    async fn find_bot_by_token(&self, public_token: &str) -> Result<Option<Bot>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .bots
            .values()
            .find(|bot| bot.public_token == public_token)
            .cloned())
    }

    async fn ensure_chat(
        &self,
        bot_id: &str,
        session_id: &str,
        visitor_metadata: &Value,
    ) -> Result<Chat, StoreError> {
        let mut inner = self.inner.write().await;
        let now = now_iso();
        if let Some(chat) = inner
            .chats
            .values_mut()
            .find(|chat| chat.bot_id == bot_id && chat.session_id == session_id)
        {
            chat.updated_at = now;
            return Ok(chat.clone());
        }
        let chat = Chat {
            id: Uuid::new_v4().to_string(),
            bot_id: bot_id.to_string(),
            session_id: session_id.to_string(),
            visitor_metadata: visitor_metadata.clone(),
            message_count: 0,
            created_at: now.clone(),
            updated_at: now,
        };
        inner.chats.insert(chat.id.clone(), chat.clone());
        Ok(chat)
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let chat = inner
            .chats
            .get_mut(&message.chat_id)
            .ok_or(StoreError::NotFound { entity: "chat" })?;
        chat.message_count += 1;
        chat.updated_at = message.created_at.clone();
        inner
            .messages
            .entry(message.chat_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn recent_messages(
        &self,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let inner = self.inner.read().await;
        let Some(messages) = inner.messages.get(chat_id) else {
            return Ok(Vec::new());
        };
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    async fn increment_usage(&self, bot_id: &str, kind: UsageKind) -> Result<(), StoreError> {
        *self
            .inner
            .write()
            .await
            .usage
            .entry((bot_id.to_string(), kind.as_str(), usage_period()))
            .or_insert(0) += 1;
        Ok(())
    }

    async fn usage_count(&self, bot_id: &str, kind: UsageKind) -> Result<i64, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .usage
            .get(&(bot_id.to_string(), kind.as_str(), usage_period()))
            .copied()
            .unwrap_or(0))
    }
}

#[async_trait]
impl ActionStore for MemoryStore {
    async fn actions_config(&self, bot_id: &str) -> Result<Option<BotActionsConfig>, StoreError> {
        Ok(self.inner.read().await.action_configs.get(bot_id).cloned())
    }

    async fn save_actions_config(
        &self,
        bot_id: &str,
        config: &BotActionsConfig,
    ) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .action_configs
            .insert(bot_id.to_string(), config.clone());
        Ok(())
    }

    async fn channel_health(&self, bot_id: &str) -> Result<ChannelHealthBoard, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .channel_health
            .get(bot_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn record_channel_health(
        &self,
        bot_id: &str,
        channel: NotificationChannel,
        health: &ChannelHealth,
    ) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .channel_health
            .entry(bot_id.to_string())
            .or_default()
            .set(channel, health.clone());
        Ok(())
    }

    async fn insert_lead(&self, lead: &Lead) -> Result<(), StoreError> {
        self.inner.write().await.leads.push(lead.clone());
        Ok(())
    }

    async fn get_lead(&self, bot_id: &str, lead_id: &str) -> Result<Option<Lead>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .leads
            .iter()
            .find(|lead| lead.bot_id == bot_id && lead.id == lead_id)
            .cloned())
    }

    async fn list_leads(&self, bot_id: &str) -> Result<Vec<Lead>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .leads
            .iter()
            .rev()
            .filter(|lead| lead.bot_id == bot_id)
            .cloned()
            .collect())
    }

    async fn delete_lead(&self, bot_id: &str, lead_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.leads.len();
        inner
            .leads
            .retain(|lead| !(lead.bot_id == bot_id && lead.id == lead_id));
        Ok(inner.leads.len() != before)
    }

    async fn insert_appointment(&self, appointment: &Appointment) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .appointments
            .push(appointment.clone());
        Ok(())
    }

    async fn get_appointment(
        &self,
        bot_id: &str,
        appointment_id: &str,
    ) -> Result<Option<Appointment>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .appointments
            .iter()
            .find(|item| item.bot_id == bot_id && item.id == appointment_id)
            .cloned())
    }

    async fn set_appointment_status(
        &self,
        bot_id: &str,
        appointment_id: &str,
        status: AppointmentStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(item) = inner
            .appointments
            .iter_mut()
            .find(|item| item.bot_id == bot_id && item.id == appointment_id)
        {
            item.status = status;
            item.updated_at = now_iso();
        }
        Ok(())
    }

    async fn list_appointments(&self, bot_id: &str) -> Result<Vec<Appointment>, StoreError> {
        let mut items = self
            .inner
            .read()
            .await
            .appointments
            .iter()
            .filter(|item| item.bot_id == bot_id)
            .cloned()
            .collect::<Vec<_>>();
        items.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(items)
    }

    async fn insert_action_log(&self, record: &ActionExecution) -> Result<(), StoreError> {
        self.inner.write().await.action_logs.push(record.clone());
        Ok(())
    }

    async fn list_action_logs(
        &self,
        bot_id: &str,
        limit: usize,
    ) -> Result<Vec<ActionExecution>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .action_logs
            .iter()
            .rev()
            .filter(|record| record.bot_id == bot_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ScanJobStore for MemoryStore {
    async fn insert_job(&self, job: &SiteScanJob) -> Result<(), StoreError> {
        self.inner.write().await.jobs.push(job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<SiteScanJob>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .jobs
            .iter()
            .find(|job| job.id == job_id)
            .cloned())
    }

    async fn list_jobs(&self, bot_id: &str) -> Result<Vec<SiteScanJob>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .jobs
            .iter()
            .rev()
            .filter(|job| job.bot_id == bot_id)
            .cloned()
            .collect())
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        status: ScanStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(job) = inner.jobs.iter_mut().find(|job| job.id == job_id) {
            job.status = status;
            job.error_message = error_message.map(str::to_string);
            job.updated_at = now_iso();
        }
        Ok(())
    }

    async fn delete_job(&self, bot_id: &str, job_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.jobs.len();
        inner
            .jobs
            .retain(|job| !(job.bot_id == bot_id && job.id == job_id));
        Ok(inner.jobs.len() != before)
    }
}

#[async_trait]
impl ScanQueue for MemoryStore {
    async fn enqueue(&self, payload: &ScanPayload, max_attempts: u32) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.inner.write().await.queue.push(QueueEntry {
            id: id.clone(),
            payload: payload.clone(),
            attempts: 0,
            max_attempts,
            available_at: Instant::now(),
            locked_until: None,
        });
        Ok(id)
    }

    async fn claim_next(&self) -> Result<Option<QueuedScan>, StoreError> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let Some(entry) = inner.queue.iter_mut().find(|entry| {
            entry.available_at <= now && entry.locked_until.map_or(true, |until| until < now)
        }) else {
            return Ok(None);
        };
        entry.attempts += 1;
        entry.locked_until = Some(now + QUEUE_LEASE);
        Ok(Some(QueuedScan {
            queue_id: entry.id.clone(),
            payload: entry.payload.clone(),
            attempt: entry.attempts,
            max_attempts: entry.max_attempts,
        }))
    }

    async fn complete(&self, queue_id: &str) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .queue
            .retain(|entry| entry.id != queue_id);
        Ok(())
    }

    async fn retry_later(&self, queue_id: &str, delay: Duration) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.queue.iter_mut().find(|entry| entry.id == queue_id) {
            entry.locked_until = None;
            entry.available_at = Instant::now() + delay;
        }
        Ok(())
    }

    async fn discard_for_job(&self, job_id: &str) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .queue
            .retain(|entry| entry.payload.job_id != job_id);
        Ok(())
    }
}
