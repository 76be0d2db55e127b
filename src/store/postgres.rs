use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use super::{ActionStore, ConversationStore, KnowledgeStore, ScanJobStore, ScanQueue};
use crate::actions::config::{BotActionsConfig, ChannelHealth, ChannelHealthBoard, NotificationChannel};
use crate::error::StoreError;
use crate::now_iso;
use crate::types::*;

/// Leased queue claims become visible again after this long without an ack.
const QUEUE_LEASE_SECS: i64 = 15 * 60;

/// Width of the `embeddings.embedding` column created by the migrations.
pub const EMBEDDING_COLUMN_DIMENSIONS: usize = 1536;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn embedding_to_pgvector(embedding: &[f32]) -> String {
    let items = embedding
        .iter()
        .map(|v| format!("{:.8}", v))
        .collect::<Vec<_>>()
        .join(",");
    format!("[{items}]")
}

fn usage_period() -> String {
    Utc::now().format("%Y-%m").to_string()
}

fn parse_bot_row(row: &PgRow) -> Bot {
    let telegram_token: Option<String> = row.get("telegram_bot_token");
    let telegram_secret: Option<String> = row.get("telegram_webhook_secret");
    Bot {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        public_token: row.get("public_token"),
        language: BotLanguage::from_code(&row.get::<String, _>("language")),
        model: ModelSettings {
            model: row.get("model"),
            temperature: row.get::<f32, _>("temperature"),
            max_tokens: row.get::<i32, _>("max_tokens").max(1) as u32,
        },
        is_active: row.get("is_active"),
        is_trained: row.get("is_trained"),
        allowed_domains: row.get("allowed_domains"),
        telegram: match (telegram_token, telegram_secret) {
            (Some(bot_token), Some(webhook_secret)) => Some(TelegramLink {
                bot_token,
                webhook_secret,
            }),
            _ => None,
        },
        created_at: row.get("created_at"),
    }
}

fn parse_chunk_row(row: &PgRow) -> ContentChunk {
    ContentChunk {
        id: row.get("id"),
        bot_id: row.get("bot_id"),
        source: ChunkSource::parse(&row.get::<String, _>("source")),
        source_ref: row.get("source_ref"),
        raw_text: row.get("raw_text"),
        word_count: row.get("word_count"),
        status: ChunkStatus::parse(&row.get::<String, _>("status")),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn parse_chat_row(row: &PgRow) -> Chat {
    Chat {
        id: row.get("id"),
        bot_id: row.get("bot_id"),
        session_id: row.get("session_id"),
        visitor_metadata: row.get("visitor_metadata"),
        message_count: row.get("message_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn parse_message_row(row: &PgRow) -> ChatMessage {
    let chunk_ids: Value = row.get("context_chunk_ids");
    ChatMessage {
        id: row.get("id"),
        chat_id: row.get("chat_id"),
        role: MessageRole::parse(&row.get::<String, _>("role")),
        content: row.get("content"),
        tokens_used: row.get("tokens_used"),
        context_chunk_ids: serde_json::from_value(chunk_ids).unwrap_or_default(),
        created_at: row.get("created_at"),
    }
}

fn parse_lead_row(row: &PgRow) -> Lead {
    Lead {
        id: row.get("id"),
        bot_id: row.get("bot_id"),
        name: row.get("name"),
        email: row.get("email"),
        phone: row.get("phone"),
        notes: row.get("notes"),
        source: row.get("source"),
        created_at: row.get("created_at"),
    }
}

fn parse_appointment_row(row: &PgRow) -> Appointment {
    Appointment {
        id: row.get("id"),
        bot_id: row.get("bot_id"),
        lead_id: row.get("lead_id"),
        attendee_name: row.get("attendee_name"),
        attendee_email: row.get("attendee_email"),
        attendee_phone: row.get("attendee_phone"),
        start_time: row.get("start_time"),
        duration_minutes: row.get("duration_minutes"),
        notes: row.get("notes"),
        status: AppointmentStatus::parse(&row.get::<String, _>("status")),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn parse_action_log_row(row: &PgRow) -> ActionExecution {
    ActionExecution {
        id: row.get("id"),
        bot_id: row.get("bot_id"),
        chat_id: row.get("chat_id"),
        action_type: row.get("action_type"),
        input: row.get("input"),
        result: row.get("result"),
        status: if row.get::<String, _>("status") == "success" {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        },
        error: row.get("error"),
        duration_ms: row.get("duration_ms"),
        created_at: row.get("created_at"),
    }
}

fn parse_job_row(row: &PgRow) -> SiteScanJob {
    let username_selector: Option<String> = row.get("username_selector");
    let password_selector: Option<String> = row.get("password_selector");
    let submit_selector: Option<String> = row.get("submit_selector");
    SiteScanJob {
        id: row.get("id"),
        bot_id: row.get("bot_id"),
        start_url_after_login: row.get("start_url_after_login"),
        login_url: row.get("login_url"),
        selectors: match (username_selector, password_selector, submit_selector) {
            (Some(username_selector), Some(password_selector), Some(submit_selector)) => {
                Some(LoginSelectors {
                    username_selector,
                    password_selector,
                    submit_selector,
                })
            }
            _ => None,
        },
        username_encrypted: row.get("username_encrypted"),
        password_encrypted: row.get("password_encrypted"),
        status: ScanStatus::parse(&row.get::<String, _>("status")),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl KnowledgeStore for PgStore {
    async fn insert_chunk(&self, chunk: &ContentChunk) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO content_chunks (id, bot_id, source, source_ref, raw_text, word_count, status, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
        )
        .bind(&chunk.id)
        .bind(&chunk.bot_id)
        .bind(chunk.source.as_str())
        .bind(&chunk.source_ref)
        .bind(&chunk.raw_text)
        .bind(chunk.word_count)
        .bind(chunk.status.as_str())
        .bind(&chunk.created_at)
        .bind(&chunk.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_chunk(
        &self,
        bot_id: &str,
        chunk_id: &str,
    ) -> Result<Option<ContentChunk>, StoreError> {
        let row = sqlx::query("SELECT * FROM content_chunks WHERE bot_id = $1 AND id = $2")
            .bind(bot_id)
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(parse_chunk_row))
    }

    async fn set_chunk_status(
        &self,
        bot_id: &str,
        chunk_id: &str,
        status: ChunkStatus,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE content_chunks SET status = $3, updated_at = $4 WHERE bot_id = $1 AND id = $2",
        )
        .bind(bot_id)
        .bind(chunk_id)
        .bind(status.as_str())
        .bind(now_iso())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_chunk(&self, bot_id: &str, chunk_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM content_chunks WHERE bot_id = $1 AND id = $2")
            .bind(bot_id)
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn has_embedding(&self, bot_id: &str, chunk_id: &str) -> Result<bool, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(1) FROM embeddings WHERE bot_id = $1 AND chunk_id = $2",
        )
        .bind(bot_id)
        .bind(chunk_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn insert_embedding(&self, embedding: &Embedding) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO embeddings (id, bot_id, chunk_id, content, embedding, created_at) \
             VALUES ($1,$2,$3,$4,$5::vector,$6) \
             ON CONFLICT (bot_id, chunk_id) DO NOTHING",
        )
        .bind(&embedding.id)
        .bind(&embedding.bot_id)
        .bind(&embedding.chunk_id)
        .bind(&embedding.content)
        .bind(embedding_to_pgvector(&embedding.vector))
        .bind(&embedding.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace_embedding(&self, embedding: &Embedding) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO embeddings (id, bot_id, chunk_id, content, embedding, created_at) \
             VALUES ($1,$2,$3,$4,$5::vector,$6) \
             ON CONFLICT (bot_id, chunk_id) DO UPDATE SET \
             content = EXCLUDED.content, embedding = EXCLUDED.embedding, \
             created_at = EXCLUDED.created_at",
        )
        .bind(&embedding.id)
        .bind(&embedding.bot_id)
        .bind(&embedding.chunk_id)
        .bind(&embedding.content)
        .bind(embedding_to_pgvector(&embedding.vector))
        .bind(&embedding.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn search_embeddings(
        &self,
        bot_id: &str,
        query: &[f32],
        threshold: f64,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let rows = sqlx::query(
            "SELECT e.chunk_id, e.content, ((1 - (e.embedding <=> $2::vector))::double precision) AS score \
             FROM embeddings e \
             INNER JOIN content_chunks c ON c.id = e.chunk_id AND c.bot_id = e.bot_id \
             WHERE e.bot_id = $1 \
               AND (1 - (e.embedding <=> $2::vector)) >= $3 \
             ORDER BY e.embedding <=> $2::vector \
             LIMIT $4",
        )
        .bind(bot_id)
        .bind(embedding_to_pgvector(query))
        .bind(threshold)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| ScoredChunk {
                chunk_id: row.get("chunk_id"),
                text: row.get("content"),
                score: row.get("score"),
            })
            .collect())
    }

    async fn mark_bot_trained(&self, bot_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE bots SET is_trained = TRUE WHERE id = $1")
            .bind(bot_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn save_bot(&self, bot: &Bot) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO bots (id, owner_id, name, public_token, language, model, temperature, max_tokens, is_active, is_trained, allowed_domains, telegram_bot_token, telegram_webhook_secret, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, public_token = EXCLUDED.public_token, \
               language = EXCLUDED.language, model = EXCLUDED.model, temperature = EXCLUDED.temperature, \
               max_tokens = EXCLUDED.max_tokens, is_active = EXCLUDED.is_active, is_trained = EXCLUDED.is_trained, \
               allowed_domains = EXCLUDED.allowed_domains, telegram_bot_token = EXCLUDED.telegram_bot_token, \
               telegram_webhook_secret = EXCLUDED.telegram_webhook_secret",
        )
        .bind(&bot.id)
        .bind(&bot.owner_id)
        .bind(&bot.name)
        .bind(&bot.public_token)
        .bind(bot.language.code())
        .bind(&bot.model.model)
        .bind(bot.model.temperature)
        .bind(bot.model.max_tokens as i32)
        .bind(bot.is_active)
        .bind(bot.is_trained)
        .bind(&bot.allowed_domains)
        .bind(bot.telegram.as_ref().map(|t| t.bot_token.clone()))
        .bind(bot.telegram.as_ref().map(|t| t.webhook_secret.clone()))
        .bind(&bot.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_bot(&self, bot_id: &str) -> Result<Option<Bot>, StoreError> {
        let row = sqlx::query("SELECT * FROM bots WHERE id = $1")
            .bind(bot_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(parse_bot_row))
    }

    async fn find_bot_by_token(&self, public_token: &str) -> Result<Option<Bot>, StoreError> {
        let row = sqlx::query("SELECT * FROM bots WHERE public_token = $1")
            .bind(public_token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(parse_bot_row))
    }

    async fn ensure_chat(
        &self,
        bot_id: &str,
        session_id: &str,
        visitor_metadata: &Value,
    ) -> Result<Chat, StoreError> {
        let now = now_iso();
        let row = sqlx::query(
            "INSERT INTO chats (id, bot_id, session_id, visitor_metadata, message_count, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,0,$5,$5) \
             ON CONFLICT (bot_id, session_id) DO UPDATE SET updated_at = EXCLUDED.updated_at \
             RETURNING *",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(bot_id)
        .bind(session_id)
        .bind(visitor_metadata)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;
        Ok(parse_chat_row(&row))
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let chunk_ids = serde_json::to_value(&message.context_chunk_ids)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        sqlx::query(
            "WITH inserted AS ( \
                INSERT INTO messages (id, chat_id, role, content, tokens_used, context_chunk_ids, created_at) \
                VALUES ($1,$2,$3,$4,$5,$6,$7) RETURNING chat_id \
             ) \
             UPDATE chats SET message_count = message_count + 1, updated_at = $7 \
             WHERE id = (SELECT chat_id FROM inserted)",
        )
        .bind(&message.id)
        .bind(&message.chat_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.tokens_used)
        .bind(chunk_ids)
        .bind(&message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_messages(
        &self,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM ( \
                SELECT * FROM messages WHERE chat_id = $1 ORDER BY seq DESC LIMIT $2 \
             ) recent ORDER BY seq ASC",
        )
        .bind(chat_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(parse_message_row).collect())
    }

    async fn increment_usage(&self, bot_id: &str, kind: UsageKind) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO usage_counters (bot_id, kind, period, count) VALUES ($1,$2,$3,1) \
             ON CONFLICT (bot_id, kind, period) DO UPDATE SET count = usage_counters.count + 1",
        )
        .bind(bot_id)
        .bind(kind.as_str())
        .bind(usage_period())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn usage_count(&self, bot_id: &str, kind: UsageKind) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(count), 0)::bigint FROM usage_counters \
             WHERE bot_id = $1 AND kind = $2 AND period = $3",
        )
        .bind(bot_id)
        .bind(kind.as_str())
        .bind(usage_period())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl ActionStore for PgStore {
    async fn actions_config(&self, bot_id: &str) -> Result<Option<BotActionsConfig>, StoreError> {
        let settings = sqlx::query_scalar::<_, Value>(
            "SELECT settings FROM bot_action_configs WHERE bot_id = $1",
        )
        .bind(bot_id)
        .fetch_optional(&self.pool)
        .await?;
        settings
            .map(|value| {
                serde_json::from_value(value).map_err(|err| StoreError::Corrupt(err.to_string()))
            })
            .transpose()
    }

    async fn save_actions_config(
        &self,
        bot_id: &str,
        config: &BotActionsConfig,
    ) -> Result<(), StoreError> {
        let settings =
            serde_json::to_value(config).map_err(|err| StoreError::Corrupt(err.to_string()))?;
        sqlx::query(
            "INSERT INTO bot_action_configs (bot_id, settings, health, updated_at) VALUES ($1,$2,'{}'::jsonb,$3) \
             ON CONFLICT (bot_id) DO UPDATE SET settings = EXCLUDED.settings, updated_at = EXCLUDED.updated_at",
        )
        .bind(bot_id)
        .bind(settings)
        .bind(now_iso())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn channel_health(&self, bot_id: &str) -> Result<ChannelHealthBoard, StoreError> {
        let health = sqlx::query_scalar::<_, Value>(
            "SELECT health FROM bot_action_configs WHERE bot_id = $1",
        )
        .bind(bot_id)
        .fetch_optional(&self.pool)
        .await?;
        match health {
            Some(value) => {
                serde_json::from_value(value).map_err(|err| StoreError::Corrupt(err.to_string()))
            }
            None => Ok(ChannelHealthBoard::default()),
        }
    }

    async fn record_channel_health(
        &self,
        bot_id: &str,
        channel: NotificationChannel,
        health: &ChannelHealth,
    ) -> Result<(), StoreError> {
        let value =
            serde_json::to_value(health).map_err(|err| StoreError::Corrupt(err.to_string()))?;
        sqlx::query(
            "INSERT INTO bot_action_configs (bot_id, settings, health, updated_at) \
             VALUES ($1, '{}'::jsonb, jsonb_build_object($2::text, $3::jsonb), $4) \
             ON CONFLICT (bot_id) DO UPDATE \
             SET health = bot_action_configs.health || jsonb_build_object($2::text, $3::jsonb)",
        )
        .bind(bot_id)
        .bind(channel.key())
        .bind(value)
        .bind(now_iso())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_lead(&self, lead: &Lead) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO leads (id, bot_id, name, email, phone, notes, source, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
        )
        .bind(&lead.id)
        .bind(&lead.bot_id)
        .bind(&lead.name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(&lead.notes)
        .bind(&lead.source)
        .bind(&lead.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_lead(&self, bot_id: &str, lead_id: &str) -> Result<Option<Lead>, StoreError> {
        let row = sqlx::query("SELECT * FROM leads WHERE bot_id = $1 AND id = $2")
            .bind(bot_id)
            .bind(lead_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(parse_lead_row))
    }

    async fn list_leads(&self, bot_id: &str) -> Result<Vec<Lead>, StoreError> {
        let rows = sqlx::query("SELECT * FROM leads WHERE bot_id = $1 ORDER BY created_at DESC")
            .bind(bot_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(parse_lead_row).collect())
    }

    async fn delete_lead(&self, bot_id: &str, lead_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM leads WHERE bot_id = $1 AND id = $2")
            .bind(bot_id)
            .bind(lead_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_appointment(&self, appointment: &Appointment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO appointments (id, bot_id, lead_id, attendee_name, attendee_email, attendee_phone, start_time, duration_minutes, notes, status, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)",
        )
        .bind(&appointment.id)
        .bind(&appointment.bot_id)
        .bind(&appointment.lead_id)
        .bind(&appointment.attendee_name)
        .bind(&appointment.attendee_email)
        .bind(&appointment.attendee_phone)
        .bind(&appointment.start_time)
        .bind(appointment.duration_minutes)
        .bind(&appointment.notes)
        .bind(appointment.status.as_str())
        .bind(&appointment.created_at)
        .bind(&appointment.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_appointment(
        &self,
        bot_id: &str,
        appointment_id: &str,
    ) -> Result<Option<Appointment>, StoreError> {
        let row = sqlx::query("SELECT * FROM appointments WHERE bot_id = $1 AND id = $2")
            .bind(bot_id)
            .bind(appointment_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(parse_appointment_row))
    }

    async fn set_appointment_status(
        &self,
        bot_id: &str,
        appointment_id: &str,
        status: AppointmentStatus,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE appointments SET status = $3, updated_at = $4 WHERE bot_id = $1 AND id = $2",
        )
        .bind(bot_id)
        .bind(appointment_id)
        .bind(status.as_str())
        .bind(now_iso())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_appointments(&self, bot_id: &str) -> Result<Vec<Appointment>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM appointments WHERE bot_id = $1 ORDER BY start_time DESC")
                .bind(bot_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.iter().map(parse_appointment_row).collect())
    }

    async fn insert_action_log(&self, record: &ActionExecution) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO action_executions (id, bot_id, chat_id, action_type, input, result, status, error, duration_ms, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
        )
        .bind(&record.id)
        .bind(&record.bot_id)
        .bind(&record.chat_id)
        .bind(&record.action_type)
        .bind(&record.input)
        .bind(&record.result)
        .bind(record.status.as_str())
        .bind(&record.error)
        .bind(record.duration_ms)
        .bind(&record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_action_logs(
        &self,
        bot_id: &str,
        limit: usize,
    ) -> Result<Vec<ActionExecution>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM action_executions WHERE bot_id = $1 ORDER BY seq DESC LIMIT $2",
        )
        .bind(bot_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(parse_action_log_row).collect())
    }
}

#[async_trait]
impl ScanJobStore for PgStore {
    async fn insert_job(&self, job: &SiteScanJob) -> Result<(), StoreError> {
        let selectors = job.selectors.as_ref();
        sqlx::query(
            "INSERT INTO site_scan_jobs (id, bot_id, start_url_after_login, login_url, username_selector, password_selector, submit_selector, username_encrypted, password_encrypted, status, error_message, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)",
        )
        .bind(&job.id)
        .bind(&job.bot_id)
        .bind(&job.start_url_after_login)
        .bind(&job.login_url)
        .bind(selectors.map(|s| s.username_selector.clone()))
        .bind(selectors.map(|s| s.password_selector.clone()))
        .bind(selectors.map(|s| s.submit_selector.clone()))
        .bind(&job.username_encrypted)
        .bind(&job.password_encrypted)
        .bind(job.status.as_str())
        .bind(&job.error_message)
        .bind(&job.created_at)
        .bind(&job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<SiteScanJob>, StoreError> {
        let row = sqlx::query("SELECT * FROM site_scan_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(parse_job_row))
    }

    async fn list_jobs(&self, bot_id: &str) -> Result<Vec<SiteScanJob>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM site_scan_jobs WHERE bot_id = $1 ORDER BY created_at DESC")
                .bind(bot_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.iter().map(parse_job_row).collect())
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        status: ScanStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE site_scan_jobs SET status = $2, error_message = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(error_message)
        .bind(now_iso())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_job(&self, bot_id: &str, job_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM site_scan_jobs WHERE bot_id = $1 AND id = $2")
            .bind(bot_id)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ScanQueue for PgStore {
    async fn enqueue(&self, payload: &ScanPayload, max_attempts: u32) -> Result<String, StoreError> {
        let queue_id = Uuid::new_v4().to_string();
        let value =
            serde_json::to_value(payload).map_err(|err| StoreError::Corrupt(err.to_string()))?;
        sqlx::query(
            "INSERT INTO scan_queue (id, job_id, payload, attempts, max_attempts, available_at, locked_until, created_at) \
             VALUES ($1,$2,$3,0,$4,now(),NULL,now())",
        )
        .bind(&queue_id)
        .bind(&payload.job_id)
        .bind(value)
        .bind(max_attempts as i32)
        .execute(&self.pool)
        .await?;
        Ok(queue_id)
    }

    async fn claim_next(&self) -> Result<Option<QueuedScan>, StoreError> {
        let row = sqlx::query(
            "UPDATE scan_queue SET attempts = attempts + 1, \
                    locked_until = now() + ($1::bigint * interval '1 second') \
             WHERE id = ( \
                SELECT id FROM scan_queue \
                WHERE available_at <= now() AND (locked_until IS NULL OR locked_until < now()) \
                ORDER BY created_at \
                FOR UPDATE SKIP LOCKED \
                LIMIT 1 \
             ) \
             RETURNING id, payload, attempts, max_attempts",
        )
        .bind(QUEUE_LEASE_SECS)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let payload: ScanPayload = serde_json::from_value(row.get::<Value, _>("payload"))
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        Ok(Some(QueuedScan {
            queue_id: row.get("id"),
            payload,
            attempt: row.get::<i32, _>("attempts").max(0) as u32,
            max_attempts: row.get::<i32, _>("max_attempts").max(1) as u32,
        }))
    }

    async fn complete(&self, queue_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM scan_queue WHERE id = $1")
            .bind(queue_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn retry_later(&self, queue_id: &str, delay: Duration) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE scan_queue SET locked_until = NULL, \
                    available_at = now() + ($2::bigint * interval '1 millisecond') \
             WHERE id = $1",
        )
        .bind(queue_id)
        .bind(delay.as_millis() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn discard_for_job(&self, job_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM scan_queue WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
