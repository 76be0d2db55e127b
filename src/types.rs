use serde::{Deserialize, Serialize};
use serde_json::Value;

//  Bots

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BotLanguage {
    #[default]
    En,
    He,
}

impl BotLanguage {
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "he" | "iw" | "hebrew" => Self::He,
            _ => Self::En,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::He => "he",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramLink {
    pub bot_token: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bot {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub public_token: String,
    pub language: BotLanguage,
    pub model: ModelSettings,
    pub is_active: bool,
    pub is_trained: bool,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default, skip_serializing)]
    pub telegram: Option<TelegramLink>,
    pub created_at: String,
}

//  Knowledge

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ChunkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkSource {
    Scrape,
    Document,
    Manual,
}

impl ChunkSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scrape => "scrape",
            Self::Document => "document",
            Self::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "scrape" => Self::Scrape,
            "document" => Self::Document,
            _ => Self::Manual,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentChunk {
    pub id: String,
    pub bot_id: String,
    pub source: ChunkSource,
    pub source_ref: String,
    pub raw_text: String,
    pub word_count: i32,
    pub status: ChunkStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct Embedding {
    pub id: String,
    pub bot_id: String,
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub text: String,
    pub score: f64,
}

//  Conversations

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value == "assistant" {
            Self::Assistant
        } else {
            Self::User
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub bot_id: String,
    pub session_id: String,
    #[serde(default)]
    pub visitor_metadata: Value,
    pub message_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<i64>,
    #[serde(default)]
    pub context_chunk_ids: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageKind {
    Conversation,
    Sms,
    Whatsapp,
}

impl UsageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Sms => "sms",
            Self::Whatsapp => "whatsapp",
        }
    }
}

//  Leads, appointments, action logs

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub bot_id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub source: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value == "confirmed" {
            Self::Confirmed
        } else {
            Self::Pending
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub bot_id: String,
    pub lead_id: Option<String>,
    pub attendee_name: String,
    #[serde(default)]
    pub attendee_email: Option<String>,
    #[serde(default)]
    pub attendee_phone: Option<String>,
    pub start_time: String,
    pub duration_minutes: i32,
    #[serde(default)]
    pub notes: Option<String>,
    pub status: AppointmentStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionExecution {
    pub id: String,
    pub bot_id: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    pub action_type: String,
    pub input: Value,
    pub result: Value,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub duration_ms: i64,
    pub created_at: String,
}

//  Site scan jobs

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Queued,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSelectors {
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteScanJob {
    pub id: String,
    pub bot_id: String,
    pub start_url_after_login: String,
    #[serde(default)]
    pub login_url: Option<String>,
    #[serde(default)]
    pub selectors: Option<LoginSelectors>,
    #[serde(default, skip_serializing)]
    pub username_encrypted: Option<String>,
    #[serde(default, skip_serializing)]
    pub password_encrypted: Option<String>,
    pub status: ScanStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Queue payload for one crawl. Credentials are carried only in encrypted form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanPayload {
    pub job_id: String,
    pub bot_id: String,
    pub start_url: String,
    #[serde(default)]
    pub login: Option<LoginPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    pub login_url: String,
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    pub username_encrypted: String,
    pub password_encrypted: String,
}

#[derive(Debug, Clone)]
pub struct QueuedScan {
    pub queue_id: String,
    pub payload: ScanPayload,
    pub attempt: u32,
    pub max_attempts: u32,
}
