#![allow(dead_code)]
//! Shared fakes and setup for the integration tests.
//!
//! Every outbound collaborator (model, embedder, messaging, email, browser) is replaced by an
//! in-process fake that records what it was asked to do.

use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use agentdesk_server::{
    actions::config::{CalendarSettings, TwilioSettings, WebhookEvent, WebhookSettings},
    app::{AppState, Backends, Providers},
    channels::{
        CalendarChannel, CalendarEvent, ChannelError, Channels, EmailChannel, EmailMessage,
        MessagingChannel, PdfRenderer, TelegramSender, WebhookChannel, WhatsappTemplate,
    },
    config::{AppConfig, OpenAiSettings, RetrievalSettings, ScanSettings, StorageBackend},
    error::{EmbeddingProviderError, LlmError},
    llm::{Completion, CompletionRequest, EmbeddingProvider, LanguageModel, PromptMessage},
    now_iso,
    scanner::{
        browser::{BrowserLauncher, BrowserSession},
        CrawlError,
    },
    store::{ConversationStore, MemoryStore},
    types::{Bot, BotLanguage, ChunkSource, ModelSettings},
};
use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

pub const JWT_SECRET: &str = "test-jwt-secret-for-dashboard-tokens";
pub const CREDENTIALS_KEY: [u8; 32] = [7u8; 32];

//  Language model

/// What the orchestrator sent for one completion call.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<PromptMessage>,
    pub tool_names: Vec<String>,
}

impl RecordedRequest {
    pub fn system_prompt(&self) -> &str {
        match self.messages.first() {
            Some(PromptMessage::System(prompt)) => prompt,
            _ => "",
        }
    }
}

/// Replays queued completions in order; answers "ok" once the script runs out.
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<Completion, LlmError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedModel {
    pub fn push(&self, completion: Result<Completion, LlmError>) {
        self.script.lock().unwrap().push_back(completion);
    }

    pub fn push_text(&self, text: &str) {
        self.push(Ok(Completion {
            content: Some(text.to_string()),
            ..Default::default()
        }));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, LlmError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            messages: request.messages.to_vec(),
            tool_names: request.tools.iter().map(|tool| tool.name.to_string()).collect(),
        });
        self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(Completion {
                content: Some("ok".to_string()),
                ..Default::default()
            })
        })
    }
}

//  Embeddings

const VOCABULARY: [&str; 3] = ["refund", "shipping", "hours"];

/// Keyword-bucket vectors: texts sharing a vocabulary word land close together.
#[derive(Default)]
pub struct FakeEmbedder {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmbeddingProviderError::Request("connection reset".to_string()));
        }
        let lower = text.to_lowercase();
        let mut vector = VOCABULARY
            .iter()
            .map(|word| if lower.contains(word) { 1.0 } else { 0.0 })
            .collect::<Vec<f32>>();
        vector.push(0.05);
        Ok(vector)
    }
}

//  Channels

#[derive(Debug, Clone, PartialEq)]
pub struct SentText {
    pub channel: &'static str,
    pub to: String,
    pub body: String,
    pub template_sid: Option<String>,
}

/// Twilio stand-in. Either channel can be told to reject with a fixed error.
#[derive(Default)]
pub struct RecordingMessaging {
    pub whatsapp_error: Option<ChannelError>,
    pub sms_error: Option<ChannelError>,
    pub sent: Mutex<Vec<SentText>>,
}

impl RecordingMessaging {
    /// WhatsApp rejected for being outside the customer-service window.
    pub fn whatsapp_window_closed() -> Self {
        Self {
            whatsapp_error: Some(ChannelError::Rejected {
                status: 400,
                body: r#"{"code":63016,"message":"Failed to send freeform message because you are outside the allowed window."}"#
                    .to_string(),
            }),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<SentText> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingChannel for RecordingMessaging {
    async fn send_sms(
        &self,
        _settings: &TwilioSettings,
        to: &str,
        body: &str,
    ) -> Result<String, ChannelError> {
        if let Some(err) = &self.sms_error {
            return Err(err.clone());
        }
        self.sent.lock().unwrap().push(SentText {
            channel: "sms",
            to: to.to_string(),
            body: body.to_string(),
            template_sid: None,
        });
        Ok(format!("SM{}", Uuid::new_v4().simple()))
    }

    async fn send_whatsapp(
        &self,
        _settings: &TwilioSettings,
        to: &str,
        body: &str,
        template: Option<&WhatsappTemplate>,
    ) -> Result<String, ChannelError> {
        if let Some(err) = &self.whatsapp_error {
            return Err(err.clone());
        }
        self.sent.lock().unwrap().push(SentText {
            channel: "whatsapp",
            to: to.to_string(),
            body: body.to_string(),
            template_sid: template.map(|template| template.content_sid.clone()),
        });
        Ok(format!("WA{}", Uuid::new_v4().simple()))
    }
}

#[derive(Default)]
pub struct RecordingEmail {
    pub failing: AtomicBool,
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingEmail {
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailChannel for RecordingEmail {
    async fn send(&self, message: &EmailMessage) -> Result<String, ChannelError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::Rejected {
                status: 401,
                body: "invalid api key".to_string(),
            });
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(format!("email-{}", Uuid::new_v4()))
    }
}

#[derive(Default)]
pub struct RecordingCalendar {
    events: Mutex<Vec<CalendarEvent>>,
}

impl RecordingCalendar {
    pub fn events(&self) -> Vec<CalendarEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl CalendarChannel for RecordingCalendar {
    async fn create_event(
        &self,
        _settings: &CalendarSettings,
        event: &CalendarEvent,
    ) -> Result<String, ChannelError> {
        self.events.lock().unwrap().push(event.clone());
        Ok("evt_1".to_string())
    }
}

#[derive(Default)]
pub struct RecordingWebhook {
    deliveries: Mutex<Vec<(WebhookEvent, Value)>>,
}

impl RecordingWebhook {
    pub fn deliveries(&self) -> Vec<(WebhookEvent, Value)> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookChannel for RecordingWebhook {
    async fn deliver(
        &self,
        _settings: &WebhookSettings,
        event: WebhookEvent,
        data: &Value,
    ) -> Result<u16, ChannelError> {
        self.deliveries.lock().unwrap().push((event, data.clone()));
        Ok(200)
    }
}

pub struct StaticPdf;

#[async_trait]
impl PdfRenderer for StaticPdf {
    async fn render(&self, _html: &str) -> Result<Vec<u8>, ChannelError> {
        Ok(b"%PDF-1.4\n% test document\n".to_vec())
    }
}

#[derive(Default)]
pub struct RecordingTelegram {
    sent: Mutex<Vec<(String, i64, String)>>,
}

impl RecordingTelegram {
    pub fn sent(&self) -> Vec<(String, i64, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelegramSender for RecordingTelegram {
    async fn send_message(
        &self,
        bot_token: &str,
        chat_id: i64,
        text: &str,
    ) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .unwrap()
            .push((bot_token.to_string(), chat_id, text.to_string()));
        Ok(())
    }
}

//  Browser

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageBehavior {
    Serve,
    HangOnNavigate,
}

/// Launches fake sessions that serve a fixed page or never finish navigating.
pub struct ScriptedBrowser {
    pub behavior: PageBehavior,
    pub html: String,
    pub closes: Arc<AtomicUsize>,
    pub filled: Arc<Mutex<Vec<(String, String)>>>,
}

impl ScriptedBrowser {
    pub fn new(behavior: PageBehavior, html: &str) -> Self {
        Self {
            behavior,
            html: html.to_string(),
            closes: Arc::new(AtomicUsize::new(0)),
            filled: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedBrowser {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, CrawlError> {
        Ok(Box::new(ScriptedSession {
            behavior: self.behavior,
            html: self.html.clone(),
            closes: Arc::clone(&self.closes),
            filled: Arc::clone(&self.filled),
        }))
    }
}

struct ScriptedSession {
    behavior: PageBehavior,
    html: String,
    closes: Arc<AtomicUsize>,
    filled: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn navigate(&mut self, _url: &str) -> Result<(), CrawlError> {
        if self.behavior == PageBehavior::HangOnNavigate {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), CrawlError> {
        self.filled
            .lock()
            .unwrap()
            .push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn click(&mut self, _selector: &str) -> Result<(), CrawlError> {
        Ok(())
    }

    async fn wait_for_navigation(&mut self) -> Result<(), CrawlError> {
        Ok(())
    }

    async fn content(&mut self) -> Result<String, CrawlError> {
        Ok(self.html.clone())
    }

    async fn close(self: Box<Self>) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

//  Setup

pub fn test_config() -> AppConfig {
    AppConfig {
        port: 0,
        storage: StorageBackend::Memory,
        database_url: String::new(),
        openai: OpenAiSettings {
            api_key: "sk-test".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            chat_model: "gpt-4.1-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: VOCABULARY.len() + 1,
        },
        retrieval: RetrievalSettings::default(),
        history_window: 10,
        email: None,
        credentials_key: CREDENTIALS_KEY,
        supabase_jwt_secret: JWT_SECRET.to_string(),
        media_storage_dir: temp_media_dir(),
        public_base_url: "http://localhost:4000".to_string(),
        scan: ScanSettings {
            concurrency: 1,
            max_attempts: 1,
            backoff_base: Duration::ZERO,
            navigation_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
            chrome_path: None,
        },
        default_utc_offset_minutes: 120,
    }
}

fn temp_media_dir() -> PathBuf {
    std::env::temp_dir().join(format!("agentdesk-test-media-{}", Uuid::new_v4()))
}

/// A fully wired application over a [`MemoryStore`] and recording fakes.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub model: Arc<ScriptedModel>,
    pub embedder: Arc<FakeEmbedder>,
    pub messaging: Arc<RecordingMessaging>,
    pub email: Arc<RecordingEmail>,
    pub calendar: Arc<RecordingCalendar>,
    pub webhook: Arc<RecordingWebhook>,
    pub telegram: Arc<RecordingTelegram>,
    pub config: AppConfig,
    pub state: Arc<AppState>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_messaging(RecordingMessaging::default())
    }

    pub fn with_messaging(messaging: RecordingMessaging) -> Self {
        Self::build(messaging, |backends| backends)
    }

    /// Wires the app over the memory store after `customize` has swapped any backend.
    pub fn with_backends(customize: impl FnOnce(Backends) -> Backends) -> Self {
        Self::build(RecordingMessaging::default(), customize)
    }

    fn build(messaging: RecordingMessaging, customize: impl FnOnce(Backends) -> Backends) -> Self {
        let store = Arc::new(MemoryStore::new());
        let model = Arc::new(ScriptedModel::default());
        let embedder = Arc::new(FakeEmbedder::default());
        let messaging = Arc::new(messaging);
        let email = Arc::new(RecordingEmail::default());
        let calendar = Arc::new(RecordingCalendar::default());
        let webhook = Arc::new(RecordingWebhook::default());
        let telegram = Arc::new(RecordingTelegram::default());
        let config = test_config();

        let channels = Channels {
            messaging: messaging.clone(),
            email: email.clone(),
            calendar: calendar.clone(),
            webhook: webhook.clone(),
            pdf: Arc::new(StaticPdf),
            telegram: telegram.clone(),
        };
        let state = Arc::new(AppState::new(
            customize(Backends::shared(store.clone())),
            Providers {
                model: model.clone(),
                embedder: embedder.clone(),
                channels,
            },
            &config,
        ));
        Self {
            store,
            model,
            embedder,
            messaging,
            email,
            calendar,
            webhook,
            telegram,
            config,
            state,
        }
    }

    pub async fn seed_bot(&self, owner_id: &str, language: BotLanguage) -> Bot {
        let bot = Bot {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            name: "Harbor Dental".to_string(),
            public_token: Uuid::new_v4().simple().to_string(),
            language,
            model: ModelSettings::default(),
            is_active: true,
            is_trained: false,
            allowed_domains: Vec::new(),
            telegram: None,
            created_at: now_iso(),
        };
        self.store.save_bot(&bot).await.unwrap();
        bot
    }

    /// Stores `text` as manual knowledge for the bot and embeds every chunk.
    pub async fn seed_knowledge(&self, bot_id: &str, text: &str) -> Vec<String> {
        let chunks = self
            .state
            .embeddings
            .create_chunks(bot_id, ChunkSource::Manual, "faq", text)
            .await
            .unwrap();
        for chunk in &chunks {
            self.state
                .embeddings
                .generate_for_chunk(bot_id, &chunk.id)
                .await
                .unwrap();
        }
        chunks.into_iter().map(|chunk| chunk.id).collect()
    }
}

/// Signs a dashboard token the way the identity provider does.
pub fn dashboard_token(user_id: &str) -> String {
    let exp = chrono::Utc::now().timestamp() + 3600;
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &json!({ "sub": user_id, "exp": exp, "email": format!("{user_id}@example.com") }),
        &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}
