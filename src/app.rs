use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::{net::TcpListener, sync::watch};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::actions::{ActionExecutor, MediaSettings};
use crate::auth::JwtVerifier;
use crate::channels::{
    Channels, ChromePdfRenderer, GoogleCalendarClient, HttpWebhookClient, ResendClient,
    TelegramClient, TelegramSender, TwilioClient,
};
use crate::chat::ChatOrchestrator;
use crate::config::{AppConfig, ConfigError, StorageBackend};
use crate::crypto::CredentialCipher;
use crate::error::StoreError;
use crate::knowledge::EmbeddingStore;
use crate::llm::{EmbeddingProvider, LanguageModel, OpenAiClient};
use crate::logging;
use crate::routes;
use crate::scanner::{ChromeLauncher, ScanWorker};
use crate::store::{
    ActionStore, ConversationStore, KnowledgeStore, MemoryStore, PgStore, ScanJobStore, ScanQueue,
};

#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence handles, one per concern. A single store usually backs all of them.
#[derive(Clone)]
pub struct Backends {
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub actions: Arc<dyn ActionStore>,
    pub scan_jobs: Arc<dyn ScanJobStore>,
    pub scan_queue: Arc<dyn ScanQueue>,
}

impl Backends {
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: KnowledgeStore + ConversationStore + ActionStore + ScanJobStore + ScanQueue + 'static,
    {
        Self {
            knowledge: store.clone(),
            conversations: store.clone(),
            actions: store.clone(),
            scan_jobs: store.clone(),
            scan_queue: store,
        }
    }
}

pub struct Providers {
    pub model: Arc<dyn LanguageModel>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub channels: Channels,
}

pub struct AppState {
    pub conversations: Arc<dyn ConversationStore>,
    pub actions: Arc<dyn ActionStore>,
    pub scan_jobs: Arc<dyn ScanJobStore>,
    pub scan_queue: Arc<dyn ScanQueue>,
    pub embeddings: EmbeddingStore,
    pub orchestrator: ChatOrchestrator,
    pub executor: ActionExecutor,
    pub telegram: Arc<dyn TelegramSender>,
    pub cipher: CredentialCipher,
    pub jwt: JwtVerifier,
    pub media_storage_dir: PathBuf,
    pub public_base_url: String,
    pub scan_max_attempts: u32,
    /// Model given to bots created without explicit model settings.
    pub default_chat_model: String,
}

impl AppState {
    pub fn new(backends: Backends, providers: Providers, config: &AppConfig) -> Self {
        let embeddings = EmbeddingStore::new(providers.embedder, backends.knowledge.clone());
        let executor = ActionExecutor::new(
            backends.actions.clone(),
            backends.conversations.clone(),
            providers.channels.clone(),
            MediaSettings {
                storage_dir: config.media_storage_dir.clone(),
                public_base_url: config.public_base_url.clone(),
            },
            config.default_utc_offset_minutes,
        );
        let orchestrator = ChatOrchestrator::new(
            backends.conversations.clone(),
            backends.actions.clone(),
            providers.model,
            embeddings.clone(),
            executor.clone(),
            config.retrieval.clone(),
            config.history_window,
            config.default_utc_offset_minutes,
        );
        Self {
            conversations: backends.conversations,
            actions: backends.actions,
            scan_jobs: backends.scan_jobs,
            scan_queue: backends.scan_queue,
            embeddings,
            orchestrator,
            executor,
            telegram: providers.channels.telegram,
            cipher: CredentialCipher::new(config.credentials_key),
            jwt: JwtVerifier::new(&config.supabase_jwt_secret),
            media_storage_dir: config.media_storage_dir.clone(),
            public_base_url: config.public_base_url.clone(),
            scan_max_attempts: config.scan.max_attempts,
            default_chat_model: config.openai.chat_model.clone(),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/media/{file_name}", get(routes::media::serve_stored_media))
        .route("/chat/message", post(routes::chat::post_chat_message))
        .route(
            "/telegram/webhook/{bot_id}",
            post(routes::telegram::telegram_webhook),
        )
        .route("/bots", post(routes::bots::create_bot))
        .route("/bots/{bot_id}", get(routes::bots::get_bot))
        .route("/bots/{bot_id}/content", post(routes::content::add_content))
        .route(
            "/bots/{bot_id}/content/{chunk_id}",
            delete(routes::content::delete_content),
        )
        .route(
            "/bots/{bot_id}/content/{chunk_id}/embed",
            post(routes::content::embed_content),
        )
        .route(
            "/bots/{bot_id}/actions/config",
            get(routes::actions::get_actions_config).put(routes::actions::put_actions_config),
        )
        .route(
            "/bots/{bot_id}/actions/logs",
            get(routes::actions::list_action_logs),
        )
        .route(
            "/bots/{bot_id}/leads",
            get(routes::actions::list_leads).post(routes::actions::create_lead),
        )
        .route(
            "/bots/{bot_id}/leads/{lead_id}",
            delete(routes::actions::delete_lead),
        )
        .route(
            "/bots/{bot_id}/appointments",
            get(routes::actions::list_appointments),
        )
        .route(
            "/bots/{bot_id}/appointments/{appointment_id}/notify",
            post(routes::actions::renotify_appointment),
        )
        .route("/scraper/scan/start", post(routes::scanner::start_scan))
        .route(
            "/scraper/scan/jobs/{bot_id}",
            get(routes::scanner::list_scan_jobs),
        )
        .route(
            "/scraper/scan/job/{job_id}/{bot_id}",
            delete(routes::scanner::delete_scan_job),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "could not listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

pub async fn run() -> Result<(), BootError> {
    let _ = dotenvy::dotenv();
    logging::init();

    let config = AppConfig::from_env()?;
    tokio::fs::create_dir_all(&config.media_storage_dir).await?;

    let backends = match config.storage {
        StorageBackend::Postgres => {
            Backends::shared(Arc::new(PgStore::connect(&config.database_url).await?))
        }
        StorageBackend::Memory => {
            warn!("using in-memory storage; data is lost on restart");
            Backends::shared(Arc::new(MemoryStore::new()))
        }
    };

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()?;
    let openai = Arc::new(OpenAiClient::new(http.clone(), config.openai.clone()));
    let channels = Channels {
        messaging: Arc::new(TwilioClient::new(http.clone())),
        email: Arc::new(ResendClient::new(http.clone(), config.email.clone())),
        calendar: Arc::new(GoogleCalendarClient::new(http.clone())),
        webhook: Arc::new(HttpWebhookClient::new(http.clone())),
        pdf: Arc::new(ChromePdfRenderer::new(
            config.scan.chrome_path.clone(),
            config.scan.navigation_timeout,
        )),
        telegram: Arc::new(TelegramClient::new(http)),
    };
    if config.email.is_none() {
        warn!("RESEND_API_KEY is not set; email actions will fail");
    }

    let state = Arc::new(AppState::new(
        backends,
        Providers {
            model: openai.clone(),
            embedder: openai,
            channels,
        },
        &config,
    ));

    let worker = Arc::new(ScanWorker::new(
        state.scan_jobs.clone(),
        state.scan_queue.clone(),
        Arc::new(ChromeLauncher::new(
            config.scan.chrome_path.clone(),
            config.scan.navigation_timeout,
        )),
        state.embeddings.clone(),
        state.cipher.clone(),
        config.scan.clone(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = tokio::spawn(worker.run(shutdown_rx));

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(
        port = config.port,
        storage = ?config.storage,
        "agentdesk server listening"
    );
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(err) = worker_handle.await {
        error!(error = %err, "scan worker ended abnormally");
    }
    info!("agentdesk server stopped");
    Ok(())
}
