use std::{env, path::PathBuf, str::FromStr, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
}

#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    /// Minimum cosine similarity for a chunk to enter the context.
    pub threshold: f64,
    pub top_k: usize,
    pub max_context_chars: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            top_k: 5,
            max_context_chars: 6000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub navigation_timeout: Duration,
    pub poll_interval: Duration,
    pub chrome_path: Option<PathBuf>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_attempts: 3,
            backoff_base: Duration::from_millis(5000),
            navigation_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(1000),
            chrome_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub resend_api_key: String,
    pub from_address: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub storage: StorageBackend,
    pub database_url: String,
    pub openai: OpenAiSettings,
    pub retrieval: RetrievalSettings,
    pub history_window: usize,
    pub email: Option<EmailSettings>,
    pub credentials_key: [u8; 32],
    pub supabase_jwt_secret: String,
    pub media_storage_dir: PathBuf,
    pub public_base_url: String,
    pub scan: ScanSettings,
    pub default_utc_offset_minutes: i32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_or("PORT", 4000u16)?;
        let storage = match optional("STORAGE_BACKEND").as_deref() {
            None | Some("postgres") => StorageBackend::Postgres,
            Some("memory") => StorageBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "STORAGE_BACKEND",
                    reason: format!("unknown backend {other}"),
                })
            }
        };

        let openai = OpenAiSettings {
            api_key: required("OPENAI_API_KEY")?,
            base_url: optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            chat_model: optional("OPENAI_CHAT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            embedding_model: optional("OPENAI_EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            embedding_dimensions: parse_or("EMBEDDING_DIMENSIONS", 1536usize)?,
        };

        check_embedding_dimensions(storage, openai.embedding_dimensions)?;

        let retrieval = RetrievalSettings {
            threshold: parse_or("RETRIEVAL_THRESHOLD", 0.1f64)?,
            top_k: parse_or("RETRIEVAL_TOP_K", 5usize)?,
            max_context_chars: parse_or("RETRIEVAL_MAX_CONTEXT_CHARS", 6000usize)?,
        };
        if !(0.0..=1.0).contains(&retrieval.threshold) {
            return Err(ConfigError::Invalid {
                key: "RETRIEVAL_THRESHOLD",
                reason: "must be between 0 and 1".to_string(),
            });
        }
        if retrieval.top_k == 0 {
            return Err(ConfigError::Invalid {
                key: "RETRIEVAL_TOP_K",
                reason: "must be positive".to_string(),
            });
        }

        let email = optional("RESEND_API_KEY").map(|resend_api_key| EmailSettings {
            resend_api_key,
            from_address: optional("EMAIL_FROM")
                .unwrap_or_else(|| "AgentDesk <notifications@agentdesk.app>".to_string()),
        });

        let credentials_key = parse_key(&required("CREDENTIALS_ENCRYPTION_KEY")?)?;

        let scan = ScanSettings {
            concurrency: parse_or("SCAN_WORKER_CONCURRENCY", 2usize)?.max(1),
            max_attempts: parse_or("SCAN_JOB_ATTEMPTS", 3u32)?.max(1),
            backoff_base: Duration::from_millis(parse_or("SCAN_BACKOFF_MS", 5000u64)?),
            navigation_timeout: Duration::from_secs(parse_or("SCAN_NAVIGATION_TIMEOUT_SECS", 30u64)?),
            poll_interval: Duration::from_millis(parse_or("SCAN_POLL_INTERVAL_MS", 1000u64)?),
            chrome_path: optional("CHROME_PATH").map(PathBuf::from),
        };

        let default_utc_offset_minutes = parse_or("DEFAULT_UTC_OFFSET_MINUTES", 120i32)?;
        if default_utc_offset_minutes.abs() > 14 * 60 {
            return Err(ConfigError::Invalid {
                key: "DEFAULT_UTC_OFFSET_MINUTES",
                reason: "offset must be within +/-14h".to_string(),
            });
        }

        Ok(Self {
            port,
            storage,
            database_url: resolve_database_url(),
            openai,
            retrieval,
            history_window: parse_or("CHAT_HISTORY_WINDOW", 10usize)?,
            email,
            credentials_key,
            supabase_jwt_secret: required("SUPABASE_JWT_SECRET")?,
            media_storage_dir: optional("MEDIA_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./media_uploads")),
            public_base_url: optional("API_PUBLIC_URL")
                .unwrap_or_else(|| format!("http://localhost:{port}"))
                .trim_end_matches('/')
                .to_string(),
            scan,
            default_utc_offset_minutes,
        })
    }
}

/// Postgres stores vectors in a fixed-width column, so the provider must match it.
fn check_embedding_dimensions(storage: StorageBackend, dimensions: usize) -> Result<(), ConfigError> {
    if dimensions == 0 {
        return Err(ConfigError::Invalid {
            key: "EMBEDDING_DIMENSIONS",
            reason: "must be positive".to_string(),
        });
    }
    let column = crate::store::postgres::EMBEDDING_COLUMN_DIMENSIONS;
    if storage == StorageBackend::Postgres && dimensions != column {
        return Err(ConfigError::Invalid {
            key: "EMBEDDING_DIMENSIONS",
            reason: format!("the postgres schema stores {column}-dimension vectors, got {dimensions}"),
        });
    }
    Ok(())
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing(key))
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match optional(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|err| ConfigError::Invalid {
            key,
            reason: err.to_string(),
        }),
    }
}

fn parse_key(raw: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = hex::decode(raw.trim()).map_err(|err| ConfigError::Invalid {
        key: "CREDENTIALS_ENCRYPTION_KEY",
        reason: err.to_string(),
    })?;
    bytes.try_into().map_err(|_| ConfigError::Invalid {
        key: "CREDENTIALS_ENCRYPTION_KEY",
        reason: "expected 64 hex characters (32 bytes)".to_string(),
    })
}

fn resolve_database_url() -> String {
    if let Some(url) = optional("DATABASE_URL") {
        return url;
    }
    let host = optional("POSTGRES_HOST")
        .or_else(|| optional("PGHOST"))
        .unwrap_or_else(|| "localhost".to_string());
    let port = optional("POSTGRES_PORT")
        .or_else(|| optional("PGPORT"))
        .unwrap_or_else(|| "5432".to_string());
    let user = optional("POSTGRES_USER")
        .or_else(|| optional("PGUSER"))
        .unwrap_or_else(|| "postgres".to_string());
    let password = optional("POSTGRES_PASSWORD")
        .or_else(|| optional("PGPASSWORD"))
        .unwrap_or_default();
    let db = optional("POSTGRES_DB")
        .or_else(|| optional("PGDATABASE"))
        .unwrap_or_else(|| "agentdesk".to_string());
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}
