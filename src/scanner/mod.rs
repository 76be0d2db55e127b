//! Site crawl jobs: enqueueing with encrypted credentials, and the worker pool that drives a
//! headless browser through optional login, extraction and embedding.

pub mod browser;
pub mod extract;
pub mod worker;

use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::crypto::{CredentialCipher, CryptoError};
use crate::error::{AppError, StoreError};
use crate::now_iso;
use crate::store::{ScanJobStore, ScanQueue};
use crate::types::{LoginPayload, LoginSelectors, ScanPayload, ScanStatus, SiteScanJob};

pub use browser::{BrowserLauncher, BrowserSession, ChromeLauncher};
pub use worker::ScanWorker;

#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("{step} timed out after {}s", .after.as_secs())]
    Timeout { step: &'static str, after: Duration },
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("login failed: {0}")]
    Login(String),
    #[error("content extraction failed: {0}")]
    Extraction(String),
    #[error("page yielded too little text ({chars} characters)")]
    TooLittleContent { chars: usize },
    #[error("stored credentials unusable: {0}")]
    Credentials(#[from] CryptoError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A validated crawl request with plaintext credentials, which never leave this module.
#[derive(Clone, Debug)]
pub struct NewScan {
    pub bot_id: String,
    pub start_url_after_login: String,
    pub login: Option<NewScanLogin>,
}

#[derive(Clone)]
pub struct NewScanLogin {
    pub login_url: String,
    pub selectors: LoginSelectors,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for NewScanLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewScanLogin")
            .field("login_url", &self.login_url)
            .field("selectors", &self.selectors)
            .finish_non_exhaustive()
    }
}

fn http_url(field: &'static str, value: &str) -> Result<String, AppError> {
    match url::Url::parse(value.trim()) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(parsed.to_string()),
        _ => Err(AppError::validation(field, format!("invalid URL: {value}"))),
    }
}

impl NewScan {
    /// Builds a request from raw input. Login fields are all-or-nothing.
    #[allow(clippy::too_many_arguments)]
    pub fn parse(
        bot_id: &str,
        start_url_after_login: &str,
        login_url: Option<&str>,
        username_selector: Option<&str>,
        password_selector: Option<&str>,
        submit_selector: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, AppError> {
        let start_url_after_login = http_url("startUrlAfterLogin", start_url_after_login)?;
        let non_empty = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        let fields = [
            ("loginUrl", non_empty(login_url)),
            ("usernameSelector", non_empty(username_selector)),
            ("passwordSelector", non_empty(password_selector)),
            ("submitSelector", non_empty(submit_selector)),
            ("username", non_empty(username)),
            // Passwords may legitimately carry surrounding spaces.
            ("password", password.filter(|p| !p.is_empty()).map(str::to_string)),
        ];
        let login = if fields.iter().all(|(_, value)| value.is_none()) {
            None
        } else {
            if let Some(field) = fields
                .iter()
                .find(|(_, value)| value.is_none())
                .map(|(field, _)| *field)
            {
                return Err(AppError::validation(
                    field,
                    format!("{field} is required when login details are supplied"),
                ));
            }
            let [login_url, username_selector, password_selector, submit_selector, username, password] =
                fields.map(|(_, value)| value.unwrap_or_default());
            Some(NewScanLogin {
                login_url: http_url("loginUrl", &login_url)?,
                selectors: LoginSelectors {
                    username_selector,
                    password_selector,
                    submit_selector,
                },
                username,
                password,
            })
        };
        Ok(Self {
            bot_id: bot_id.to_string(),
            start_url_after_login,
            login,
        })
    }
}

/// Encrypts credentials, persists a `queued` job and places it on the queue.
pub async fn enqueue_scan(
    jobs: &dyn ScanJobStore,
    queue: &dyn ScanQueue,
    cipher: &CredentialCipher,
    max_attempts: u32,
    request: NewScan,
) -> Result<SiteScanJob, AppError> {
    let sealed = match &request.login {
        Some(login) => Some((
            cipher
                .encrypt(&login.username)
                .map_err(|err| AppError::Internal(err.to_string()))?,
            cipher
                .encrypt(&login.password)
                .map_err(|err| AppError::Internal(err.to_string()))?,
        )),
        None => None,
    };

    let now = now_iso();
    let job = SiteScanJob {
        id: Uuid::new_v4().to_string(),
        bot_id: request.bot_id.clone(),
        start_url_after_login: request.start_url_after_login.clone(),
        login_url: request.login.as_ref().map(|login| login.login_url.clone()),
        selectors: request.login.as_ref().map(|login| login.selectors.clone()),
        username_encrypted: sealed.as_ref().map(|(user, _)| user.clone()),
        password_encrypted: sealed.as_ref().map(|(_, pass)| pass.clone()),
        status: ScanStatus::Queued,
        error_message: None,
        created_at: now.clone(),
        updated_at: now,
    };
    jobs.insert_job(&job).await?;

    let payload = ScanPayload {
        job_id: job.id.clone(),
        bot_id: job.bot_id.clone(),
        start_url: job.start_url_after_login.clone(),
        login: match (&request.login, sealed) {
            (Some(login), Some((username_encrypted, password_encrypted))) => Some(LoginPayload {
                login_url: login.login_url.clone(),
                username_selector: login.selectors.username_selector.clone(),
                password_selector: login.selectors.password_selector.clone(),
                submit_selector: login.selectors.submit_selector.clone(),
                username_encrypted,
                password_encrypted,
            }),
            _ => None,
        },
    };
    if let Err(err) = queue.enqueue(&payload, max_attempts).await {
        jobs.update_job_status(&job.id, ScanStatus::Failed, Some("could not enqueue job"))
            .await?;
        return Err(err.into());
    }
    info!(bot_id = %job.bot_id, job_id = %job.id, with_login = job.login_url.is_some(), "scan job queued");
    Ok(job)
}

/// Hard-deletes a job and drops any queue entry still waiting for it.
pub async fn delete_scan(
    jobs: &dyn ScanJobStore,
    queue: &dyn ScanQueue,
    bot_id: &str,
    job_id: &str,
) -> Result<bool, StoreError> {
    let deleted = jobs.delete_job(bot_id, job_id).await?;
    if deleted {
        queue.discard_for_job(job_id).await?;
    }
    Ok(deleted)
}

pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}
