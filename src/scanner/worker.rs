use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use super::browser::{BrowserLauncher, BrowserSession};
use super::extract::{extract_visible_text, has_enough_content};
use super::{backoff_delay, CrawlError};
use crate::config::ScanSettings;
use crate::crypto::CredentialCipher;
use crate::knowledge::EmbeddingStore;
use crate::store::{ScanJobStore, ScanQueue};
use crate::types::{ChunkSource, LoginPayload, QueuedScan, ScanPayload, ScanStatus};

/// Drains the crawl queue with a bounded number of concurrent browsers.
pub struct ScanWorker {
    jobs: Arc<dyn ScanJobStore>,
    queue: Arc<dyn ScanQueue>,
    launcher: Arc<dyn BrowserLauncher>,
    embeddings: EmbeddingStore,
    cipher: CredentialCipher,
    settings: ScanSettings,
}

async fn timed<T>(
    after: Duration,
    step: &'static str,
    fut: impl Future<Output = Result<T, CrawlError>>,
) -> Result<T, CrawlError> {
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| CrawlError::Timeout { step, after })?
}

impl ScanWorker {
    pub fn new(
        jobs: Arc<dyn ScanJobStore>,
        queue: Arc<dyn ScanQueue>,
        launcher: Arc<dyn BrowserLauncher>,
        embeddings: EmbeddingStore,
        cipher: CredentialCipher,
        settings: ScanSettings,
    ) -> Self {
        Self {
            jobs,
            queue,
            launcher,
            embeddings,
            cipher,
            settings,
        }
    }

    /// Runs until `shutdown` flips to true, then waits for in-flight crawls.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let concurrency = self.settings.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        info!(concurrency, "scan worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let permit = tokio::select! {
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            match self.queue.claim_next().await {
                Ok(Some(entry)) => {
                    let worker = Arc::clone(&self);
                    tokio::spawn(async move {
                        worker.process(entry).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.poll_interval) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                Err(err) => {
                    drop(permit);
                    error!(error = %err, "scan queue claim failed");
                    tokio::time::sleep(self.settings.poll_interval).await;
                }
            }
        }

        let _ = permits.acquire_many(concurrency as u32).await;
        info!("scan worker stopped");
    }

    /// Claims and processes a single entry. Returns the job status it ended in.
    pub async fn process_next(&self) -> Option<ScanStatus> {
        match self.queue.claim_next().await {
            Ok(Some(entry)) => Some(self.process(entry).await),
            Ok(None) => None,
            Err(err) => {
                error!(error = %err, "scan queue claim failed");
                None
            }
        }
    }

    async fn process(&self, entry: QueuedScan) -> ScanStatus {
        let job_id = entry.payload.job_id.clone();
        let bot_id = entry.payload.bot_id.clone();

        match self.jobs.get_job(&job_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!(%job_id, "scan job deleted before it ran");
                if let Err(err) = self.queue.complete(&entry.queue_id).await {
                    warn!(%job_id, error = %err, "could not drop queue entry of deleted job");
                }
                return ScanStatus::Failed;
            }
            Err(err) => {
                error!(%job_id, error = %err, "scan job lookup failed");
                if let Err(err) = self
                    .queue
                    .retry_later(&entry.queue_id, self.settings.poll_interval)
                    .await
                {
                    warn!(%job_id, error = %err, "could not reschedule scan job");
                }
                return ScanStatus::Processing;
            }
        }

        if entry.attempt > entry.max_attempts {
            self.finish(&entry, ScanStatus::Failed, Some("attempts exhausted"))
                .await;
            return ScanStatus::Failed;
        }

        if let Err(err) = self
            .jobs
            .update_job_status(&job_id, ScanStatus::Processing, None)
            .await
        {
            warn!(%job_id, error = %err, "could not mark scan job processing");
        }
        info!(%job_id, %bot_id, attempt = entry.attempt, "scan job started");

        match self.crawl(&entry.payload).await {
            Ok(chunks) => {
                info!(%job_id, %bot_id, chunks, "scan job completed");
                self.finish(&entry, ScanStatus::Completed, None).await;
                ScanStatus::Completed
            }
            Err(err) if entry.attempt < entry.max_attempts => {
                let message = err.to_string();
                let delay = backoff_delay(self.settings.backoff_base, entry.attempt);
                warn!(
                    %job_id,
                    attempt = entry.attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %message,
                    "scan attempt failed"
                );
                if let Err(err) = self
                    .jobs
                    .update_job_status(&job_id, ScanStatus::Processing, Some(&message))
                    .await
                {
                    warn!(%job_id, error = %err, "could not record scan error");
                }
                if let Err(err) = self.queue.retry_later(&entry.queue_id, delay).await {
                    error!(%job_id, error = %err, "could not reschedule scan job");
                }
                ScanStatus::Processing
            }
            Err(err) => {
                let message = err.to_string();
                error!(%job_id, attempt = entry.attempt, error = %message, "scan job failed");
                self.finish(&entry, ScanStatus::Failed, Some(&message)).await;
                ScanStatus::Failed
            }
        }
    }

    async fn finish(&self, entry: &QueuedScan, status: ScanStatus, error_message: Option<&str>) {
        if let Err(err) = self
            .jobs
            .update_job_status(&entry.payload.job_id, status, error_message)
            .await
        {
            error!(job_id = %entry.payload.job_id, error = %err, "could not store scan job outcome");
        }
        if let Err(err) = self.queue.complete(&entry.queue_id).await {
            error!(job_id = %entry.payload.job_id, error = %err, "could not ack scan queue entry");
        }
    }

    /// Crawls one page and stores its text. Returns the number of chunks created.
    async fn crawl(&self, payload: &ScanPayload) -> Result<usize, CrawlError> {
        let limit = self.settings.navigation_timeout;
        let mut session = timed(limit, "browser launch", self.launcher.launch()).await?;
        let html = self.drive(session.as_mut(), payload).await;
        session.close().await;
        let html = html?;

        let text = extract_visible_text(&html);
        if !has_enough_content(&text) {
            return Err(CrawlError::TooLittleContent {
                chars: text.chars().count(),
            });
        }

        let chunks = self
            .embeddings
            .create_chunks(&payload.bot_id, ChunkSource::Scrape, &payload.start_url, &text)
            .await?;
        for chunk in &chunks {
            if let Err(err) = self
                .embeddings
                .generate_for_chunk(&payload.bot_id, &chunk.id)
                .await
            {
                warn!(
                    bot_id = %payload.bot_id,
                    chunk_id = %chunk.id,
                    error = %err,
                    "embedding failed for crawled chunk"
                );
            }
        }
        Ok(chunks.len())
    }

    async fn drive(
        &self,
        session: &mut dyn BrowserSession,
        payload: &ScanPayload,
    ) -> Result<String, CrawlError> {
        let limit = self.settings.navigation_timeout;
        if let Some(login) = &payload.login {
            self.login(session, login).await?;
        }
        timed(limit, "page navigation", session.navigate(&payload.start_url)).await?;
        timed(limit, "content read", session.content()).await
    }

    async fn login(
        &self,
        session: &mut dyn BrowserSession,
        login: &LoginPayload,
    ) -> Result<(), CrawlError> {
        let limit = self.settings.navigation_timeout;
        let username = self.cipher.decrypt(&login.username_encrypted)?;
        let password = self.cipher.decrypt(&login.password_encrypted)?;

        timed(limit, "login page", session.navigate(&login.login_url)).await?;
        timed(
            limit,
            "username field",
            session.fill(&login.username_selector, &username),
        )
        .await?;
        timed(
            limit,
            "password field",
            session.fill(&login.password_selector, &password),
        )
        .await?;
        timed(limit, "login submit", session.click(&login.submit_selector)).await?;
        timed(limit, "post-login navigation", session.wait_for_navigation())
            .await
            .map_err(|err| match err {
                CrawlError::Navigation(message) => CrawlError::Login(message),
                other => other,
            })
    }
}
