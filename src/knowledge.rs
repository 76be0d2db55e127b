use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EmbeddingProviderError, KnowledgeError, StoreError};
use crate::llm::EmbeddingProvider;
use crate::now_iso;
use crate::store::KnowledgeStore;
use crate::types::{ChunkSource, ChunkStatus, ContentChunk, Embedding, ScoredChunk};

pub const CHUNK_WORDS: usize = 600;
pub const CHUNK_OVERLAP_WORDS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedOutcome {
    Created,
    AlreadyPresent,
}

/// Embedding generation and tenant-scoped similarity search over stored chunks.
#[derive(Clone)]
pub struct EmbeddingStore {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn KnowledgeStore>,
}

impl EmbeddingStore {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, store: Arc<dyn KnowledgeStore>) -> Self {
        Self { provider, store }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingProviderError> {
        if text.trim().is_empty() {
            return Err(EmbeddingProviderError::EmptyInput);
        }
        self.provider.embed(text).await
    }

    pub async fn similarity_search(
        &self,
        query: &[f32],
        bot_id: &str,
        threshold: f64,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, KnowledgeError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(KnowledgeError::InvalidParameter {
                parameter: "threshold",
                reason: format!("{threshold} is outside [0, 1]"),
            });
        }
        if top_k == 0 {
            return Err(KnowledgeError::InvalidParameter {
                parameter: "topK",
                reason: "must be positive".to_string(),
            });
        }
        let mut results = self
            .store
            .search_embeddings(bot_id, query, threshold, top_k)
            .await?;
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);
        Ok(results)
    }

    /// Embeds one chunk unless it already has an embedding.
    pub async fn generate_for_chunk(
        &self,
        bot_id: &str,
        chunk_id: &str,
    ) -> Result<EmbedOutcome, KnowledgeError> {
        let chunk = self
            .store
            .get_chunk(bot_id, chunk_id)
            .await?
            .ok_or(StoreError::NotFound { entity: "content chunk" })?;
        if self.store.has_embedding(bot_id, chunk_id).await? {
            debug!(bot_id, chunk_id, "embedding already present");
            return Ok(EmbedOutcome::AlreadyPresent);
        }

        self.store
            .set_chunk_status(bot_id, chunk_id, ChunkStatus::Processing)
            .await?;
        let vector = match self.embed(&chunk.raw_text).await {
            Ok(vector) => vector,
            Err(err) => {
                warn!(bot_id, chunk_id, error = %err, "embedding generation failed");
                self.store
                    .set_chunk_status(bot_id, chunk_id, ChunkStatus::Failed)
                    .await?;
                return Err(err.into());
            }
        };

        if self.store_vector(&chunk, vector, false).await? {
            info!(bot_id, chunk_id, "embedding stored");
            Ok(EmbedOutcome::Created)
        } else {
            Ok(EmbedOutcome::AlreadyPresent)
        }
    }

    /// Generates a fresh embedding and swaps it in. A provider failure leaves the current one.
    pub async fn regenerate_for_chunk(
        &self,
        bot_id: &str,
        chunk_id: &str,
    ) -> Result<EmbedOutcome, KnowledgeError> {
        let chunk = self
            .store
            .get_chunk(bot_id, chunk_id)
            .await?
            .ok_or(StoreError::NotFound { entity: "content chunk" })?;
        let vector = self.embed(&chunk.raw_text).await.map_err(|err| {
            warn!(bot_id, chunk_id, error = %err, "re-embedding failed, keeping the stored vector");
            err
        })?;
        self.store_vector(&chunk, vector, true).await?;
        info!(bot_id, chunk_id, "embedding regenerated");
        Ok(EmbedOutcome::Created)
    }

    /// Persists `vector` for `chunk` and completes it. Any store failure marks the chunk failed.
    async fn store_vector(
        &self,
        chunk: &ContentChunk,
        vector: Vec<f32>,
        replace: bool,
    ) -> Result<bool, KnowledgeError> {
        let embedding = Embedding {
            id: Uuid::new_v4().to_string(),
            bot_id: chunk.bot_id.clone(),
            chunk_id: chunk.id.clone(),
            vector,
            content: chunk.raw_text.clone(),
            created_at: now_iso(),
        };
        let stored = async {
            let inserted = if replace {
                self.store.replace_embedding(&embedding).await?;
                true
            } else {
                self.store.insert_embedding(&embedding).await?
            };
            self.store.mark_bot_trained(&chunk.bot_id).await?;
            self.store
                .set_chunk_status(&chunk.bot_id, &chunk.id, ChunkStatus::Completed)
                .await?;
            Ok::<_, StoreError>(inserted)
        }
        .await;

        match stored {
            Ok(inserted) => Ok(inserted),
            Err(err) => {
                warn!(bot_id = %chunk.bot_id, chunk_id = %chunk.id, error = %err, "embedding could not be stored");
                if let Err(status_err) = self
                    .store
                    .set_chunk_status(&chunk.bot_id, &chunk.id, ChunkStatus::Failed)
                    .await
                {
                    warn!(chunk_id = %chunk.id, error = %status_err, "could not mark chunk failed");
                }
                Err(err.into())
            }
        }
    }

    /// Splits `text` into word windows and stores each as a pending chunk.
    pub async fn create_chunks(
        &self,
        bot_id: &str,
        source: ChunkSource,
        source_ref: &str,
        text: &str,
    ) -> Result<Vec<ContentChunk>, StoreError> {
        let mut created = Vec::new();
        for window in chunk_text(text, CHUNK_WORDS, CHUNK_OVERLAP_WORDS) {
            let now = now_iso();
            let chunk = ContentChunk {
                id: Uuid::new_v4().to_string(),
                bot_id: bot_id.to_string(),
                source,
                source_ref: source_ref.to_string(),
                word_count: word_count(&window) as i32,
                raw_text: window,
                status: ChunkStatus::Pending,
                created_at: now.clone(),
                updated_at: now,
            };
            self.store.insert_chunk(&chunk).await?;
            created.push(chunk);
        }
        Ok(created)
    }

    pub async fn delete_chunk(&self, bot_id: &str, chunk_id: &str) -> Result<bool, StoreError> {
        self.store.delete_chunk(bot_id, chunk_id).await
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn chunk_text(text: &str, target_words: usize, overlap_words: usize) -> Vec<String> {
    let words = text.split_whitespace().collect::<Vec<_>>();
    if words.is_empty() {
        return vec![];
    }
    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < words.len() {
        let end = (start + target_words).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        let step = target_words.saturating_sub(overlap_words).max(1);
        start = start.saturating_add(step);
    }
    chunks
}
