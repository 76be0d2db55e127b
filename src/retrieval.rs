use tracing::debug;

use crate::config::RetrievalSettings;
use crate::error::KnowledgeError;
use crate::knowledge::EmbeddingStore;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    pub text: String,
    pub chunk_ids: Vec<String>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Builds the grounding context for `query`. An empty result is a normal outcome.
pub async fn build_context(
    embeddings: &EmbeddingStore,
    settings: &RetrievalSettings,
    query: &str,
    bot_id: &str,
) -> Result<RetrievedContext, KnowledgeError> {
    let vector = embeddings.embed(query).await?;
    let chunks = embeddings
        .similarity_search(&vector, bot_id, settings.threshold, settings.top_k)
        .await?;

    Ok(join_chunks(
        chunks.into_iter().map(|chunk| (chunk.chunk_id, chunk.text)),
        settings.max_context_chars,
        bot_id,
    ))
}

/// Joins texts in order with blank lines until `max_chars` characters are used.
/// The first text is always kept, cut to fit if needed.
fn join_chunks(
    chunks: impl IntoIterator<Item = (String, String)>,
    max_chars: usize,
    bot_id: &str,
) -> RetrievedContext {
    let mut context = RetrievedContext::default();
    let mut used = 0usize;
    for (chunk_id, text) in chunks {
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let length = text.chars().count();
        if context.text.is_empty() {
            let kept = truncate_chars(text, max_chars);
            used = kept.chars().count();
            context.text.push_str(kept);
        } else {
            if used + 2 + length > max_chars {
                break;
            }
            context.text.push_str("\n\n");
            context.text.push_str(text);
            used += 2 + length;
        }
        context.chunk_ids.push(chunk_id);
    }
    debug!(
        bot_id,
        chunks = context.chunk_ids.len(),
        chars = used,
        "retrieval context built"
    );
    context
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
