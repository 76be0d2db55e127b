//! Conversation turns driven end to end over the in-memory store.

mod common;

use std::sync::Arc;

use agentdesk_server::{
    actions::config::{ActionFeatures, BotActionsConfig},
    chat::{ChatError, IncomingMessage},
    error::{LlmError, StoreError},
    llm::{Completion, PromptMessage, TokenUsage, ToolCall},
    prompting::{apology_sentence, fallback_sentence},
    store::{ActionStore, ConversationStore, KnowledgeStore, MemoryStore},
    types::{
        BotLanguage, ChunkSource, ChunkStatus, ContentChunk, Embedding, ExecutionStatus,
        ScoredChunk, UsageKind,
    },
};
use async_trait::async_trait;
use common::Harness;
use serde_json::{json, Value};

fn visitor(text: &str) -> (String, Value) {
    (text.to_string(), json!({}))
}

#[tokio::test]
async fn grounded_answers_carry_retrieved_knowledge_into_the_prompt() {
    let harness = Harness::new();
    let bot = harness.seed_bot("owner-1", BotLanguage::En).await;
    let chunk_ids = harness
        .seed_knowledge(&bot.id, "Refunds are accepted within 30 days of purchase.")
        .await;
    harness.model.push(Ok(Completion {
        content: Some("You can request a refund within 30 days.".to_string()),
        tool_calls: Vec::new(),
        usage: TokenUsage {
            prompt_tokens: 210,
            completion_tokens: 12,
        },
    }));

    let (text, metadata) = visitor("What is your refund policy?");
    let reply = harness
        .state
        .orchestrator
        .handle_message(
            &bot,
            IncomingMessage {
                session_id: "session-1",
                text: &text,
                visitor_metadata: &metadata,
            },
        )
        .await
        .unwrap();

    assert_eq!(reply.message, "You can request a refund within 30 days.");
    assert_eq!(reply.tokens_used, 222);
    assert_eq!(reply.context_chunk_ids, chunk_ids);

    let requests = harness.model.requests();
    assert_eq!(requests.len(), 1);
    let prompt = requests[0].system_prompt();
    assert!(prompt.contains("Refunds are accepted within 30 days of purchase."));
    assert!(prompt.contains("EXCLUSIVELY"));
    assert!(requests[0].tool_names.is_empty());

    let stored = harness
        .store
        .recent_messages(&reply.chat_id, 10)
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].context_chunk_ids, chunk_ids);
    assert_eq!(stored[1].tokens_used, Some(222));
}

#[tokio::test]
async fn empty_context_instructs_the_fallback_sentence_in_english() {
    let harness = Harness::new();
    let bot = harness.seed_bot("owner-1", BotLanguage::En).await;
    harness
        .model
        .push_text(fallback_sentence(BotLanguage::En));

    let (text, metadata) = visitor("Do you sell garden furniture?");
    let reply = harness
        .state
        .orchestrator
        .handle_message(
            &bot,
            IncomingMessage {
                session_id: "session-en",
                text: &text,
                visitor_metadata: &metadata,
            },
        )
        .await
        .unwrap();

    assert!(reply.context_chunk_ids.is_empty());
    let prompt = harness.model.requests()[0].system_prompt().to_string();
    assert!(prompt.contains(fallback_sentence(BotLanguage::En)));
    assert!(prompt.contains("No knowledge is available"));
    assert!(prompt.contains("English"));
}

#[tokio::test]
async fn empty_context_instructs_the_fallback_sentence_in_hebrew() {
    let harness = Harness::new();
    let bot = harness.seed_bot("owner-1", BotLanguage::He).await;

    let (text, metadata) = visitor("מה שעות הפתיחה?");
    harness
        .state
        .orchestrator
        .handle_message(
            &bot,
            IncomingMessage {
                session_id: "session-he",
                text: &text,
                visitor_metadata: &metadata,
            },
        )
        .await
        .unwrap();

    let prompt = harness.model.requests()[0].system_prompt().to_string();
    assert!(prompt.contains(fallback_sentence(BotLanguage::He)));
    assert!(prompt.contains("Hebrew"));
}

#[tokio::test]
async fn retrieval_failure_degrades_to_an_ungrounded_turn() {
    let harness = Harness::new();
    let bot = harness.seed_bot("owner-1", BotLanguage::En).await;
    harness
        .seed_knowledge(&bot.id, "Shipping takes three business days.")
        .await;
    harness.embedder.fail(true);
    harness.model.push_text("Let me check that for you.");

    let (text, metadata) = visitor("How long does shipping take?");
    let reply = harness
        .state
        .orchestrator
        .handle_message(
            &bot,
            IncomingMessage {
                session_id: "session-1",
                text: &text,
                visitor_metadata: &metadata,
            },
        )
        .await
        .unwrap();

    assert_eq!(reply.message, "Let me check that for you.");
    assert!(reply.context_chunk_ids.is_empty());
    let prompt = harness.model.requests()[0].system_prompt().to_string();
    assert!(!prompt.contains("three business days"));
    assert!(prompt.contains(fallback_sentence(BotLanguage::En)));
}

#[tokio::test]
async fn model_outage_yields_the_apology_and_still_counts_the_turn() {
    let harness = Harness::new();
    let bot = harness.seed_bot("owner-1", BotLanguage::He).await;
    harness
        .model
        .push(Err(LlmError::Status {
            status: 503,
            body: "overloaded".to_string(),
        }));

    let (text, metadata) = visitor("שלום");
    let reply = harness
        .state
        .orchestrator
        .handle_message(
            &bot,
            IncomingMessage {
                session_id: "session-1",
                text: &text,
                visitor_metadata: &metadata,
            },
        )
        .await
        .unwrap();

    assert_eq!(reply.message, apology_sentence(BotLanguage::He));
    assert_eq!(
        harness
            .store
            .usage_count(&bot.id, UsageKind::Conversation)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn failing_tools_still_produce_a_reply() {
    let harness = Harness::new();
    let bot = harness.seed_bot("owner-1", BotLanguage::En).await;
    harness
        .store
        .save_actions_config(
            &bot.id,
            &BotActionsConfig {
                features: ActionFeatures {
                    lead_collection: true,
                    email: true,
                    ..ActionFeatures::default()
                },
                ..BotActionsConfig::default()
            },
        )
        .await
        .unwrap();
    harness.model.push(Ok(Completion {
        content: None,
        tool_calls: vec![
            ToolCall {
                id: "call_1".to_string(),
                name: "save_lead".to_string(),
                arguments: "{\"email\":\"dana@example.com\"}".to_string(),
            },
            ToolCall {
                id: "call_2".to_string(),
                name: "send_email".to_string(),
                arguments: "{\"to\":\"not-an-email\",\"subject\":\"Hi\",\"body\":\"Hello\"}"
                    .to_string(),
            },
            ToolCall {
                id: "call_3".to_string(),
                name: "create_pdf".to_string(),
                arguments: "{\"title\":\"Quote\",\"content\":\"...\"}".to_string(),
            },
        ],
        usage: TokenUsage::default(),
    }));
    harness.model.push(Err(LlmError::Request("timed out".to_string())));

    let (text, metadata) = visitor("Save my details and email me a quote");
    let reply = harness
        .state
        .orchestrator
        .handle_message(
            &bot,
            IncomingMessage {
                session_id: "session-1",
                text: &text,
                visitor_metadata: &metadata,
            },
        )
        .await
        .unwrap();

    assert!(!reply.message.trim().is_empty());
    assert!(reply.message.contains(apology_sentence(BotLanguage::En)));
    assert_eq!(reply.tool_outcomes.len(), 3);
    assert!(reply.tool_outcomes.iter().all(|outcome| !outcome.succeeded()));

    let requests = harness.model.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tool_names, vec!["save_lead", "send_email"]);
    assert!(requests[1].tool_names.is_empty());
    let tool_messages = requests[1]
        .messages
        .iter()
        .filter(|message| matches!(message, PromptMessage::Tool { .. }))
        .count();
    assert_eq!(tool_messages, 3);

    let logs = harness.store.list_action_logs(&bot.id, 10).await.unwrap();
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|log| log.status == ExecutionStatus::Failed));
    assert!(logs.iter().all(|log| log.chat_id.as_deref() == Some(reply.chat_id.as_str())));
    assert!(harness.store.list_leads(&bot.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn tool_results_feed_the_second_completion() {
    let harness = Harness::new();
    let bot = harness.seed_bot("owner-1", BotLanguage::En).await;
    harness
        .store
        .save_actions_config(
            &bot.id,
            &BotActionsConfig {
                features: ActionFeatures {
                    lead_collection: true,
                    ..ActionFeatures::default()
                },
                ..BotActionsConfig::default()
            },
        )
        .await
        .unwrap();
    harness.model.push(Ok(Completion {
        content: None,
        tool_calls: vec![ToolCall {
            id: "call_1".to_string(),
            name: "save_lead".to_string(),
            arguments: "{\"name\":\"Dana Levi\",\"phone\":\"+972 50-123-4567\"}".to_string(),
        }],
        usage: TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 10,
        },
    }));
    harness.model.push(Ok(Completion {
        content: Some("Thanks Dana, we saved your details.".to_string()),
        tool_calls: Vec::new(),
        usage: TokenUsage {
            prompt_tokens: 140,
            completion_tokens: 9,
        },
    }));

    let (text, metadata) = visitor("I'm Dana, call me on +972 50-123-4567");
    let reply = harness
        .state
        .orchestrator
        .handle_message(
            &bot,
            IncomingMessage {
                session_id: "session-1",
                text: &text,
                visitor_metadata: &metadata,
            },
        )
        .await
        .unwrap();

    assert_eq!(reply.message, "Thanks Dana, we saved your details.");
    assert_eq!(reply.tokens_used, 259);
    let leads = harness.store.list_leads(&bot.id).await.unwrap();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].phone.as_deref(), Some("+972501234567"));
    assert_eq!(leads[0].source, "chat");
}

#[tokio::test]
async fn usage_is_counted_once_per_turn() {
    let harness = Harness::new();
    let bot = harness.seed_bot("owner-1", BotLanguage::En).await;
    harness.model.push_text("Hello!");
    harness.model.push_text("We open at nine.");

    for text in ["Hi", "When do you open?"] {
        let metadata = json!({});
        harness
            .state
            .orchestrator
            .handle_message(
                &bot,
                IncomingMessage {
                    session_id: "session-1",
                    text,
                    visitor_metadata: &metadata,
                },
            )
            .await
            .unwrap();
    }

    assert_eq!(
        harness
            .store
            .usage_count(&bot.id, UsageKind::Conversation)
            .await
            .unwrap(),
        2
    );

    let second = &harness.model.requests()[1];
    assert_eq!(second.messages.len(), 4);
    assert_eq!(second.messages[1], PromptMessage::User("Hi".to_string()));
    assert_eq!(second.messages[2], PromptMessage::assistant("Hello!"));
    assert_eq!(
        second.messages[3],
        PromptMessage::User("When do you open?".to_string())
    );
}

#[tokio::test]
async fn knowledge_never_crosses_tenants() {
    let harness = Harness::new();
    let owner_bot = harness.seed_bot("owner-1", BotLanguage::En).await;
    let other_bot = harness.seed_bot("owner-2", BotLanguage::En).await;
    harness
        .seed_knowledge(&owner_bot.id, "Refunds are accepted within 30 days of purchase.")
        .await;

    let query = harness.state.embeddings.embed("refund policy").await.unwrap();
    let own = harness
        .state
        .embeddings
        .similarity_search(&query, &owner_bot.id, 0.1, 5)
        .await
        .unwrap();
    let foreign = harness
        .state
        .embeddings
        .similarity_search(&query, &other_bot.id, 0.0, 5)
        .await
        .unwrap();
    assert_eq!(own.len(), 1);
    assert!(foreign.is_empty());

    let metadata = json!({});
    let reply = harness
        .state
        .orchestrator
        .handle_message(
            &other_bot,
            IncomingMessage {
                session_id: "session-1",
                text: "What is your refund policy?",
                visitor_metadata: &metadata,
            },
        )
        .await
        .unwrap();
    assert!(reply.context_chunk_ids.is_empty());
    assert!(!harness.model.requests()[0]
        .system_prompt()
        .contains("30 days"));
}

#[tokio::test]
async fn unrelated_questions_fall_below_the_similarity_threshold() {
    let harness = Harness::new();
    let bot = harness.seed_bot("owner-1", BotLanguage::En).await;
    harness
        .seed_knowledge(&bot.id, "Refunds are accepted within 30 days of purchase.")
        .await;

    let query = harness.state.embeddings.embed("Is it raining?").await.unwrap();
    let hits = harness
        .state
        .embeddings
        .similarity_search(&query, &bot.id, 0.1, 5)
        .await
        .unwrap();
    assert!(hits.is_empty());
    assert!(harness
        .state
        .embeddings
        .similarity_search(&query, &bot.id, 1.5, 5)
        .await
        .is_err());
}

#[tokio::test]
async fn embedding_a_chunk_twice_is_a_no_op() {
    let harness = Harness::new();
    let bot = harness.seed_bot("owner-1", BotLanguage::En).await;
    let chunk_ids = harness
        .seed_knowledge(&bot.id, "Our hours are 9 to 5 on weekdays.")
        .await;
    let calls_after_seed = harness.embedder.calls();

    let outcome = harness
        .state
        .embeddings
        .generate_for_chunk(&bot.id, &chunk_ids[0])
        .await
        .unwrap();
    assert_eq!(outcome, agentdesk_server::knowledge::EmbedOutcome::AlreadyPresent);
    assert_eq!(harness.embedder.calls(), calls_after_seed);
    assert!(harness
        .store
        .has_embedding(&bot.id, &chunk_ids[0])
        .await
        .unwrap());

    let regenerated = harness
        .state
        .embeddings
        .regenerate_for_chunk(&bot.id, &chunk_ids[0])
        .await
        .unwrap();
    assert_eq!(regenerated, agentdesk_server::knowledge::EmbedOutcome::Created);
    assert_eq!(harness.embedder.calls(), calls_after_seed + 1);
}

#[tokio::test]
async fn chunks_whose_embedding_fails_are_marked_failed() {
    let harness = Harness::new();
    let bot = harness.seed_bot("owner-1", BotLanguage::En).await;
    let chunks = harness
        .state
        .embeddings
        .create_chunks(&bot.id, ChunkSource::Manual, "faq", "Shipping takes two business days.")
        .await
        .unwrap();
    harness.embedder.fail(true);

    let result = harness
        .state
        .embeddings
        .generate_for_chunk(&bot.id, &chunks[0].id)
        .await;
    assert!(result.is_err());

    let stored = harness
        .store
        .get_chunk(&bot.id, &chunks[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ChunkStatus::Failed);
    assert!(!harness.store.has_embedding(&bot.id, &chunks[0].id).await.unwrap());
}

/// Knowledge store whose embedding table rejects every write.
struct ReadOnlyEmbeddings(Arc<MemoryStore>);

#[async_trait]
impl KnowledgeStore for ReadOnlyEmbeddings {
    async fn insert_chunk(&self, chunk: &ContentChunk) -> Result<(), StoreError> {
        self.0.insert_chunk(chunk).await
    }
    async fn get_chunk(
        &self,
        bot_id: &str,
        chunk_id: &str,
    ) -> Result<Option<ContentChunk>, StoreError> {
        self.0.get_chunk(bot_id, chunk_id).await
    }
    async fn set_chunk_status(
        &self,
        bot_id: &str,
        chunk_id: &str,
        status: ChunkStatus,
    ) -> Result<(), StoreError> {
        self.0.set_chunk_status(bot_id, chunk_id, status).await
    }
    async fn delete_chunk(&self, bot_id: &str, chunk_id: &str) -> Result<bool, StoreError> {
        self.0.delete_chunk(bot_id, chunk_id).await
    }
    async fn has_embedding(&self, bot_id: &str, chunk_id: &str) -> Result<bool, StoreError> {
        self.0.has_embedding(bot_id, chunk_id).await
    }
    async fn insert_embedding(&self, _embedding: &Embedding) -> Result<bool, StoreError> {
        Err(StoreError::Corrupt("embeddings table is read-only".to_string()))
    }
    async fn replace_embedding(&self, _embedding: &Embedding) -> Result<(), StoreError> {
        Err(StoreError::Corrupt("embeddings table is read-only".to_string()))
    }
    async fn search_embeddings(
        &self,
        bot_id: &str,
        query: &[f32],
        threshold: f64,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        self.0.search_embeddings(bot_id, query, threshold, top_k).await
    }
    async fn mark_bot_trained(&self, bot_id: &str) -> Result<(), StoreError> {
        self.0.mark_bot_trained(bot_id).await
    }
}

#[tokio::test]
async fn chunks_are_marked_failed_when_their_embedding_cannot_be_stored() {
    let knowledge = Arc::new(MemoryStore::new());
    let harness = Harness::with_backends({
        let knowledge = knowledge.clone();
        move |mut backends| {
            backends.knowledge = Arc::new(ReadOnlyEmbeddings(knowledge));
            backends
        }
    });
    let chunks = harness
        .state
        .embeddings
        .create_chunks("bot-1", ChunkSource::Manual, "faq", "Our hours are 9 to 5.")
        .await
        .unwrap();

    assert!(harness
        .state
        .embeddings
        .generate_for_chunk("bot-1", &chunks[0].id)
        .await
        .is_err());
    let stored = knowledge.get_chunk("bot-1", &chunks[0].id).await.unwrap().unwrap();
    assert_eq!(stored.status, ChunkStatus::Failed);
}

#[tokio::test]
async fn failed_re_embedding_keeps_the_stored_vector() {
    let harness = Harness::new();
    let bot = harness.seed_bot("owner-1", BotLanguage::En).await;
    let chunk_ids = harness
        .seed_knowledge(&bot.id, "Refunds are accepted within 30 days of purchase.")
        .await;
    harness.embedder.fail(true);

    let result = harness
        .state
        .embeddings
        .regenerate_for_chunk(&bot.id, &chunk_ids[0])
        .await;
    assert!(result.is_err());
    assert!(harness.store.has_embedding(&bot.id, &chunk_ids[0]).await.unwrap());
    let stored = harness
        .store
        .get_chunk(&bot.id, &chunk_ids[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ChunkStatus::Completed);

    harness.embedder.fail(false);
    let query = harness.state.embeddings.embed("refund").await.unwrap();
    let hits = harness
        .store
        .search_embeddings(&bot.id, &query, 0.1, 5)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, chunk_ids[0]);

    harness
        .state
        .embeddings
        .regenerate_for_chunk(&bot.id, &chunk_ids[0])
        .await
        .unwrap();
    let hits = harness
        .store
        .search_embeddings(&bot.id, &query, 0.1, 5)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn inactive_bots_do_not_answer() {
    let harness = Harness::new();
    let mut bot = harness.seed_bot("owner-1", BotLanguage::En).await;
    bot.is_active = false;

    let metadata = json!({});
    let err = harness
        .state
        .orchestrator
        .handle_message(
            &bot,
            IncomingMessage {
                session_id: "session-1",
                text: "hello",
                visitor_metadata: &metadata,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::InactiveBot));
    assert!(harness.model.requests().is_empty());
}
