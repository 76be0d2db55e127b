//! One conversation turn: persist, retrieve, complete, run tools, complete again, persist.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actions::{enabled_tools, ActionContext, ActionExecutor, ActionKind};
use crate::config::RetrievalSettings;
use crate::error::StoreError;
use crate::knowledge::EmbeddingStore;
use crate::llm::{Completion, CompletionRequest, LanguageModel, PromptMessage, TokenUsage};
use crate::now_iso;
use crate::prompting::{apology_sentence, render_system_prompt, SystemPromptContext};
use crate::retrieval::{build_context, RetrievedContext};
use crate::store::{ActionStore, ConversationStore};
use crate::types::{Bot, BotLanguage, ChatMessage, MessageRole, UsageKind};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message is required")]
    EmptyMessage,
    #[error("bot is inactive")]
    InactiveBot,
    #[error("turn cannot move from {from} to {to}")]
    Transition {
        from: &'static str,
        to: &'static str,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStage {
    AwaitingContext,
    FirstCompletion,
    ToolExecution,
    SecondCompletion,
    Done,
}

impl TurnStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingContext => "awaiting_context",
            Self::FirstCompletion => "first_completion",
            Self::ToolExecution => "tool_execution",
            Self::SecondCompletion => "second_completion",
            Self::Done => "done",
        }
    }

    pub fn can_advance_to(self, next: TurnStage) -> bool {
        matches!(
            (self, next),
            (Self::AwaitingContext, Self::FirstCompletion)
                | (Self::FirstCompletion, Self::ToolExecution)
                | (Self::FirstCompletion, Self::Done)
                | (Self::ToolExecution, Self::SecondCompletion)
                | (Self::SecondCompletion, Self::Done)
        )
    }
}

struct Turn<'a> {
    bot_id: &'a str,
    stage: TurnStage,
}

impl Turn<'_> {
    fn advance(&mut self, next: TurnStage) -> Result<(), ChatError> {
        if !self.stage.can_advance_to(next) {
            return Err(ChatError::Transition {
                from: self.stage.as_str(),
                to: next.as_str(),
            });
        }
        debug!(bot_id = self.bot_id, from = self.stage.as_str(), stage = next.as_str(), "turn advanced");
        self.stage = next;
        Ok(())
    }
}

/// The visitor's side of one turn.
pub struct IncomingMessage<'a> {
    pub session_id: &'a str,
    pub text: &'a str,
    pub visitor_metadata: &'a Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnReply {
    pub message: String,
    pub chat_id: String,
    pub session_id: String,
    pub tokens_used: i64,
    #[serde(skip)]
    pub context_chunk_ids: Vec<String>,
    #[serde(skip)]
    pub tool_outcomes: Vec<ToolOutcome>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub tool: String,
    pub result: Value,
}

impl ToolOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.get("success").and_then(Value::as_bool) == Some(true)
    }
}

#[derive(Clone)]
pub struct ChatOrchestrator {
    conversations: Arc<dyn ConversationStore>,
    action_store: Arc<dyn ActionStore>,
    model: Arc<dyn LanguageModel>,
    embeddings: EmbeddingStore,
    executor: ActionExecutor,
    retrieval: RetrievalSettings,
    history_window: usize,
    default_utc_offset_minutes: i32,
}

impl ChatOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        action_store: Arc<dyn ActionStore>,
        model: Arc<dyn LanguageModel>,
        embeddings: EmbeddingStore,
        executor: ActionExecutor,
        retrieval: RetrievalSettings,
        history_window: usize,
        default_utc_offset_minutes: i32,
    ) -> Self {
        Self {
            conversations,
            action_store,
            model,
            embeddings,
            executor,
            retrieval,
            history_window,
            default_utc_offset_minutes,
        }
    }

    pub async fn handle_message(
        &self,
        bot: &Bot,
        incoming: IncomingMessage<'_>,
    ) -> Result<TurnReply, ChatError> {
        let text = incoming.text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if !bot.is_active {
            return Err(ChatError::InactiveBot);
        }
        let mut turn = Turn {
            bot_id: &bot.id,
            stage: TurnStage::AwaitingContext,
        };

        let chat = self
            .conversations
            .ensure_chat(&bot.id, incoming.session_id, incoming.visitor_metadata)
            .await?;
        let user_message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            chat_id: chat.id.clone(),
            role: MessageRole::User,
            content: text.to_string(),
            tokens_used: None,
            context_chunk_ids: Vec::new(),
            created_at: now_iso(),
        };
        self.conversations.append_message(&user_message).await?;
        let history = self
            .conversations
            .recent_messages(&chat.id, self.history_window + 1)
            .await?
            .into_iter()
            .filter(|message| message.id != user_message.id)
            .collect::<Vec<_>>();
        let history = &history[history.len().saturating_sub(self.history_window)..];

        let context = match build_context(&self.embeddings, &self.retrieval, text, &bot.id).await {
            Ok(context) => context,
            Err(err) => {
                warn!(bot_id = %bot.id, chat_id = %chat.id, error = %err, "retrieval failed, answering without context");
                RetrievedContext::default()
            }
        };

        let config = match self.action_store.actions_config(&bot.id).await {
            Ok(config) => config.unwrap_or_default(),
            Err(err) => {
                warn!(bot_id = %bot.id, error = %err, "could not load actions config, tools disabled");
                Default::default()
            }
        };
        let tools = enabled_tools(&config.features);
        let tool_names = tools.iter().map(|tool| tool.name).collect::<Vec<_>>();
        let offset = config
            .utc_offset_minutes
            .unwrap_or(self.default_utc_offset_minutes);
        let today = (Utc::now() + Duration::minutes(i64::from(offset))).date_naive();

        let system_prompt = render_system_prompt(&SystemPromptContext {
            bot_name: &bot.name,
            business_name: config.business_name.as_deref().unwrap_or(&bot.name),
            language: bot.language,
            context: &context.text,
            today,
            appointments_enabled: config.features.appointments,
            tool_names: &tool_names,
        });

        let mut transcript = Vec::with_capacity(history.len() + 2);
        transcript.push(PromptMessage::System(system_prompt));
        for message in history {
            transcript.push(match message.role {
                MessageRole::User => PromptMessage::User(message.content.clone()),
                MessageRole::Assistant => PromptMessage::assistant(message.content.clone()),
            });
        }
        transcript.push(PromptMessage::User(text.to_string()));

        turn.advance(TurnStage::FirstCompletion)?;
        let mut usage = TokenUsage::default();
        let mut tool_outcomes = Vec::new();
        let first = self
            .model
            .complete(CompletionRequest {
                model: &bot.model.model,
                temperature: bot.model.temperature,
                max_tokens: bot.model.max_tokens,
                messages: &transcript,
                tools: &tools,
            })
            .await;

        let reply = match first {
            Err(err) => {
                warn!(bot_id = %bot.id, chat_id = %chat.id, error = %err, "first completion failed");
                turn.advance(TurnStage::Done)?;
                apology_sentence(bot.language).to_string()
            }
            Ok(completion) if completion.tool_calls.is_empty() => {
                usage = usage + completion.usage;
                turn.advance(TurnStage::Done)?;
                non_empty(completion.content)
                    .unwrap_or_else(|| apology_sentence(bot.language).to_string())
            }
            Ok(completion) => {
                usage = usage + completion.usage;
                turn.advance(TurnStage::ToolExecution)?;
                let Completion {
                    content,
                    tool_calls,
                    ..
                } = completion;
                transcript.push(PromptMessage::Assistant {
                    content,
                    tool_calls: tool_calls.clone(),
                });

                let ctx = ActionContext {
                    bot,
                    chat_id: Some(&chat.id),
                    config: &config,
                };
                for call in &tool_calls {
                    let result = self.executor.execute(&ctx, &call.name, &call.arguments).await;
                    transcript.push(PromptMessage::Tool {
                        tool_call_id: call.id.clone(),
                        content: result.to_string(),
                    });
                    tool_outcomes.push(ToolOutcome {
                        tool: call.name.clone(),
                        result,
                    });
                }

                turn.advance(TurnStage::SecondCompletion)?;
                let second = self
                    .model
                    .complete(CompletionRequest {
                        model: &bot.model.model,
                        temperature: bot.model.temperature,
                        max_tokens: bot.model.max_tokens,
                        messages: &transcript,
                        tools: &[],
                    })
                    .await;
                turn.advance(TurnStage::Done)?;
                match second {
                    Ok(completion) => {
                        usage = usage + completion.usage;
                        non_empty(completion.content).unwrap_or_else(|| {
                            summarize_tool_outcomes(bot.language, &tool_outcomes)
                        })
                    }
                    Err(err) => {
                        warn!(bot_id = %bot.id, chat_id = %chat.id, error = %err, "second completion failed");
                        summarize_tool_outcomes(bot.language, &tool_outcomes)
                    }
                }
            }
        };

        let assistant_message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            chat_id: chat.id.clone(),
            role: MessageRole::Assistant,
            content: reply.clone(),
            tokens_used: Some(usage.total()),
            context_chunk_ids: context.chunk_ids.clone(),
            created_at: now_iso(),
        };
        self.conversations.append_message(&assistant_message).await?;
        if let Err(err) = self
            .conversations
            .increment_usage(&bot.id, UsageKind::Conversation)
            .await
        {
            warn!(bot_id = %bot.id, error = %err, "conversation usage update failed");
        }

        info!(
            bot_id = %bot.id,
            chat_id = %chat.id,
            tools = tool_outcomes.len(),
            context_chunks = context.chunk_ids.len(),
            tokens = usage.total(),
            "chat turn completed"
        );
        Ok(TurnReply {
            message: reply,
            chat_id: chat.id,
            session_id: chat.session_id,
            tokens_used: usage.total(),
            context_chunk_ids: context.chunk_ids,
            tool_outcomes,
        })
    }
}

fn non_empty(content: Option<String>) -> Option<String> {
    content
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
}

fn action_label(language: BotLanguage, tool: &str) -> &'static str {
    let kind = ActionKind::from_tool_name(tool);
    match (language, kind) {
        (BotLanguage::En, Some(ActionKind::SaveLead)) => "Saving your contact details",
        (BotLanguage::En, Some(ActionKind::ScheduleAppointment)) => "Booking your appointment",
        (BotLanguage::En, Some(ActionKind::SendEmail)) => "Sending the email",
        (BotLanguage::En, Some(ActionKind::CreatePdf)) => "Creating the document",
        (BotLanguage::En, Some(ActionKind::SendWhatsapp)) => "Sending the message",
        (BotLanguage::En, Some(ActionKind::TriggerWebhook)) => "Notifying our team",
        (BotLanguage::En, None) => "Your request",
        (BotLanguage::He, Some(ActionKind::SaveLead)) => "שמירת פרטי הקשר שלך",
        (BotLanguage::He, Some(ActionKind::ScheduleAppointment)) => "קביעת הפגישה",
        (BotLanguage::He, Some(ActionKind::SendEmail)) => "שליחת האימייל",
        (BotLanguage::He, Some(ActionKind::CreatePdf)) => "יצירת המסמך",
        (BotLanguage::He, Some(ActionKind::SendWhatsapp)) => "שליחת ההודעה",
        (BotLanguage::He, Some(ActionKind::TriggerWebhook)) => "עדכון הצוות שלנו",
        (BotLanguage::He, None) => "הבקשה שלך",
    }
}

/// Deterministic reply used when the model could not summarize the tool results itself.
pub fn summarize_tool_outcomes(language: BotLanguage, outcomes: &[ToolOutcome]) -> String {
    let (done, failed, header) = match language {
        BotLanguage::En => ("done", "could not be completed", "Here is what happened:"),
        BotLanguage::He => ("בוצע", "לא הושלם", "זה מה שקרה:"),
    };
    let mut lines = vec![header.to_string()];
    for outcome in outcomes {
        let status = if outcome.succeeded() { done } else { failed };
        lines.push(format!("- {}: {}", action_label(language, &outcome.tool), status));
    }
    if outcomes.iter().any(|outcome| !outcome.succeeded()) {
        lines.push(apology_sentence(language).to_string());
    }
    lines.join("\n")
}
