use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::OpenAiSettings;
use crate::error::{EmbeddingProviderError, LlmError};

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string as produced by the model.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PromptMessage {
    System(String),
    User(String),
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl PromptMessage {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    fn to_wire(&self) -> Value {
        match self {
            Self::System(content) => json!({ "role": "system", "content": content }),
            Self::User(content) => json!({ "role": "user", "content": content }),
            Self::Assistant {
                content,
                tool_calls,
            } => {
                let mut message = json!({ "role": "assistant", "content": content });
                if !tool_calls.is_empty() {
                    message["tool_calls"] = tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": { "name": call.name, "arguments": call.arguments }
                            })
                        })
                        .collect();
                }
                message
            }
            Self::Tool {
                tool_call_id,
                content,
            } => json!({ "role": "tool", "tool_call_id": tool_call_id, "content": content }),
        }
    }
}

/// A function the model may call, described by a JSON schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

impl TokenUsage {
    pub fn total(&self) -> i64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl std::ops::Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub temperature: f32,
    pub max_tokens: u32,
    pub messages: &'a [PromptMessage],
    /// Empty means the model answers in plain text.
    pub tools: &'a [ToolSpec],
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, LlmError>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingProviderError>;
}

/// OpenAI-compatible client for chat completions and embeddings.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    settings: OpenAiSettings,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, settings: OpenAiSettings) -> Self {
        Self { http, settings }
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, LlmError> {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages.iter().map(PromptMessage::to_wire).collect::<Vec<_>>(),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body["tool_choice"] = json!("auto");
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.settings.base_url))
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Request(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }
        let payload = response
            .json::<Value>()
            .await
            .map_err(|err| LlmError::Malformed(err.to_string()))?;
        parse_completion(&payload)
    }
}

fn parse_completion(payload: &Value) -> Result<Completion, LlmError> {
    let message = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| LlmError::Malformed("response missing choices[0].message".to_string()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string);

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let function = call.get("function")?;
                    Some(ToolCall {
                        id: call.get("id")?.as_str()?.to_string(),
                        name: function.get("name")?.as_str()?.to_string(),
                        arguments: function
                            .get("arguments")
                            .and_then(Value::as_str)
                            .unwrap_or("{}")
                            .to_string(),
                    })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let usage = payload
        .get("usage")
        .map(|usage| TokenUsage {
            prompt_tokens: usage.get("prompt_tokens").and_then(Value::as_i64).unwrap_or(0),
            completion_tokens: usage
                .get("completion_tokens")
                .and_then(Value::as_i64)
                .unwrap_or(0),
        })
        .unwrap_or_default();

    Ok(Completion {
        content,
        tool_calls,
        usage,
    })
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingProviderError> {
        if text.trim().is_empty() {
            return Err(EmbeddingProviderError::EmptyInput);
        }
        let response = self
            .http
            .post(format!("{}/embeddings", self.settings.base_url))
            .bearer_auth(&self.settings.api_key)
            .json(&json!({
                "model": self.settings.embedding_model,
                "input": text,
                "dimensions": self.settings.embedding_dimensions,
            }))
            .send()
            .await
            .map_err(|err| EmbeddingProviderError::Request(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingProviderError::Status { status, body });
        }
        let payload = response
            .json::<Value>()
            .await
            .map_err(|err| EmbeddingProviderError::Malformed(err.to_string()))?;
        let embedding = payload
            .get("data")
            .and_then(Value::as_array)
            .and_then(|data| data.first())
            .and_then(|item| item.get("embedding"))
            .and_then(Value::as_array)
            .ok_or_else(|| {
                EmbeddingProviderError::Malformed("response missing data[0].embedding".to_string())
            })?
            .iter()
            .filter_map(Value::as_f64)
            .map(|v| v as f32)
            .collect::<Vec<_>>();
        if embedding.len() != self.settings.embedding_dimensions {
            return Err(EmbeddingProviderError::Dimension {
                expected: self.settings.embedding_dimensions,
                actual: embedding.len(),
            });
        }
        Ok(embedding)
    }
}
