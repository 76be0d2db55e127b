use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::actions::ActionError;
use crate::chat::ChatError;

/// Failures raised by the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error("stored value is corrupt: {0}")]
    Corrupt(String),
}

/// Errors from the embedding provider (network, status, shape).
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingProviderError {
    #[error("embedding input is empty")]
    EmptyInput,
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("embedding provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("embedding response malformed: {0}")]
    Malformed(String),
    #[error("embedding dimension mismatch: expected {expected} got {actual}")]
    Dimension { expected: usize, actual: usize },
}

/// Errors from the chat-completion provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("completion request failed: {0}")]
    Request(String),
    #[error("completion provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion response malformed: {0}")]
    Malformed(String),
}

/// Failures of the knowledge pipeline (embedding + persistence).
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error(transparent)]
    Provider(#[from] EmbeddingProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid search parameter {parameter}: {reason}")]
    InvalidParameter {
        parameter: &'static str,
        reason: String,
    },
}

/// Errors surfaced by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity } => Self::NotFound(format!("{entity} not found")),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<KnowledgeError> for AppError {
    fn from(err: KnowledgeError) -> Self {
        match err {
            KnowledgeError::Provider(provider) => Self::Upstream(provider.to_string()),
            KnowledgeError::Store(store) => store.into(),
            KnowledgeError::InvalidParameter { parameter, reason } => Self::Validation {
                field: parameter,
                message: reason,
            },
        }
    }
}

impl From<ActionError> for AppError {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::NotFound(entity) => Self::NotFound(format!("{entity} not found")),
            ActionError::Store(store) => store.into(),
            ActionError::Validation(message) | ActionError::InvalidArguments(message) => {
                Self::Validation {
                    field: "body",
                    message,
                }
            }
            ActionError::Channel(channel) => Self::Upstream(channel.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::EmptyMessage => Self::validation("message", err.to_string()),
            ChatError::InactiveBot => Self::Forbidden(err.to_string()),
            ChatError::Store(store) => store.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = match &self {
            Self::Validation { field, message } => json!({ "error": message, "field": field }),
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_store_errors_map_to_404() {
        let err: AppError = StoreError::NotFound { entity: "bot" }.into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "bot not found");
    }

    #[test]
    fn provider_failures_map_to_bad_gateway() {
        let err: AppError = KnowledgeError::Provider(EmbeddingProviderError::Status {
            status: 429,
            body: "rate limited".to_string(),
        })
        .into();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}
