use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{errors::AppError, protocol::Role, usage::UsageMetrics};

/// A persisted chat message with the metadata attached after generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            usage: None,
            provider: None,
            model: None,
            cost: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_usage(mut self, usage: Option<UsageMetrics>, cost: Option<f64>) -> Self {
        self.usage = usage;
        self.cost = cost;
        self
    }

    pub fn with_model(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self
    }
}

/// Persistence collaborator for chat history.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append_message(&self, chat_id: &str, message: StoredMessage) -> Result<(), AppError>;

    /// Messages of a chat in insertion order; unknown chats are empty.
    async fn list_messages(&self, chat_id: &str) -> Result<Vec<StoredMessage>, AppError>;
}

/// Process-local store used when no external persistence is wired in.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    chats: RwLock<HashMap<String, Vec<StoredMessage>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append_message(&self, chat_id: &str, message: StoredMessage) -> Result<(), AppError> {
        if chat_id.trim().is_empty() {
            return Err(AppError::ValidationError("chat id cannot be empty".to_string()));
        }
        let mut chats = self.chats.write().await;
        chats.entry(chat_id.to_string()).or_default().push(message);
        Ok(())
    }

    async fn list_messages(&self, chat_id: &str) -> Result<Vec<StoredMessage>, AppError> {
        let chats = self.chats.read().await;
        Ok(chats.get(chat_id).cloned().unwrap_or_default())
    }
}
