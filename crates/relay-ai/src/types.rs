use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `MessageRole` values.
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Single chat message exchanged with the provider.
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: text.into(),
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: text.into(),
        }
    }

    pub fn text_content(&self) -> &str {
        self.content.as_str()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `ChatRequest` used across relay components.
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub json_mode: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
/// Public struct `ChatUsage` used across relay components.
pub struct ChatUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `ChatResponse` used across relay components.
pub struct ChatResponse {
    pub message: Message,
    pub finish_reason: Option<String>,
    pub usage: ChatUsage,
}

#[derive(Debug, Error)]
/// Enumerates supported `RelayAiError` values.
pub enum RelayAiError {
    #[error("missing API key")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
/// Trait contract for `LlmClient` behavior.
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, RelayAiError>;
}
