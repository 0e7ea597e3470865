//! Text-generation client surface for the relay orchestrator.
mod openai;
mod retry;
mod types;

pub use openai::{OpenAiClient, OpenAiConfig};
pub use types::{
    ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, MessageRole, RelayAiError,
};
