use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_ai::{ChatRequest, LlmClient, Message, RelayAiError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::contact::ContactKey;

pub const EMPTY_REPLY_TEXT: &str = "¿En qué puedo ayudarte?";
pub const MISSING_API_KEY_REPLY_TEXT: &str =
    "Soy tu asistente. Configurá OPENAI_API_KEY para respuestas mejoradas.";
pub const DEFAULT_SYSTEM_PROMPT: &str = "Sos un asistente de ventas amable y profesional que atiende clientes por chat. \
Respondé en español, de forma breve y cercana, sin saludar en cada mensaje. \
Devolvé SIEMPRE un objeto JSON estricto, sin texto fuera del JSON, con la forma: \
{\"text\": \"respuesta para el cliente\", \"media\": [{\"url\": \"https://...\", \"caption\": \"opcional\"}], \
\"order\": null}. Usá \"media\" solo con URLs de imágenes del catálogo que conozcas. \
Cuando el cliente confirme una compra con todos sus datos, completá \"order\" con \
{\"nombre\", \"producto\", \"cantidad\", \"total\", \"direccion\", \"cp\", \"ciudad\"}.";
const HISTORY_PREAMBLE: &str = "Historial reciente de la conversación:";

#[derive(Debug, Error)]
/// Enumerates supported `GenerationError` values.
pub enum GenerationError {
    #[error("text generation provider failed: {0}")]
    Provider(#[from] RelayAiError),
    #[error("text generation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("text generation returned no reply")]
    EmptyReply,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Media reference returned by the generator.
pub struct ReplyMedia {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
/// Structured generator output: reply text, media to send first, and an
/// optional order object that still needs validation.
pub struct ReplyPayload {
    pub text: String,
    #[serde(default)]
    pub media: Vec<ReplyMedia>,
    #[serde(default)]
    pub order: Option<Value>,
}

impl ReplyPayload {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

#[async_trait]
/// Text-generation collaborator consulted once per turn.
pub trait ReplyGenerator: Send + Sync {
    async fn generate(
        &self,
        combined_text: &str,
        contact: &ContactKey,
        history_text: &str,
    ) -> Result<ReplyPayload, GenerationError>;
}

#[derive(Debug, Clone, PartialEq)]
/// Public struct `LlmReplySettings` used across relay components.
pub struct LlmReplySettings {
    pub model: String,
    pub system_prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub request_timeout_ms: u64,
}

impl Default for LlmReplySettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            temperature: Some(0.4),
            max_tokens: None,
            request_timeout_ms: 90_000,
        }
    }
}

/// `ReplyGenerator` backed by an OpenAI-compatible `LlmClient` in JSON mode.
pub struct LlmReplyGenerator {
    client: Arc<dyn LlmClient>,
    settings: LlmReplySettings,
}

impl LlmReplyGenerator {
    pub fn new(client: Arc<dyn LlmClient>, settings: LlmReplySettings) -> Self {
        Self { client, settings }
    }

    fn build_request(&self, combined_text: &str, history_text: &str) -> ChatRequest {
        let mut messages = vec![Message::system(self.settings.system_prompt.clone())];
        if !history_text.trim().is_empty() {
            messages.push(Message::system(format!(
                "{HISTORY_PREAMBLE}\n{}",
                history_text.trim()
            )));
        }
        messages.push(Message::user(combined_text));
        ChatRequest {
            model: self.settings.model.clone(),
            messages,
            json_mode: true,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        }
    }
}

#[async_trait]
impl ReplyGenerator for LlmReplyGenerator {
    async fn generate(
        &self,
        combined_text: &str,
        contact: &ContactKey,
        history_text: &str,
    ) -> Result<ReplyPayload, GenerationError> {
        let request = self.build_request(combined_text, history_text);
        let timeout_ms = self.settings.request_timeout_ms;
        let response = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.client.complete(request),
        )
        .await
        .map_err(|_| GenerationError::Timeout { timeout_ms })??;
        tracing::debug!(
            contact = %contact,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "reply generated"
        );
        Ok(parse_reply_payload(response.message.text_content()))
    }
}

/// Answers every turn with a fixed text; used when no provider is configured.
pub struct StaticReplyGenerator {
    text: String,
}

impl StaticReplyGenerator {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn missing_api_key() -> Self {
        Self::new(MISSING_API_KEY_REPLY_TEXT)
    }
}

#[async_trait]
impl ReplyGenerator for StaticReplyGenerator {
    async fn generate(
        &self,
        _combined_text: &str,
        _contact: &ContactKey,
        _history_text: &str,
    ) -> Result<ReplyPayload, GenerationError> {
        Ok(ReplyPayload::text_only(self.text.clone()))
    }
}

/// Parses provider content into a `ReplyPayload`. JSON objects (optionally
/// inside a markdown fence) carrying `text`/`media`/`order` are structured;
/// anything else is taken as plain reply text.
pub fn parse_reply_payload(raw: &str) -> ReplyPayload {
    let trimmed = strip_code_fence(raw.trim());
    let structured = serde_json::from_str::<Value>(trimmed)
        .ok()
        .and_then(|value| match value {
            Value::Object(object) => Some(object),
            _ => None,
        });
    let Some(object) = structured else {
        return ReplyPayload::text_only(non_empty_or_default(trimmed));
    };

    let text = object
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let media = object
        .get("media")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_media_item).collect())
        .unwrap_or_default();
    let order = object
        .get("order")
        .filter(|order| order.is_object())
        .cloned();
    ReplyPayload {
        text: non_empty_or_default(text.trim()),
        media,
        order,
    }
}

fn parse_media_item(item: &Value) -> Option<ReplyMedia> {
    let url = match item {
        Value::String(url) => url.trim(),
        Value::Object(object) => object.get("url").and_then(Value::as_str)?.trim(),
        _ => return None,
    };
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return None;
    }
    let caption = item
        .get("caption")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|caption| !caption.is_empty())
        .map(str::to_string);
    Some(ReplyMedia {
        url: url.to_string(),
        caption,
    })
}

fn strip_code_fence(raw: &str) -> &str {
    let Some(body) = raw.strip_prefix("```") else {
        return raw;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn non_empty_or_default(text: &str) -> String {
    if text.is_empty() {
        EMPTY_REPLY_TEXT.to_string()
    } else {
        text.to_string()
    }
}
