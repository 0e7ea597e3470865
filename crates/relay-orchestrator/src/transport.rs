use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::contact::ContactKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Raw inbound event as emitted by the chat transport.
pub struct InboundEvent {
    #[serde(alias = "contact_key", alias = "remote_jid", alias = "from")]
    pub contact: String,
    #[serde(default, alias = "id")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default, alias = "is_self_originated", alias = "fromMe")]
    pub from_me: bool,
}

impl InboundEvent {
    pub fn customer(contact: &str, message_id: &str, text: &str) -> Self {
        Self {
            contact: contact.to_string(),
            message_id: Some(message_id.to_string()),
            text: text.to_string(),
            from_me: false,
        }
    }

    pub fn operator(contact: &str, text: &str) -> Self {
        Self {
            contact: contact.to_string(),
            message_id: None,
            text: text.to_string(),
            from_me: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `Presence` values.
pub enum Presence {
    Composing,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Media payload handed to the transport: a remote reference or inline bytes.
pub enum MediaSource {
    Url(String),
    Inline(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One outbound unit routed through the safe sender.
pub enum OutboundContent {
    Text(String),
    Media {
        source: MediaSource,
        caption: Option<String>,
    },
}

impl OutboundContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn media_url(url: impl Into<String>, caption: Option<String>) -> Self {
        Self::Media {
            source: MediaSource::Url(url.into()),
            caption,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Media { .. } => "media",
        }
    }
}

#[derive(Debug, Error)]
/// Enumerates supported `TransportError` values.
pub enum TransportError {
    #[error("transport request failed: {0}")]
    Request(String),
    #[error("transport rejected delivery with status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("media fetch failed: {0}")]
    MediaFetch(String),
}

#[async_trait]
/// Outbound half of the chat transport.
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, contact: &ContactKey, text: &str) -> Result<(), TransportError>;

    async fn send_media(
        &self,
        contact: &ContactKey,
        source: &MediaSource,
        caption: Option<&str>,
    ) -> Result<(), TransportError>;

    async fn send_presence(
        &self,
        contact: &ContactKey,
        presence: Presence,
    ) -> Result<(), TransportError>;
}
