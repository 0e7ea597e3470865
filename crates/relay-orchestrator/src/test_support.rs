//! Scripted collaborators shared by the orchestrator unit tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::contact::ContactKey;
use crate::generator::{GenerationError, ReplyGenerator, ReplyPayload};
use crate::media::MediaFetcher;
use crate::transport::{ChatTransport, MediaSource, Presence, TransportError};

pub(crate) fn key(raw: &str) -> ContactKey {
    ContactKey::from_address(raw).expect("contact key")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SentItem {
    Text(String),
    MediaUrl(String, Option<String>),
    MediaInline(Vec<u8>, Option<String>),
    Presence(Presence),
}

#[derive(Debug, Clone)]
pub(crate) struct SentRecord {
    pub contact: ContactKey,
    pub item: SentItem,
    pub at: Instant,
}

#[derive(Default)]
pub(crate) struct RecordingTransport {
    sent: Mutex<Vec<SentRecord>>,
    fail_text: bool,
    fail_url_media: bool,
    fail_inline_media: bool,
    fail_presence: bool,
}

impl RecordingTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing_url_media() -> Arc<Self> {
        Arc::new(Self {
            fail_url_media: true,
            ..Self::default()
        })
    }

    pub(crate) fn failing_all_media() -> Arc<Self> {
        Arc::new(Self {
            fail_url_media: true,
            fail_inline_media: true,
            ..Self::default()
        })
    }

    pub(crate) fn failing_text_and_presence() -> Arc<Self> {
        Arc::new(Self {
            fail_text: true,
            fail_presence: true,
            ..Self::default()
        })
    }

    pub(crate) async fn records(&self) -> Vec<SentRecord> {
        self.sent.lock().await.clone()
    }

    /// Delivered messages only; presence hints are filtered out.
    pub(crate) async fn messages(&self) -> Vec<SentItem> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|record| !matches!(record.item, SentItem::Presence(_)))
            .map(|record| record.item.clone())
            .collect()
    }

    pub(crate) async fn texts(&self) -> Vec<String> {
        self.messages()
            .await
            .into_iter()
            .filter_map(|item| match item {
                SentItem::Text(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    async fn push(&self, contact: &ContactKey, item: SentItem) {
        self.sent.lock().await.push(SentRecord {
            contact: contact.clone(),
            item,
            at: Instant::now(),
        });
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(&self, contact: &ContactKey, text: &str) -> Result<(), TransportError> {
        if self.fail_text {
            return Err(TransportError::Request("text rejected".to_string()));
        }
        self.push(contact, SentItem::Text(text.to_string())).await;
        Ok(())
    }

    async fn send_media(
        &self,
        contact: &ContactKey,
        source: &MediaSource,
        caption: Option<&str>,
    ) -> Result<(), TransportError> {
        let caption = caption.map(str::to_string);
        match source {
            MediaSource::Url(_) if self.fail_url_media => Err(TransportError::Status {
                status: 415,
                detail: "remote media rejected".to_string(),
            }),
            MediaSource::Inline(_) if self.fail_inline_media => {
                Err(TransportError::Request("inline media rejected".to_string()))
            }
            MediaSource::Url(url) => {
                self.push(contact, SentItem::MediaUrl(url.clone(), caption)).await;
                Ok(())
            }
            MediaSource::Inline(bytes) => {
                self.push(contact, SentItem::MediaInline(bytes.clone(), caption))
                    .await;
                Ok(())
            }
        }
    }

    async fn send_presence(
        &self,
        contact: &ContactKey,
        presence: Presence,
    ) -> Result<(), TransportError> {
        if self.fail_presence {
            return Err(TransportError::Request("presence rejected".to_string()));
        }
        self.push(contact, SentItem::Presence(presence)).await;
        Ok(())
    }
}

pub(crate) struct StaticMediaFetcher {
    body: Option<Vec<u8>>,
    calls: Mutex<Vec<String>>,
}

impl StaticMediaFetcher {
    pub(crate) fn serving(body: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            body: Some(body.to_vec()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            body: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl MediaFetcher for StaticMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        self.calls.lock().await.push(url.to_string());
        self.body
            .clone()
            .ok_or_else(|| TransportError::MediaFetch(format!("{url} unreachable")))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct GenerateCall {
    pub combined_text: String,
    pub contact: ContactKey,
    pub history_text: String,
}

/// Replays queued replies in order; an exhausted script yields an error.
pub(crate) struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<ReplyPayload, GenerationError>>>,
    calls: Mutex<Vec<GenerateCall>>,
}

impl ScriptedGenerator {
    pub(crate) fn new(replies: Vec<Result<ReplyPayload, GenerationError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn replying(texts: &[&str]) -> Arc<Self> {
        Self::new(
            texts
                .iter()
                .map(|text| Ok(ReplyPayload::text_only(*text)))
                .collect(),
        )
    }

    pub(crate) async fn calls(&self) -> Vec<GenerateCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ReplyGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        combined_text: &str,
        contact: &ContactKey,
        history_text: &str,
    ) -> Result<ReplyPayload, GenerationError> {
        self.calls.lock().await.push(GenerateCall {
            combined_text: combined_text.to_string(),
            contact: contact.clone(),
            history_text: history_text.to_string(),
        });
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::EmptyReply))
    }
}
