use std::sync::Arc;

use crate::contact::ContactKey;
use crate::media::MediaFetcher;
use crate::pause_registry::PauseRegistry;
use crate::transport::{ChatTransport, MediaSource, OutboundContent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Path an outbound unit took through the safe sender.
pub enum DeliveryStatus {
    Sent,
    SentInline,
    SkippedPaused,
    Dropped,
}

impl DeliveryStatus {
    pub fn delivered(self) -> bool {
        matches!(self, Self::Sent | Self::SentInline)
    }
}

#[derive(Clone)]
/// Pause-gated delivery with a single inline-media fallback. Never fails.
pub struct SafeSender {
    registry: Arc<PauseRegistry>,
    transport: Arc<dyn ChatTransport>,
    fetcher: Arc<dyn MediaFetcher>,
}

impl SafeSender {
    pub fn new(
        registry: Arc<PauseRegistry>,
        transport: Arc<dyn ChatTransport>,
        fetcher: Arc<dyn MediaFetcher>,
    ) -> Self {
        Self {
            registry,
            transport,
            fetcher,
        }
    }

    pub async fn send(&self, contact: &ContactKey, content: &OutboundContent) -> DeliveryStatus {
        if self.registry.is_paused(contact) {
            tracing::debug!(contact = %contact, kind = content.kind(), "delivery skipped: contact paused");
            return DeliveryStatus::SkippedPaused;
        }

        let primary = match content {
            OutboundContent::Text(text) => self.transport.send_text(contact, text).await,
            OutboundContent::Media { source, caption } => {
                self.transport
                    .send_media(contact, source, caption.as_deref())
                    .await
            }
        };
        let error = match primary {
            Ok(()) => return DeliveryStatus::Sent,
            Err(error) => error,
        };

        let OutboundContent::Media {
            source: MediaSource::Url(url),
            caption,
        } = content
        else {
            tracing::warn!(contact = %contact, kind = content.kind(), error = %error, "delivery dropped");
            return DeliveryStatus::Dropped;
        };

        tracing::warn!(contact = %contact, url = %url, error = %error, "media delivery failed; retrying inline");
        let bytes = match self.fetcher.fetch(url).await {
            Ok(bytes) => bytes,
            Err(fetch_error) => {
                tracing::warn!(contact = %contact, url = %url, error = %fetch_error, "media download failed; delivery dropped");
                return DeliveryStatus::Dropped;
            }
        };
        if self.registry.is_paused(contact) {
            return DeliveryStatus::SkippedPaused;
        }
        match self
            .transport
            .send_media(contact, &MediaSource::Inline(bytes), caption.as_deref())
            .await
        {
            Ok(()) => DeliveryStatus::SentInline,
            Err(inline_error) => {
                tracing::warn!(contact = %contact, url = %url, error = %inline_error, "inline media delivery failed; delivery dropped");
                DeliveryStatus::Dropped
            }
        }
    }
}
