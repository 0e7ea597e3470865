use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use relay_core::{current_unix_timestamp_ms, JsonlEventLog};
use relay_orchestrator::{ChatTransport, ContactKey, MediaSource, Presence, TransportError};
use serde_json::{json, Value};

/// Records every outbound unit to a JSONL audit log instead of delivering it.
pub struct DryRunTransport {
    log: JsonlEventLog,
}

impl DryRunTransport {
    pub fn open(path: PathBuf) -> Result<Self> {
        Ok(Self {
            log: JsonlEventLog::open(path)?,
        })
    }

    fn record(&self, contact: &ContactKey, payload: Value) -> Result<(), TransportError> {
        let mut event = json!({
            "timestamp_unix_ms": current_unix_timestamp_ms(),
            "contact": contact.as_str(),
        });
        if let (Some(event), Value::Object(payload)) = (event.as_object_mut(), payload) {
            event.extend(payload);
        }
        self.log
            .append(&event)
            .map_err(|error| TransportError::Request(format!("{error:#}")))
    }
}

#[async_trait]
impl ChatTransport for DryRunTransport {
    async fn send_text(&self, contact: &ContactKey, text: &str) -> Result<(), TransportError> {
        tracing::info!(contact = %contact, chars = text.chars().count(), "dry-run text");
        self.record(contact, json!({"type": "text", "text": text}))
    }

    async fn send_media(
        &self,
        contact: &ContactKey,
        source: &MediaSource,
        caption: Option<&str>,
    ) -> Result<(), TransportError> {
        let media = match source {
            MediaSource::Url(url) => json!({"url": url}),
            MediaSource::Inline(bytes) => json!({"inline_bytes": bytes.len()}),
        };
        tracing::info!(contact = %contact, "dry-run media");
        self.record(
            contact,
            json!({"type": "image", "image": media, "caption": caption}),
        )
    }

    async fn send_presence(
        &self,
        contact: &ContactKey,
        presence: Presence,
    ) -> Result<(), TransportError> {
        self.record(contact, json!({"type": "presence", "presence": presence}))
    }
}

/// POSTs `{to, type, text|image|presence}` JSON to a messaging gateway.
pub struct HttpGatewayTransport {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpGatewayTransport {
    pub fn new(endpoint: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            anyhow::bail!("gateway url must be an http(s) URL: '{endpoint}'");
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build gateway http client")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            token: token
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
        })
    }

    async fn post(&self, body: Value) -> Result<(), TransportError> {
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|error| TransportError::Request(error.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            detail: detail.chars().take(512).collect(),
        })
    }
}

#[async_trait]
impl ChatTransport for HttpGatewayTransport {
    async fn send_text(&self, contact: &ContactKey, text: &str) -> Result<(), TransportError> {
        self.post(json!({"to": contact.as_str(), "type": "text", "text": text}))
            .await
    }

    async fn send_media(
        &self,
        contact: &ContactKey,
        source: &MediaSource,
        caption: Option<&str>,
    ) -> Result<(), TransportError> {
        let image = match source {
            MediaSource::Url(url) => json!({"url": url, "caption": caption}),
            MediaSource::Inline(bytes) => json!({
                "base64": BASE64_STANDARD.encode(bytes),
                "caption": caption,
            }),
        };
        self.post(json!({"to": contact.as_str(), "type": "image", "image": image}))
            .await
    }

    async fn send_presence(
        &self,
        contact: &ContactKey,
        presence: Presence,
    ) -> Result<(), TransportError> {
        self.post(json!({"to": contact.as_str(), "type": "presence", "presence": presence}))
            .await
    }
}
