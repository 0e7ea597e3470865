use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};

use crate::transport::TransportError;

const MEDIA_ACCEPT_HEADER: &str = "image/*,*/*;q=0.8";
const MEDIA_USER_AGENT: &str = "relay-orchestrator/0.1";

#[async_trait]
/// Downloads a remote media reference so it can be re-sent inline.
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

#[derive(Debug, Clone)]
/// reqwest-backed `MediaFetcher`; non-2xx responses and empty bodies are errors.
pub struct HttpMediaFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpMediaFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, MEDIA_ACCEPT_HEADER)
            .header(USER_AGENT, MEDIA_USER_AGENT)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| TransportError::MediaFetch(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::MediaFetch(format!(
                "GET {url} returned {}",
                status.as_u16()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|error| TransportError::MediaFetch(error.to_string()))?;
        if bytes.is_empty() {
            return Err(TransportError::MediaFetch(format!("GET {url} returned an empty body")));
        }
        Ok(bytes.to_vec())
    }
}
