use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::{
    retry::{is_transient_error, is_transient_status, request_id, retry_after_ms, RetryPolicy},
    ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, MessageRole, RelayAiError,
};

#[derive(Debug, Clone)]
/// Public struct `OpenAiConfig` used across relay components.
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    pub organization: Option<String>,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_budget_ms: u64,
    pub retry_jitter: bool,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            organization: None,
            request_timeout_ms: 60_000,
            max_retries: 2,
            retry_budget_ms: 0,
            retry_jitter: true,
        }
    }
}

#[derive(Debug, Clone)]
/// OpenAI-compatible `/chat/completions` client with bounded retries.
pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, RelayAiError> {
        if config.api_key.trim().is_empty() {
            return Err(RelayAiError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer).map_err(|e| {
                RelayAiError::InvalidResponse(format!("invalid API key header: {e}"))
            })?,
        );
        if let Some(org) = &config.organization {
            headers.insert(
                "OpenAI-Organization",
                HeaderValue::from_str(org).map_err(|e| {
                    RelayAiError::InvalidResponse(format!("invalid organization header: {e}"))
                })?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn chat_completions_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }

        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, RelayAiError> {
        let body = build_chat_request_body(&request);
        let url = self.chat_completions_url();
        let policy = RetryPolicy {
            max_retries: self.config.max_retries,
            budget_ms: self.config.retry_budget_ms,
            jitter: self.config.retry_jitter,
        };
        let started = std::time::Instant::now();
        let mut attempt = 0;

        loop {
            let request_id = request_id();
            let sent = self
                .client
                .post(&url)
                .header("x-relay-request-id", request_id.as_str())
                .header("x-relay-retry-attempt", attempt.to_string())
                .json(&body)
                .send()
                .await;

            let (retry_delay, error) = match sent {
                Ok(response) if response.status().is_success() => {
                    let raw = response.text().await?;
                    return parse_chat_response(&raw);
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retry_after = retry_after_ms(response.headers());
                    let raw = response.text().await?;
                    let delay = is_transient_status(status)
                        .then(|| policy.delay_after(attempt, started.elapsed(), retry_after))
                        .flatten();
                    (delay, RelayAiError::HttpStatus { status, body: raw })
                }
                Err(error) => {
                    let delay = is_transient_error(&error)
                        .then(|| policy.delay_after(attempt, started.elapsed(), None))
                        .flatten();
                    (delay, RelayAiError::Http(error))
                }
            };

            let Some(delay) = retry_delay else {
                return Err(error);
            };
            tracing::debug!(
                request_id = %request_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying chat completion"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

fn build_chat_request_body(request: &ChatRequest) -> Value {
    let messages = request
        .messages
        .iter()
        .map(|message| {
            json!({
                "role": message.role.as_str(),
                "content": message.content,
            })
        })
        .collect::<Vec<_>>();
    let mut body = json!({
        "model": request.model,
        "messages": messages,
    });

    if request.json_mode {
        body["response_format"] = json!({ "type": "json_object" });
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    #[serde(default)]
    content: Value,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

fn parse_openai_content_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn parse_chat_response(raw: &str) -> Result<ChatResponse, RelayAiError> {
    let parsed: OpenAiChatResponse = serde_json::from_str(raw)?;
    let choice =
        parsed.choices.into_iter().next().ok_or_else(|| {
            RelayAiError::InvalidResponse("response contained no choices".to_string())
        })?;

    let message = Message {
        role: MessageRole::Assistant,
        content: parse_openai_content_text(&choice.message.content)
            .trim()
            .to_string(),
    };

    let usage = parsed
        .usage
        .map(|usage| ChatUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        message,
        finish_reason: choice.finish_reason,
        usage,
    })
}
