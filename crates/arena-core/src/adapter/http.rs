//! OpenAI-compatible chat completions adapter.
//!
//! Sends the round payload as the user message and returns the assistant
//! message text. HTTP failures are mapped onto [`AdapterError`] so the
//! dispatcher can decide whether to retry:
//!
//! - 429 → `RateLimited` (honors `Retry-After` seconds)
//! - 401/403 → `Auth`
//! - 408, 5xx, connect/timeout errors → `Transient` / `Timeout`
//! - anything else, or an unusable body → `Malformed`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{AdapterError, AgentAdapter, AgentContext};
use crate::types::RawOutput;

const SYSTEM_PROMPT: &str = "You are a cryptocurrency trader competing in a paper-trading arena. \
Respond with ONLY a JSON object: {\"action\": \"BUY\" | \"SELL\" | \"HOLD\", \
\"confidence\": number 0.0-1.0, \"position_size\": number 0.0-1.0 (fraction of cash for BUY), \
\"stop_loss\": number or null, \"take_profit\": number or null, \"reasoning\": string}";

/// Configuration for [`HttpChatAdapter`].
#[derive(Debug, Clone)]
pub struct HttpChatConfig {
    pub name: String,
    /// Base URL; `/chat/completions` is appended.
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Transport-level timeout. The dispatcher applies its own, usually shorter, timeout.
    pub request_timeout: Duration,
}

/// Chat completions client.
pub struct HttpChatAdapter {
    config: HttpChatConfig,
    url: String,
    http_client: Client,
}

impl HttpChatAdapter {
    pub fn new(config: HttpChatConfig) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let url = format!("{}/chat/completions", config.endpoint.trim_end_matches('/'));

        Ok(Self {
            config,
            url,
            http_client,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Map a non-success status onto an adapter error.
fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> AdapterError {
    let snippet: String = body.chars().take(200).collect();
    match status {
        StatusCode::TOO_MANY_REQUESTS => AdapterError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AdapterError::Auth(format!("{}: {}", status, snippet))
        }
        StatusCode::REQUEST_TIMEOUT => AdapterError::Transient(format!("{}", status)),
        s if s.is_server_error() => AdapterError::Transient(format!("{}: {}", s, snippet)),
        s => AdapterError::Malformed(format!("unexpected status {}: {}", s, snippet)),
    }
}

fn classify_transport(err: reqwest::Error, timeout: Duration) -> AdapterError {
    if err.is_timeout() {
        AdapterError::Timeout(timeout)
    } else {
        AdapterError::Transient(err.to_string())
    }
}

/// Pull the assistant text out of a chat completions body.
fn extract_content(body: &str) -> Result<String, AdapterError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| AdapterError::Malformed(format!("JSON parse error: {}", e)))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AdapterError::Malformed("response has no message content".to_string()))
}

#[async_trait]
impl AgentAdapter for HttpChatAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn decide(&self, ctx: &AgentContext) -> Result<RawOutput, AdapterError> {
        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": ctx.payload.to_string()},
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "response_format": {"type": "json_object"},
        });

        let mut request = self.http_client.post(&self.url).json(&body);
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(e, self.config.request_timeout))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response
            .text()
            .await
            .map_err(|e| classify_transport(e, self.config.request_timeout))?;

        if !status.is_success() {
            return Err(classify_status(status, retry_after, &text));
        }

        debug!(adapter = %self.config.name, round = ctx.round, bytes = text.len(), "Chat response received");
        extract_content(&text).map(RawOutput::Text)
    }
}
