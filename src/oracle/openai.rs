//! OpenAI-compatible chat-completions client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{CompletionRequest, Oracle};
use crate::error::OracleError;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
const API_KEY_VAR: &str = "OPENAI_API_KEY";
const BASE_URL_VAR: &str = "OPENAI_BASE_URL";
const MAX_ERROR_BODY_CHARS: usize = 320;

/// Connection settings for [`OpenAiOracle`].
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Bearer credential. `None` sends the request unauthenticated.
    pub api_key: Option<String>,
    /// Base URL or full `/chat/completions` URL.
    pub endpoint: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl OpenAiConfig {
    /// Read `OPENAI_API_KEY` and `OPENAI_BASE_URL`.
    ///
    /// A missing key is not an error here; it surfaces as an
    /// authentication failure on the first request.
    pub fn from_env() -> Self {
        let non_empty = |var: &str| std::env::var(var).ok().filter(|v| !v.trim().is_empty());
        Self {
            api_key: non_empty(API_KEY_VAR),
            endpoint: non_empty(BASE_URL_VAR).unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            ..Self::default()
        }
    }

    fn chat_url(&self) -> String {
        if self.endpoint.contains("/chat/completions") {
            self.endpoint.clone()
        } else {
            format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// An [`Oracle`] backed by an OpenAI-compatible HTTP API.
#[derive(Debug, Clone)]
pub struct OpenAiOracle {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiOracle {
    /// Create a client with the given settings.
    pub fn new(config: OpenAiConfig) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            // Blocking calls drive each request on a short-lived runtime,
            // so pooled connections would outlive the runtime that owns them.
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self { client, config })
    }

    /// Create a client configured from the environment.
    pub fn from_env() -> Result<Self, OracleError> {
        Self::new(OpenAiConfig::from_env())
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, OracleError> {
        let mut payload = json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
        });
        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }

        let mut builder = self.client.post(self.config.chat_url()).json(&payload);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        tracing::debug!(model = %request.model, "sending completion request");
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(model = %request.model, %status, "oracle rejected request");
            return Err(OracleError::Status {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY_CHARS),
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| OracleError::InvalidResponse("no choices in response".to_string()))?;

        let text = extract_text(&content);
        if text.trim().is_empty() {
            return Err(OracleError::InvalidResponse("empty completion".to_string()));
        }
        Ok(text)
    }
}

/// Content is a string, or an array of `{ "text": .. }` parts on some gateways.
fn extract_text(content: &Value) -> String {
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

fn truncate(value: &str, max_chars: usize) -> String {
    let mut chars = value.chars();
    let truncated: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{truncated}...")
    } else {
        truncated
    }
}
