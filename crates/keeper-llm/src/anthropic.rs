//! Anthropic `/v1/messages` client. Adapted from the teacher's
//! `AnthropicProvider`: OAuth bearer detection, extended thinking, tool
//! definitions, and the SSE streaming path are all dropped — extraction
//! calls are single-shot, plain API-key requests.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use keeper_core::CompanionError;

use crate::provider::{CallOptions, ChatConfig, ChatMessage, LlmClient, Role};
use crate::router::{classify_status, execute_with_retry, AttemptError, DEFAULT_MAX_ATTEMPTS};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: std::time::Duration,
}

impl AnthropicClient {
    pub fn new(api_key: String, base_url: Option<String>, timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            timeout: std::time::Duration::from_secs(timeout_secs),
        }
    }

    fn build_body(&self, config: &ChatConfig, messages: &[ChatMessage]) -> serde_json::Value {
        let mut system = String::new();
        let mut turns: Vec<serde_json::Value> = Vec::new();
        for m in messages {
            match m.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(&m.content);
                }
                Role::User => turns.push(serde_json::json!({"role": "user", "content": m.content})),
                Role::Assistant => {
                    turns.push(serde_json::json!({"role": "assistant", "content": m.content}))
                }
            }
        }

        serde_json::json!({
            "model": config.model,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "system": system,
            "messages": turns,
            "stream": false,
        })
    }

    async fn send_once(&self, config: &ChatConfig, messages: &[ChatMessage]) -> Result<String, AttemptError> {
        let body = self.build_body(config, messages);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %config.model, "sending chat completion request to anthropic");

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("anthropic-version", API_VERSION)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AttemptError::retryable(format!("request timed out: {e}"))
                } else if e.is_connect() {
                    AttemptError::retryable(format!("connection error: {e}"))
                } else {
                    AttemptError::fatal(e.to_string())
                }
            })?;

        let status = resp.status().as_u16();
        if status != 200 {
            let text = resp.text().await.unwrap_or_default();
            return if classify_status(status) {
                Err(AttemptError::retryable(format!("HTTP {status}: {text}")))
            } else {
                Err(AttemptError::fatal(format!("HTTP {status}: {text}")))
            };
        }

        let parsed: ApiResponse = resp
            .json()
            .await
            .map_err(|e| AttemptError::fatal(format!("failed to parse response: {e}")))?;

        let text: String = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Unknown => None,
            })
            .collect();

        if text.is_empty() {
            Err(AttemptError::fatal("response had no text content".to_string()))
        } else {
            Ok(text)
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn chat_complete(
        &self,
        config: &ChatConfig,
        messages: &[ChatMessage],
        options: &CallOptions,
    ) -> Result<String, CompanionError> {
        execute_with_retry(options, DEFAULT_MAX_ATTEMPTS, |_| self.send_once(config, messages)).await
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Unknown,
}
