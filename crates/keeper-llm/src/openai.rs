//! OpenAI-compatible `/v1/chat/completions` client — also used for "an
//! alternative proxy endpoint" (spec §6) by pointing it at a different
//! base URL. Adapted from the teacher's `OpenAiProvider`: streaming, tool
//! calls, and the Anthropic-raw-message conversion are all dropped since
//! extraction calls are single-shot plain text/JSON requests.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use keeper_core::CompanionError;

use crate::provider::{CallOptions, ChatConfig, ChatMessage, LlmClient};
use crate::router::{classify_status, execute_with_retry, AttemptError, DEFAULT_MAX_ATTEMPTS};

pub struct OpenAiCompatClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    chat_path: String,
    name: String,
    timeout: std::time::Duration,
}

impl OpenAiCompatClient {
    pub fn new(name: impl Into<String>, base_url: String, api_key: Option<String>, timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            chat_path: "/v1/chat/completions".to_string(),
            name: name.into(),
            timeout: std::time::Duration::from_secs(timeout_secs),
        }
    }

    fn build_body(&self, config: &ChatConfig, messages: &[ChatMessage], json_mode: bool) -> serde_json::Value {
        let msgs: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| serde_json::json!({"role": role_str(m.role), "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": config.model,
            "messages": msgs,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
        });
        if json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        body
    }

    async fn send_once(
        &self,
        config: &ChatConfig,
        messages: &[ChatMessage],
        json_mode: bool,
    ) -> Result<String, AttemptError> {
        let body = self.build_body(config, messages, json_mode);
        let url = format!("{}{}", self.base_url, self.chat_path);

        debug!(model = %config.model, provider = %self.name, "sending chat completion request");

        let mut req = self.client.post(&url).timeout(self.timeout).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| {
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

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AttemptError::fatal("response had no message content".to_string()))
    }
}

fn role_str(role: crate::provider::Role) -> &'static str {
    match role {
        crate::provider::Role::System => "system",
        crate::provider::Role::User => "user",
        crate::provider::Role::Assistant => "assistant",
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat_complete(
        &self,
        config: &ChatConfig,
        messages: &[ChatMessage],
        options: &CallOptions,
    ) -> Result<String, CompanionError> {
        execute_with_retry(options, DEFAULT_MAX_ATTEMPTS, |_| {
            self.send_once(config, messages, false)
        })
        .await
    }

    async fn chat_complete_json(
        &self,
        config: &ChatConfig,
        messages: &[ChatMessage],
        options: &CallOptions,
    ) -> Result<crate::provider::JsonCompletion, CompanionError> {
        let raw = execute_with_retry(options, DEFAULT_MAX_ATTEMPTS, |_| {
            self.send_once(config, messages, true)
        })
        .await?;
        let parsed = crate::provider::extract_json_value(&raw).ok_or_else(|| {
            CompanionError::LlmCallFailed {
                attempts: 1,
                message: "response did not contain a JSON value".to_string(),
            }
        })?;
        Ok(crate::provider::JsonCompletion { parsed, raw })
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
}
