//! Locally-hosted chat endpoint client (Ollama-style `/api/chat`, no auth).
//! Adapted from the teacher's `OllamaProvider`: the newline-delimited
//! streaming path and its connect-error-as-"unavailable" special case are
//! dropped — a local failure is just another retryable connection error.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use keeper_core::CompanionError;

use crate::provider::{CallOptions, ChatConfig, ChatMessage, LlmClient, Role};
use crate::router::{classify_status, execute_with_retry, AttemptError, DEFAULT_MAX_ATTEMPTS};

pub struct LocalClient {
    client: reqwest::Client,
    base_url: String,
    timeout: std::time::Duration,
}

impl LocalClient {
    pub fn new(base_url: Option<String>, timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
            timeout: std::time::Duration::from_secs(timeout_secs),
        }
    }

    fn build_body(&self, config: &ChatConfig, messages: &[ChatMessage]) -> serde_json::Value {
        let msgs: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| serde_json::json!({"role": role_str(m.role), "content": m.content}))
            .collect();

        serde_json::json!({
            "model": config.model,
            "messages": msgs,
            "stream": false,
            "options": {
                "num_predict": config.max_tokens,
                "temperature": config.temperature,
            },
        })
    }

    async fn send_once(&self, config: &ChatConfig, messages: &[ChatMessage]) -> Result<String, AttemptError> {
        let body = self.build_body(config, messages);
        let url = format!("{}/api/chat", self.base_url);

        debug!(model = %config.model, "sending chat completion request to local endpoint");

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| AttemptError::retryable(format!("local endpoint unreachable: {e}")))?;

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

        if parsed.message.content.is_empty() {
            Err(AttemptError::fatal("response had no message content".to_string()))
        } else {
            Ok(parsed.message.content)
        }
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

#[async_trait]
impl LlmClient for LocalClient {
    fn name(&self) -> &str {
        "local"
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
    message: LocalMessage,
}

#[derive(Deserialize)]
struct LocalMessage {
    content: String,
}
