//! The `LlmClient` contract the generation engine drives — two methods, a
//! static config, and a cancellation-aware options bag. Adapted from the
//! teacher's `LlmProvider` trait: OAuth refresh, streaming, and tool-call
//! plumbing are dropped since nothing here needs them; retry classification
//! and provider pluggability are kept.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use keeper_core::CompanionError;

use crate::cancel::Cancel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Static per-call configuration — one provider instance is reused across
/// calls, so only the things that vary per request live here.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A parsed-and-raw pair returned by `chat_complete_json`: callers get the
/// structured value for logic and the raw text for transcripts/debugging.
#[derive(Debug, Clone)]
pub struct JsonCompletion {
    pub parsed: serde_json::Value,
    pub raw: String,
}

/// Emitted on every retry so the engine's progress channel can surface it.
#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub reason: String,
}

pub type OnRetry = Arc<dyn Fn(RetryEvent) + Send + Sync>;

#[derive(Clone)]
pub struct CallOptions {
    pub cancel: Cancel,
    pub request_tag: String,
    pub on_retry: Option<OnRetry>,
}

/// Common interface for every provider shape the engine can be pointed at
/// (OpenAI-compatible, locally-hosted, proxy, Anthropic-style).
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn name(&self) -> &str;

    async fn chat_complete(
        &self,
        config: &ChatConfig,
        messages: &[ChatMessage],
        options: &CallOptions,
    ) -> Result<String, CompanionError>;

    /// Default implementation asks for plain text and extracts the first
    /// balanced JSON value from it; concrete clients override this when
    /// their API offers a native JSON response mode.
    async fn chat_complete_json(
        &self,
        config: &ChatConfig,
        messages: &[ChatMessage],
        options: &CallOptions,
    ) -> Result<JsonCompletion, CompanionError> {
        let raw = self.chat_complete(config, messages, options).await?;
        let parsed = extract_json_value(&raw).ok_or_else(|| {
            CompanionError::LlmCallFailed {
                attempts: 1,
                message: "response did not contain a JSON value".to_string(),
            }
        })?;
        Ok(JsonCompletion { parsed, raw })
    }
}

/// Scans for the first balanced `{...}` or `[...]` span and parses it,
/// tolerating a model that wraps JSON in prose or a markdown fence.
pub fn extract_json_value(text: &str) -> Option<serde_json::Value> {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(text.trim()) {
        return Some(v);
    }
    let bytes = text.as_bytes();
    for (start, &b) in bytes.iter().enumerate() {
        if b != b'{' && b != b'[' {
            continue;
        }
        let open = b;
        let close = if open == b'{' { b'}' } else { b']' };
        let mut depth = 0i32;
        let mut in_string = false;
        let mut escaped = false;
        for (i, &c) in bytes[start..].iter().enumerate() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if c == b'\\' {
                    escaped = true;
                } else if c == b'"' {
                    in_string = false;
                }
                continue;
            }
            match c {
                b'"' => in_string = true,
                c if c == open => depth += 1,
                c if c == close => {
                    depth -= 1;
                    if depth == 0 {
                        let end = start + i + 1;
                        if let Ok(v) = serde_json::from_slice(&bytes[start..end]) {
                            return Some(v);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_json() {
        assert_eq!(extract_json_value(r#"{"a":1}"#), Some(serde_json::json!({"a":1})));
    }

    #[test]
    fn extracts_json_embedded_in_prose() {
        let text = "Sure, here you go:\n```json\n{\"a\": 1}\n```\nHope that helps.";
        assert_eq!(extract_json_value(text), Some(serde_json::json!({"a": 1})));
    }

    #[test]
    fn returns_none_when_no_json_present() {
        assert_eq!(extract_json_value("no json here"), None);
    }
}
