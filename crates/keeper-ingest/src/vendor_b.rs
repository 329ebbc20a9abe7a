//! C3 (vendor-B half) — flat message array normalization.

use chrono::DateTime;
use keeper_core::types::{CleanedMessage, Role};

fn map_sender(sender: &str) -> Option<Role> {
    match sender {
        "human" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "system" => Some(Role::System),
        _ => None,
    }
}

/// Extracts text-only content from a `chat_messages` array, dropping
/// `tool_use`/`tool_result`/`thinking`/`token_budget`/etc. blocks, and
/// attributes every message to the single implicit conversation model.
pub fn normalize_chat_messages(
    chat_messages: &[serde_json::Value],
    implicit_model: &str,
) -> Vec<CleanedMessage> {
    chat_messages
        .iter()
        .filter_map(|raw| normalize_one(raw, implicit_model))
        .collect()
}

fn normalize_one(raw: &serde_json::Value, implicit_model: &str) -> Option<CleanedMessage> {
    let sender = raw.get("sender").and_then(|s| s.as_str())?;
    let role = map_sender(sender)?;

    let parts: Vec<String> = raw
        .get("content")
        .and_then(|c| c.as_array())
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()).map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let create_time = raw
        .get("created_at")
        .and_then(|t| t.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp());

    Some(CleanedMessage {
        id: raw.get("uuid").and_then(|v| v.as_str()).map(String::from),
        role,
        name: None,
        create_time,
        content_type: "text".to_string(),
        parts,
        text: None,
        model: Some(implicit_model.to_string()),
    })
}
