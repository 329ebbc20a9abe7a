use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The detected vendor shape of a conversation export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorFormat {
    /// Tree-structured export with per-message model metadata (`mapping` + `current_node`).
    VendorA,
    /// Flat message array, single implicit model (`chat_messages`).
    VendorB,
    Unknown,
}

/// Role of a single message, normalized across both vendor shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message normalized out of either vendor's raw export shape.
///
/// `text` is left `None` by both vendor normalizers; callers read
/// `resolved_text()`, which falls back to the joined `parts`, rather than
/// eagerly materializing a duplicate field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanedMessage {
    pub id: Option<String>,
    pub role: Role,
    pub name: Option<String>,
    /// Unix seconds. `None` when the source had no timestamp for this message.
    pub create_time: Option<i64>,
    pub content_type: String,
    pub parts: Vec<String>,
    pub text: Option<String>,
    pub model: Option<String>,
}

impl CleanedMessage {
    /// Resolved text: `text` if present, else the joined parts.
    pub fn resolved_text(&self) -> String {
        match &self.text {
            Some(t) => t.clone(),
            None => self.parts.join(""),
        }
    }
}

/// Per-file scoring inputs driving sampler weight (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationScore {
    pub file_name: String,
    pub file_path: String,
    pub assistant_chars: usize,
    pub assistant_turns: usize,
    pub turns: usize,
}

impl ConversationScore {
    /// `max(1, sqrt(max(1, assistantChars)) + 0.5*assistantTurns + 0.15*turns)`.
    pub fn weight(&self) -> f64 {
        let chars = self.assistant_chars.max(1) as f64;
        let w = chars.sqrt() + 0.5 * self.assistant_turns as f64 + 0.15 * self.turns as f64;
        w.max(1.0)
    }
}

/// A token-budgeted transcript built for one conversation (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationPacket {
    pub conversation_id: String,
    pub source_file: String,
    pub transcript: String,
    pub messages_used: usize,
    pub char_count: usize,
    pub token_estimate: usize,
}

/// Sampling policy selectable for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SamplingPolicy {
    Top,
    RandomUniform,
    WeightedRandom,
}

/// Ordering policy for walking a vendor-A message tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VendorAOrdering {
    Time,
    CurrentPath,
}

/// Per-source-fingerprint extraction cache manifest entry for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelExportState {
    pub file_count: usize,
    pub reused_extraction: bool,
    pub extracted_in_last_run: bool,
    pub updated_at: DateTime<Utc>,
}

/// Per-source-fingerprint extraction cache manifest (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionCacheManifest {
    pub source_file_path: String,
    pub source_file_size_bytes: u64,
    pub source_file_mtime_ms: i64,
    pub source_fingerprint: String,
    pub cache_root: String,
    pub model_exports_dir: String,
    pub models: HashMap<String, ModelExportState>,
}

/// Records memory-stage completion per conversation file within a run (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannedFileEntry {
    pub file_size: u64,
    pub file_mtime_ms: i64,
    pub scanned_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanManifest {
    pub input_dir: String,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
    pub scanned_files: HashMap<String, ScannedFileEntry>,
}

impl ScanManifest {
    pub fn new(input_dir: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            input_dir: input_dir.into(),
            created_at_utc: now,
            updated_at_utc: now,
            scanned_files: HashMap::new(),
        }
    }
}

/// Category of an extracted or compacted memory (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    SharedMemory,
    UserContext,
    CompanionStyle,
    RelationshipDynamic,
}

/// A raw memory proposal before dedup/compaction (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCandidate {
    pub name: String,
    pub keys: Vec<String>,
    pub content: String,
    pub category: MemoryCategory,
    pub priority: i64,
    pub source_conversation: Option<String>,
    pub source_date: Option<String>,
}

/// A compacted, keyed memory ready for retrieval injection (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LorebookEntry {
    pub name: String,
    pub keys: Vec<String>,
    pub content: String,
    pub category: MemoryCategory,
    pub priority: i64,
    pub source_conversation: Option<String>,
    pub source_date: Option<String>,
}

/// Dedup signature shared by `MemoryCandidate` and `LorebookEntry`: the
/// lowercased, whitespace-normalized content joined with the lowercased,
/// sorted key set (spec §3, §4.6.9).
pub fn dedup_signature(content: &str, keys: &[String]) -> String {
    let normalized_content = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let mut lowered_keys: Vec<String> = keys.iter().map(|k| k.to_lowercase()).collect();
    lowered_keys.sort();
    lowered_keys.dedup();
    format!("{}|{}", normalized_content, lowered_keys.join(","))
}

/// Structured payload the card draft is built from (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterCardDraft {
    pub name: String,
    pub description: String,
    pub personality: String,
    pub scenario: String,
    pub first_mes: String,
    pub mes_example: String,
    pub creator_notes: String,
    pub tags: Vec<String>,
    pub system_prompt: String,
    pub post_history_instructions: String,
    pub alternate_greetings: Vec<String>,
}

impl CharacterCardDraft {
    /// Conservative defaults applied to empty/missing fields (spec §4.6.12).
    /// `personality` is intentionally left empty in favor of structured `description`.
    pub fn with_defaults(mut self) -> Self {
        if self.first_mes.trim().is_empty() {
            self.first_mes = "Hi. I'm here with you.".to_string();
        }
        self.personality = String::new();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_signature_collapses_case_and_whitespace() {
        let a = dedup_signature("Hello   World", &["Foo".to_string(), "Bar".to_string()]);
        let b = dedup_signature("hello world", &["bar".to_string(), "foo".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn weight_is_floored_at_one() {
        let s = ConversationScore {
            file_name: "f".into(),
            file_path: "f".into(),
            assistant_chars: 0,
            assistant_turns: 0,
            turns: 0,
        };
        assert_eq!(s.weight(), 1.0);
    }

    #[test]
    fn resolved_text_falls_back_to_joined_parts() {
        let m = CleanedMessage {
            id: None,
            role: Role::Assistant,
            name: None,
            create_time: None,
            content_type: "text".into(),
            parts: vec!["a".into(), "b".into()],
            text: None,
            model: None,
        };
        assert_eq!(m.resolved_text(), "ab");
    }
}
