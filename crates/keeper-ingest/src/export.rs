//! C3 (emission half) — per-conversation file naming and JSONL/JSON writers.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use keeper_core::fingerprint::sanitize_path_segment;
use keeper_core::types::CleanedMessage;
use keeper_core::CompanionError;

/// Output shape for a single exported conversation file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Jsonl,
    Json,
}

impl ExportFormat {
    fn extension(self) -> &'static str {
        match self {
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Json => "json",
        }
    }
}

/// `earliest_create_time` is a unix-seconds timestamp of the earliest
/// message in the conversation, if any carried one.
pub fn earliest_date_component(earliest_create_time: Option<i64>) -> String {
    match earliest_create_time.and_then(|t| Utc.timestamp_opt(t, 0).single()) {
        Some(dt) => dt.format("%Y%m%d").to_string(),
        None => "unknown-date".to_string(),
    }
}

/// Builds `<modelTag>_<yyyymmdd>_<sanitizedConversationId>.<ext>`, appending
/// `_2`, `_3`, … on collision against `used_names`.
pub fn build_file_name(
    model_tag: &str,
    earliest_create_time: Option<i64>,
    conversation_id: &str,
    format: ExportFormat,
    used_names: &mut HashSet<String>,
) -> String {
    let model = sanitize_path_segment(model_tag);
    let date = earliest_date_component(earliest_create_time);
    let id = sanitize_path_segment(conversation_id);
    let base = format!("{model}_{date}_{id}");
    let ext = format.extension();

    let mut candidate = format!("{base}.{ext}");
    let mut suffix = 2;
    while used_names.contains(&candidate) {
        candidate = format!("{base}_{suffix}.{ext}");
        suffix += 1;
    }
    used_names.insert(candidate.clone());
    candidate
}

/// One cleaned message per line.
pub fn write_jsonl(path: &Path, messages: &[CleanedMessage]) -> Result<(), CompanionError> {
    let mut file = std::fs::File::create(path)?;
    for message in messages {
        serde_json::to_writer(&mut file, message)?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

#[derive(Debug, serde::Serialize)]
struct JsonExportDocument<'a> {
    conversation_id: &'a str,
    model: &'a str,
    messages: &'a [CleanedMessage],
}

/// A single object carrying conversation metadata and a `messages` array.
pub fn write_json(
    path: &Path,
    conversation_id: &str,
    model: &str,
    messages: &[CleanedMessage],
) -> Result<(), CompanionError> {
    let doc = JsonExportDocument {
        conversation_id,
        model,
        messages,
    };
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, &doc)?;
    Ok(())
}

/// Writes the chosen export format to `<dir>/<filename>` and returns the
/// full path written.
pub fn export_conversation(
    dir: &Path,
    file_name: &str,
    conversation_id: &str,
    model: &str,
    messages: &[CleanedMessage],
    format: ExportFormat,
) -> Result<PathBuf, CompanionError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    match format {
        ExportFormat::Jsonl => write_jsonl(&path, messages)?,
        ExportFormat::Json => write_json(&path, conversation_id, model, messages)?,
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_date_when_no_timestamp() {
        assert_eq!(earliest_date_component(None), "unknown-date");
    }

    #[test]
    fn collisions_append_numeric_suffix() {
        let mut used = HashSet::new();
        let a = build_file_name("gpt-4", Some(0), "abc", ExportFormat::Jsonl, &mut used);
        let b = build_file_name("gpt-4", Some(0), "abc", ExportFormat::Jsonl, &mut used);
        let c = build_file_name("gpt-4", Some(0), "abc", ExportFormat::Jsonl, &mut used);
        assert_eq!(a, "gpt-4_19700101_abc.jsonl");
        assert_eq!(b, "gpt-4_19700101_abc_2.jsonl");
        assert_eq!(c, "gpt-4_19700101_abc_3.jsonl");
    }

    #[test]
    fn writes_jsonl_one_message_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let messages = vec![CleanedMessage {
            id: None,
            role: keeper_core::types::Role::User,
            name: None,
            create_time: None,
            content_type: "text".into(),
            parts: vec!["hi".into()],
            text: None,
            model: None,
        }];
        let path = export_conversation(
            dir.path(),
            "f.jsonl",
            "conv1",
            "gpt-4",
            &messages,
            ExportFormat::Jsonl,
        )
        .unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }
}
