//! Reads a file previously written by [`crate::export`] back into
//! [`CleanedMessage`]s — used by the sampler (C5) and the generation
//! engine (C6) to re-load conversations without re-running extraction.

use std::io::{BufRead, BufReader};
use std::path::Path;

use keeper_core::types::CleanedMessage;
use keeper_core::CompanionError;

/// Dispatches on extension: `.jsonl` is one message per line, `.json` is a
/// single object with a `messages` array.
pub fn read_cleaned_messages(path: &Path) -> Result<Vec<CleanedMessage>, CompanionError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("jsonl") => read_jsonl(path),
        Some("json") => read_json(path),
        _ => Err(CompanionError::NotAFile(format!(
            "{}: expected a .jsonl or .json extension",
            path.display()
        ))),
    }
}

fn read_jsonl(path: &Path) -> Result<Vec<CleanedMessage>, CompanionError> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut messages = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        messages.push(serde_json::from_str(&line)?);
    }
    Ok(messages)
}

#[derive(serde::Deserialize)]
struct JsonExportDocument {
    messages: Vec<CleanedMessage>,
}

fn read_json(path: &Path) -> Result<Vec<CleanedMessage>, CompanionError> {
    let bytes = std::fs::read(path)?;
    let doc: JsonExportDocument = serde_json::from_slice(&bytes)?;
    Ok(doc.messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{export_conversation, ExportFormat};
    use keeper_core::types::Role;

    fn sample_messages() -> Vec<CleanedMessage> {
        vec![CleanedMessage {
            id: None,
            role: Role::Assistant,
            name: None,
            create_time: Some(1),
            content_type: "text".into(),
            parts: vec!["hi".into()],
            text: None,
            model: Some("m".into()),
        }]
    }

    #[test]
    fn round_trips_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let messages = sample_messages();
        let path = export_conversation(dir.path(), "f.jsonl", "c1", "m", &messages, ExportFormat::Jsonl).unwrap();
        let read_back = read_cleaned_messages(&path).unwrap();
        assert_eq!(read_back.len(), 1);
        assert_eq!(read_back[0].resolved_text(), "hi");
    }

    #[test]
    fn round_trips_json() {
        let dir = tempfile::tempdir().unwrap();
        let messages = sample_messages();
        let path = export_conversation(dir.path(), "f.json", "c1", "m", &messages, ExportFormat::Json).unwrap();
        let read_back = read_cleaned_messages(&path).unwrap();
        assert_eq!(read_back.len(), 1);
    }
}
