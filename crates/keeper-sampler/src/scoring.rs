//! Per-candidate-file scoring inputs (spec §4.5).

use std::path::Path;

use keeper_core::types::{ConversationScore, Role};
use keeper_core::CompanionError;
use keeper_ingest::read_cleaned_messages;

pub fn score_file(path: &Path) -> Result<ConversationScore, CompanionError> {
    let messages = read_cleaned_messages(path)?;
    let assistant_chars: usize = messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .map(|m| m.resolved_text().chars().count())
        .sum();
    let assistant_turns = messages.iter().filter(|m| m.role == Role::Assistant).count();
    let turns = messages.len();

    Ok(ConversationScore {
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        file_path: path.display().to_string(),
        assistant_chars,
        assistant_turns,
        turns,
    })
}

pub fn score_files(paths: &[std::path::PathBuf]) -> Result<Vec<ConversationScore>, CompanionError> {
    paths.iter().map(|p| score_file(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_core::types::CleanedMessage;
    use keeper_ingest::export::{export_conversation, ExportFormat};

    #[test]
    fn scores_assistant_chars_turns_and_total_turns() {
        let dir = tempfile::tempdir().unwrap();
        let messages = vec![
            CleanedMessage {
                id: None,
                role: Role::User,
                name: None,
                create_time: None,
                content_type: "text".into(),
                parts: vec!["hi".into()],
                text: None,
                model: None,
            },
            CleanedMessage {
                id: None,
                role: Role::Assistant,
                name: None,
                create_time: None,
                content_type: "text".into(),
                parts: vec!["hello there".into()],
                text: None,
                model: None,
            },
        ];
        let path = export_conversation(dir.path(), "f.jsonl", "c", "m", &messages, ExportFormat::Jsonl).unwrap();
        let score = score_file(&path).unwrap();
        assert_eq!(score.assistant_chars, "hello there".len());
        assert_eq!(score.assistant_turns, 1);
        assert_eq!(score.turns, 2);
    }
}
