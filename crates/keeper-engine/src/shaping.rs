//! Card/lorebook shaping: string-field repairs plus the published
//! "Character Card V3" / "lorebook_v3" wire envelopes the synthesized
//! draft is serialized into.

use serde::{Deserialize, Serialize};

use keeper_core::types::{CharacterCardDraft, LorebookEntry};

/// If `text` contains no newline at all, inserts one before markdown
/// heading/list markers and HTML-ish tags so a model that flattened its
/// markdown into one line gets recovered into something renderable.
/// Text that already has a newline is left untouched (spec §4.6.12,
/// property 16).
pub fn repair_markdown_newlines(text: &str) -> String {
    if text.contains('\n') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len() + 16);
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let starts_heading = chars[i] == '#';
        let starts_list_item = chars[i] == '-' && chars.get(i + 1) == Some(&' ');
        let starts_tag = chars[i] == '<';
        if i > 0 && (starts_heading || starts_list_item || starts_tag) {
            out.push('\n');
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Normalizes whitespace before `<START>`, `{{user}}:`, `{{char}}:`
/// tokens to a single preceding newline, then trims the result (spec
/// §4.6.12, property 15).
pub fn repair_mes_example(text: &str) -> String {
    const MARKERS: [&str; 3] = ["<START>", "{{user}}:", "{{char}}:"];

    let mut out = String::with_capacity(text.len() + 16);
    let mut rest = text;
    'outer: while !rest.is_empty() {
        for marker in MARKERS {
            if let Some(pos) = rest.find(marker) {
                if pos == 0 {
                    continue;
                }
                let before = &rest[..pos];
                let trimmed = before.trim_end();
                out.push_str(trimmed);
                if !out.is_empty() {
                    out.push('\n');
                }
                rest = &rest[pos..];
                continue 'outer;
            }
        }
        break;
    }
    out.push_str(rest);
    out.trim().to_string()
}

pub fn repair_card_draft(mut draft: CharacterCardDraft) -> CharacterCardDraft {
    draft.description = repair_markdown_newlines(&draft.description);
    draft.scenario = repair_markdown_newlines(&draft.scenario);
    draft.system_prompt = repair_markdown_newlines(&draft.system_prompt);
    draft.mes_example = repair_mes_example(&draft.mes_example);
    draft.with_defaults()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterBook {
    pub name: String,
    pub description: String,
    pub entries: Vec<CharacterBookEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterBookEntry {
    pub keys: Vec<String>,
    pub content: String,
    pub enabled: bool,
    pub insertion_order: usize,
    pub name: String,
    pub priority: i64,
    pub position: String,
    pub extensions: serde_json::Value,
}

fn book_entries(entries: &[LorebookEntry]) -> Vec<CharacterBookEntry> {
    entries
        .iter()
        .enumerate()
        .map(|(index, e)| CharacterBookEntry {
            keys: e.keys.clone(),
            content: e.content.clone(),
            enabled: true,
            insertion_order: index,
            name: e.name.clone(),
            priority: e.priority,
            position: "before_char".to_string(),
            extensions: serde_json::json!({}),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterCardV3Data {
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
    pub group_only_greetings: Vec<String>,
    pub creator: String,
    pub character_version: String,
    pub creation_date: i64,
    pub modification_date: i64,
    pub extensions: serde_json::Value,
    pub character_book: CharacterBook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterCardV3 {
    pub spec: String,
    pub spec_version: String,
    pub data: CharacterCardV3Data,
}

pub fn build_character_card_v3(
    draft: &CharacterCardDraft,
    lorebook_name: &str,
    entries: &[LorebookEntry],
    created_at_unix: i64,
) -> CharacterCardV3 {
    CharacterCardV3 {
        spec: "chara_card_v3".to_string(),
        spec_version: "3.0".to_string(),
        data: CharacterCardV3Data {
            name: draft.name.clone(),
            description: draft.description.clone(),
            personality: draft.personality.clone(),
            scenario: draft.scenario.clone(),
            first_mes: draft.first_mes.clone(),
            mes_example: draft.mes_example.clone(),
            creator_notes: draft.creator_notes.clone(),
            tags: draft.tags.clone(),
            system_prompt: draft.system_prompt.clone(),
            post_history_instructions: draft.post_history_instructions.clone(),
            alternate_greetings: draft.alternate_greetings.clone(),
            group_only_greetings: Vec::new(),
            creator: String::new(),
            character_version: "1.0".to_string(),
            creation_date: created_at_unix,
            modification_date: created_at_unix,
            extensions: serde_json::json!({}),
            character_book: CharacterBook {
                name: lorebook_name.to_string(),
                description: String::new(),
                entries: book_entries(entries),
            },
        },
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LorebookV3Data {
    pub name: String,
    pub description: String,
    pub entries: Vec<CharacterBookEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LorebookV3 {
    pub spec: String,
    pub data: LorebookV3Data,
}

pub fn build_lorebook_v3(name: &str, entries: &[LorebookEntry]) -> LorebookV3 {
    LorebookV3 {
        spec: "lorebook_v3".to_string(),
        data: LorebookV3Data {
            name: name.to_string(),
            description: String::new(),
            entries: book_entries(entries),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_core::types::MemoryCategory;

    #[test]
    fn markdown_repair_only_touches_flat_input() {
        let flat = "# Overview\nalready has a newline, left alone";
        assert_eq!(repair_markdown_newlines(flat), flat);

        let flattened = "# Overview this is flat - a list item <tag>value</tag>";
        let repaired = repair_markdown_newlines(flattened);
        assert!(repaired.contains('\n'));
        assert!(repaired.starts_with("# Overview"));
    }

    #[test]
    fn mes_example_repair_splits_markers_onto_own_lines() {
        let flat = "<START> {{user}}: hi {{char}}: hello there";
        let repaired = repair_mes_example(flat);
        let lines: Vec<&str> = repaired.lines().collect();
        assert!(lines.iter().any(|l| l.starts_with("<START>")));
        assert!(lines.iter().any(|l| l.starts_with("{{user}}:")));
        assert!(lines.iter().any(|l| l.starts_with("{{char}}:")));
    }

    #[test]
    fn card_v3_envelope_has_expected_spec_fields() {
        let draft = CharacterCardDraft {
            name: "Nova".into(),
            description: "d".into(),
            personality: "ignored".into(),
            scenario: "s".into(),
            first_mes: "hi".into(),
            mes_example: "<START>".into(),
            creator_notes: String::new(),
            tags: vec![],
            system_prompt: String::new(),
            post_history_instructions: String::new(),
            alternate_greetings: vec![],
        };
        let entries = vec![LorebookEntry {
            name: "e1".into(),
            keys: vec!["k".into()],
            content: "c".into(),
            category: MemoryCategory::SharedMemory,
            priority: 5,
            source_conversation: None,
            source_date: None,
        }];
        let card = build_character_card_v3(&draft, "Nova's lorebook", &entries, 1_700_000_000);
        assert_eq!(card.spec, "chara_card_v3");
        assert_eq!(card.spec_version, "3.0");
        assert_eq!(card.data.character_book.entries.len(), 1);
        assert_eq!(card.data.character_book.entries[0].position, "before_char");
    }
}
