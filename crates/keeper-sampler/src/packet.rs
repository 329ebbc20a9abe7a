//! Packet construction (spec §4.5) — token-budgeted transcripts built from
//! the sampler's selected files.

use keeper_core::types::{ConversationPacket, ConversationScore, Role};
use keeper_core::CompanionError;
use keeper_ingest::read_cleaned_messages;

pub struct PacketBudgets {
    pub max_messages_per_conversation: usize,
    pub max_chars_per_conversation: usize,
    pub max_total_chars: usize,
    pub model_context_window_chars: usize,
}

pub struct BuildOutcome {
    pub packets: Vec<ConversationPacket>,
    /// Set when `max_total_chars` exceeded the model's context window and
    /// was silently clamped — surfaced as a one-shot progress notice.
    pub clamped_total_chars: Option<usize>,
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

pub fn build_packets(
    selected: &[ConversationScore],
    budgets: &PacketBudgets,
) -> Result<BuildOutcome, CompanionError> {
    let (effective_total_chars, clamped_total_chars) =
        if budgets.max_total_chars > budgets.model_context_window_chars {
            (
                budgets.model_context_window_chars,
                Some(budgets.model_context_window_chars),
            )
        } else {
            (budgets.max_total_chars, None)
        };

    let n = selected.len().max(1);
    let effective_per_conversation_budget = budgets
        .max_chars_per_conversation
        .min((effective_total_chars / n).max(1));

    let mut packets = Vec::new();
    for score in selected {
        let messages = read_cleaned_messages(std::path::Path::new(&score.file_path))?;
        let mut transcript = String::new();
        let mut messages_used = 0usize;

        for message in &messages {
            if messages_used >= budgets.max_messages_per_conversation {
                break;
            }
            let line = format!("[{}] {}\n", role_label(message.role), message.resolved_text());
            if !transcript.is_empty() && transcript.len() + line.len() > effective_per_conversation_budget
            {
                break;
            }
            if transcript.is_empty() && line.len() > effective_per_conversation_budget {
                break;
            }
            transcript.push_str(&line);
            messages_used += 1;
        }

        if messages_used == 0 || transcript.trim().is_empty() {
            continue;
        }

        packets.push(ConversationPacket {
            conversation_id: score.file_name.clone(),
            source_file: score.file_path.clone(),
            char_count: transcript.chars().count(),
            messages_used,
            transcript,
            token_estimate: 0,
        });
    }

    for packet in &mut packets {
        packet.token_estimate = packet.char_count.div_ceil(4);
    }

    Ok(BuildOutcome {
        packets,
        clamped_total_chars,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_core::types::{CleanedMessage, Role};
    use keeper_ingest::export::{export_conversation, ExportFormat};

    fn write_file(dir: &std::path::Path, name: &str, texts: &[(Role, &str)]) -> ConversationScore {
        let messages: Vec<CleanedMessage> = texts
            .iter()
            .map(|(role, text)| CleanedMessage {
                id: None,
                role: *role,
                name: None,
                create_time: None,
                content_type: "text".into(),
                parts: vec![text.to_string()],
                text: None,
                model: None,
            })
            .collect();
        let path = export_conversation(dir, name, "c", "m", &messages, ExportFormat::Jsonl).unwrap();
        ConversationScore {
            file_name: name.to_string(),
            file_path: path.display().to_string(),
            assistant_chars: 0,
            assistant_turns: 0,
            turns: messages.len(),
        }
    }

    #[test]
    fn packet_respects_message_and_char_caps() {
        let dir = tempfile::tempdir().unwrap();
        let score = write_file(
            &dir.path(),
            "f.jsonl",
            &[
                (Role::User, "hello"),
                (Role::Assistant, "hi there, how are you"),
                (Role::User, "good thanks"),
            ],
        );
        let budgets = PacketBudgets {
            max_messages_per_conversation: 2,
            max_chars_per_conversation: 1000,
            max_total_chars: 1000,
            model_context_window_chars: 128_000,
        };
        let outcome = build_packets(&[score], &budgets).unwrap();
        assert_eq!(outcome.packets.len(), 1);
        assert_eq!(outcome.packets[0].messages_used, 2);
    }

    #[test]
    fn clamps_total_chars_to_context_window() {
        let dir = tempfile::tempdir().unwrap();
        let score = write_file(&dir.path(), "f.jsonl", &[(Role::User, "hi")]);
        let budgets = PacketBudgets {
            max_messages_per_conversation: 10,
            max_chars_per_conversation: 10_000,
            max_total_chars: 1_000_000,
            model_context_window_chars: 128_000,
        };
        let outcome = build_packets(&[score], &budgets).unwrap();
        assert_eq!(outcome.clamped_total_chars, Some(128_000));
    }

    #[test]
    fn empty_transcript_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let score = write_file(&dir.path(), "f.jsonl", &[]);
        let budgets = PacketBudgets {
            max_messages_per_conversation: 10,
            max_chars_per_conversation: 1000,
            max_total_chars: 1000,
            model_context_window_chars: 128_000,
        };
        let outcome = build_packets(&[score], &budgets).unwrap();
        assert!(outcome.packets.is_empty());
    }
}
