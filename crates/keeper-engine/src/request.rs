//! `runGeneration`'s contract types (spec §4.6.1): the request shape, its
//! two modes, and the output bundle.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use keeper_core::types::{CharacterCardDraft, LorebookEntry, SamplingPolicy};

use crate::prompts::PromptOverrides;
use crate::shaping::{CharacterCardV3, LorebookV3};

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub companion_name: String,
    pub model: String,
    pub temperature: f32,
    pub sampling_policy: SamplingPolicy,
    pub seed: Option<u64>,
    pub sample_size: usize,
    pub max_messages_per_conversation: usize,
    pub max_chars_per_conversation: usize,
    pub max_total_chars: usize,
    pub context_window: u32,
    pub max_memories: usize,
    pub max_parallel_calls: usize,
    pub timeout_secs: u64,
    pub prompt_overrides: PromptOverrides,
    pub force_rerun: bool,
}

#[derive(Debug, Clone)]
pub enum Mode {
    Full,
    AppendMemories {
        existing_card: CharacterCardDraft,
        existing_memories: Vec<LorebookEntry>,
    },
}

impl Mode {
    pub fn is_append(&self) -> bool {
        matches!(self, Mode::AppendMemories { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Mode::Full => "full",
            Mode::AppendMemories { .. } => "append_memories",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Cancelled,
}

/// `card`/`lorebook` are `None` only for a run cancelled before synthesis
/// completed — `status` is the authoritative signal, never their presence.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub status: RunStatus,
    pub card: Option<CharacterCardV3>,
    pub lorebook: Option<LorebookV3>,
    pub processed_files: Vec<String>,
    pub persona_files: Vec<String>,
    pub memory_files: Vec<String>,
    pub checkpoint_path: PathBuf,
    pub scan_manifest_path: PathBuf,
    pub errors: Vec<String>,
}
