//! Resumable run checkpoint: persona observations and memory candidates
//! keyed by conversation/source-file, guarded by a signature over the
//! run-shaping parameters. Adapted from `keeper-cache`'s manifest
//! discipline (itself grounded on the teacher's tempfile-in-same-dir
//! write-then-rename pattern) — same atomic-write shape, different
//! payload.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use keeper_core::types::MemoryCandidate;
use keeper_core::CompanionError;

pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeCheckpoint {
    pub version: u32,
    pub signature: String,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
    pub persona_observations_by_conversation: HashMap<String, serde_json::Value>,
    pub memory_candidates_by_source_file: HashMap<String, Vec<MemoryCandidate>>,
    pub processed_memory_files: Vec<String>,
}

impl ResumeCheckpoint {
    pub fn empty(signature: String) -> Self {
        let now = Utc::now();
        Self {
            version: CHECKPOINT_VERSION,
            signature,
            created_at_utc: now,
            updated_at_utc: now,
            persona_observations_by_conversation: HashMap::new(),
            memory_candidates_by_source_file: HashMap::new(),
            processed_memory_files: Vec::new(),
        }
    }

    pub fn record_observation(&mut self, conversation_id: String, observation: serde_json::Value) {
        self.persona_observations_by_conversation.insert(conversation_id, observation);
        self.updated_at_utc = Utc::now();
    }

    pub fn record_memory_file(&mut self, source_file: String, candidates: Vec<MemoryCandidate>) {
        self.memory_candidates_by_source_file.insert(source_file.clone(), candidates);
        if !self.processed_memory_files.contains(&source_file) {
            self.processed_memory_files.push(source_file);
        }
        self.updated_at_utc = Utc::now();
    }

    pub fn has_observation(&self, conversation_id: &str) -> bool {
        self.persona_observations_by_conversation
            .get(conversation_id)
            .is_some_and(|v| !v.is_null())
    }

    pub fn has_memory_file(&self, source_file: &str) -> bool {
        self.processed_memory_files.iter().any(|f| f == source_file)
            && self.memory_candidates_by_source_file.contains_key(source_file)
    }
}

/// Signature over the run-shaping parameter tuple — model dir, primary
/// model, companion name, sampling mode+seed, and every budget. A mismatch
/// invalidates the entire checkpoint (spec §3, §4.6.7); there is no
/// legacy-signature-absent fallback here (an intentional simplification
/// of the teacher's migration path — see DESIGN.md).
pub fn compute_signature(
    model_dir: &str,
    primary_model: &str,
    companion_name: &str,
    sampling_policy: &str,
    seed: u64,
    context_window: u32,
    max_memories: usize,
    max_messages_per_conversation: usize,
    max_chars_per_conversation: usize,
    max_total_chars: usize,
    sample_size: usize,
) -> String {
    keeper_core::fingerprint::stable_hash_hex(&[
        model_dir,
        primary_model,
        companion_name,
        sampling_policy,
        &seed.to_string(),
        &context_window.to_string(),
        &max_memories.to_string(),
        &max_messages_per_conversation.to_string(),
        &max_chars_per_conversation.to_string(),
        &max_total_chars.to_string(),
        &sample_size.to_string(),
    ])
}

/// Loads the checkpoint at `path` iff it exists, parses, and its
/// signature matches. `force_rerun` unconditionally returns an empty
/// checkpoint. A present-but-corrupt file is treated as absent
/// (`CheckpointCorrupt`, logged, never surfaced as a failure).
pub fn load_or_init(path: &Path, signature: &str, force_rerun: bool) -> ResumeCheckpoint {
    if force_rerun {
        return ResumeCheckpoint::empty(signature.to_string());
    }

    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<ResumeCheckpoint>(&raw) {
            Ok(checkpoint) if checkpoint.signature == signature => checkpoint,
            Ok(_) => ResumeCheckpoint::empty(signature.to_string()),
            Err(e) => {
                warn!(path = %path.display(), err = %e, "{}", CompanionError::CheckpointCorrupt(e.to_string()));
                ResumeCheckpoint::empty(signature.to_string())
            }
        },
        Err(_) => ResumeCheckpoint::empty(signature.to_string()),
    }
}

pub fn save_checkpoint_atomic(path: &Path, checkpoint: &ResumeCheckpoint) -> Result<(), CompanionError> {
    let dir = path.parent().ok_or_else(|| CompanionError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        "checkpoint path has no parent directory",
    )))?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, checkpoint)?;
    use std::io::Write;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| CompanionError::Io(e.error))?;
    Ok(())
}
