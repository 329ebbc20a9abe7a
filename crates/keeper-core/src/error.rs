use thiserror::Error;

/// Top-level error taxonomy shared by every pipeline stage (spec §7).
///
/// Each crate that needs a narrower error type wraps or converts into this
/// one at its boundary, following the teacher's single-enum-plus-`code()`
/// shape (`SkynetError`) rather than a per-module error per concern.
#[derive(Debug, Error)]
pub enum CompanionError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("not a file: {0}")]
    NotAFile(String),

    #[error("conversations.json missing from archive: {0}")]
    ConversationsJsonMissing(String),

    #[error("archive corrupt: {0}")]
    ArchiveCorrupt(String),

    #[error("no conversations matched model {model:?} in {source_path}")]
    NoMatchingConversations { source_path: String, model: String },

    #[error("provider preflight failed: {0}")]
    ProviderPreflightFailed(String),

    #[error("llm call failed after {attempts} attempt(s): {message}")]
    LlmCallFailed { attempts: u32, message: String },

    #[error("persona extraction failed: {0}")]
    PersonaExtractionFailed(String),

    #[error("memory extraction failed: {0}")]
    MemoryExtractionFailed(String),

    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Cancellation sentinel — a run stopped because its cancel signal
    /// fired, not because anything failed. Never surfaced as a failure in
    /// `generation_report.json`; callers match on this to skip the
    /// error-summary path and write a `cancelled` status instead.
    #[error("run aborted")]
    Aborted,

    /// A checkpoint file existed but failed to parse. Treated the same as
    /// "no checkpoint" by callers (a fresh run starts over), but logged
    /// distinctly so a corrupt-on-disk checkpoint isn't silently confused
    /// with a first-ever run.
    #[error("checkpoint corrupt: {0}")]
    CheckpointCorrupt(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CompanionError {
    /// Short machine-readable code, mirrored in `generation_report.json`
    /// and surfaced in CLI exit diagnostics.
    pub fn code(&self) -> &'static str {
        match self {
            CompanionError::MalformedInput(_) => "MALFORMED_INPUT",
            CompanionError::NotAFile(_) => "NOT_A_FILE",
            CompanionError::ConversationsJsonMissing(_) => "CONVERSATIONS_JSON_MISSING",
            CompanionError::ArchiveCorrupt(_) => "ARCHIVE_CORRUPT",
            CompanionError::NoMatchingConversations { .. } => "NO_MATCHING_CONVERSATIONS",
            CompanionError::ProviderPreflightFailed(_) => "PROVIDER_PREFLIGHT_FAILED",
            CompanionError::LlmCallFailed { .. } => "LLM_CALL_FAILED",
            CompanionError::PersonaExtractionFailed(_) => "PERSONA_EXTRACTION_FAILED",
            CompanionError::MemoryExtractionFailed(_) => "MEMORY_EXTRACTION_FAILED",
            CompanionError::SynthesisFailed(_) => "SYNTHESIS_FAILED",
            CompanionError::Config(_) => "CONFIG_ERROR",
            CompanionError::Aborted => "ABORTED",
            CompanionError::CheckpointCorrupt(_) => "CHECKPOINT_CORRUPT",
            CompanionError::Serialization(_) => "SERIALIZATION_ERROR",
            CompanionError::Io(_) => "IO_ERROR",
            CompanionError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CompanionError>;
