//! Writes every artifact the run leaves under `runDir/` (spec §6). Atomic
//! JSON writes reuse `keeper-cache`'s tempfile-then-rename discipline;
//! append-mode's history log is a genuine append (jsonl), not a rename.

use std::io::Write as _;
use std::path::Path;

use serde::Serialize;

use keeper_core::CompanionError;

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), CompanionError> {
    let dir = path.parent().ok_or_else(|| {
        CompanionError::Internal(format!("{} has no parent directory", path.display()))
    })?;
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(tmp.as_file_mut(), value)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CompanionError::Io(e.error))?;
    Ok(())
}

pub fn write_text_atomic(path: &Path, contents: &str) -> Result<(), CompanionError> {
    let dir = path.parent().ok_or_else(|| {
        CompanionError::Internal(format!("{} has no parent directory", path.display()))
    })?;
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CompanionError::Io(e.error))?;
    Ok(())
}

pub fn append_history_line(path: &Path, line: &str) -> Result<(), CompanionError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct StageStats {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub status: String,
    pub persona: StageStats,
    pub memory: StageStats,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingManifest {
    pub source_fingerprint: String,
    pub mode: String,
    pub sampling_policy: String,
    pub seed: u64,
    pub persona_files: Vec<String>,
    pub memory_files: Vec<String>,
    pub processed_files: Vec<String>,
    pub artifacts: Vec<String>,
}

/// Caps an error list to the first 4 entries plus a "+N more" marker,
/// matching the propagation policy's aggregated-summary shape (spec §7).
pub fn summarize_errors(errors: &[String]) -> String {
    if errors.is_empty() {
        return String::new();
    }
    let shown: Vec<&str> = errors.iter().take(4).map(|s| s.as_str()).collect();
    let mut summary = shown.join("; ");
    if errors.len() > 4 {
        summary.push_str(&format!("; +{} more", errors.len() - 4));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarize_errors_caps_at_four_with_count() {
        let errors: Vec<String> = (1..=6).map(|i| format!("err{i}")).collect();
        let summary = summarize_errors(&errors);
        assert!(summary.contains("err1"));
        assert!(summary.contains("err4"));
        assert!(!summary.contains("err5"));
        assert!(summary.ends_with("+2 more"));
    }

    #[test]
    fn summarize_errors_empty_is_empty_string() {
        assert_eq!(summarize_errors(&[]), "");
    }

    #[test]
    fn json_and_text_artifacts_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let report = GenerationReport {
            status: "completed".into(),
            persona: StageStats { attempted: 3, succeeded: 3, failed: 0 },
            memory: StageStats { attempted: 3, succeeded: 2, failed: 1 },
            errors: vec!["boom".into()],
        };
        let path = dir.path().join("generation_report.json");
        write_json_atomic(&path, &report).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"completed\""));

        let text_path = dir.path().join("persona_sources.txt");
        write_text_atomic(&text_path, "a.jsonl\nb.jsonl\n").unwrap();
        assert_eq!(std::fs::read_to_string(&text_path).unwrap(), "a.jsonl\nb.jsonl\n");
    }

    #[test]
    fn append_history_line_appends_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory_append_history.jsonl");
        append_history_line(&path, r#"{"run":1}"#).unwrap();
        append_history_line(&path, r#"{"run":2}"#).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }
}
