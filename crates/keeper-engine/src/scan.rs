//! Scan manifest load/save — the second single-writer resource alongside
//! the checkpoint (spec §5 "shared resources"). Append-mode skip
//! decisions are driven by this file, not the checkpoint, so a file can
//! be "already seen" across runs that don't share a checkpoint signature.

use std::path::Path;

use keeper_core::types::ScanManifest;
use keeper_core::CompanionError;

pub fn load_or_init(path: &Path, input_dir: &str, force_rerun: bool) -> ScanManifest {
    if force_rerun {
        return ScanManifest::new(input_dir);
    }
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|_| ScanManifest::new(input_dir)),
        Err(_) => ScanManifest::new(input_dir),
    }
}

pub fn save_atomic(path: &Path, manifest: &ScanManifest) -> Result<(), CompanionError> {
    crate::output::write_json_atomic(path, manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_fresh_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = load_or_init(&dir.path().join("scan_manifest.json"), "/input", false);
        assert!(manifest.scanned_files.is_empty());
    }

    #[test]
    fn force_rerun_clears_scanned_files_even_if_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan_manifest.json");
        let mut manifest = ScanManifest::new("/input");
        manifest.scanned_files.insert(
            "a.jsonl".to_string(),
            keeper_core::types::ScannedFileEntry {
                file_size: 10,
                file_mtime_ms: 0,
                scanned_at_utc: chrono::Utc::now(),
            },
        );
        save_atomic(&path, &manifest).unwrap();

        let reloaded = load_or_init(&path, "/input", true);
        assert!(reloaded.scanned_files.is_empty());
    }

    #[test]
    fn round_trips_through_atomic_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan_manifest.json");
        let mut manifest = ScanManifest::new("/input");
        manifest.scanned_files.insert(
            "a.jsonl".to_string(),
            keeper_core::types::ScannedFileEntry {
                file_size: 10,
                file_mtime_ms: 0,
                scanned_at_utc: chrono::Utc::now(),
            },
        );
        save_atomic(&path, &manifest).unwrap();
        let reloaded = load_or_init(&path, "/input", false);
        assert!(reloaded.scanned_files.contains_key("a.jsonl"));
    }
}
