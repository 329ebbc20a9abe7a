//! Atomic read/write of the per-fingerprint extraction cache manifest.

use std::path::{Path, PathBuf};

use chrono::Utc;
use keeper_core::types::{ExtractionCacheManifest, ModelExportState};
use keeper_core::CompanionError;

pub fn manifest_path(cache_root: &Path, fingerprint: &str) -> PathBuf {
    cache_root.join(fingerprint).join("manifest.json")
}

/// Returns `None` if the manifest is missing or unreadable — a crashed
/// extraction's partial manifest is treated the same as no manifest at all.
pub fn load_manifest(path: &Path) -> Option<ExtractionCacheManifest> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Write-then-rename so a reader never observes a half-written manifest.
pub fn save_manifest_atomic(
    path: &Path,
    manifest: &ExtractionCacheManifest,
) -> Result<(), CompanionError> {
    let dir = path.parent().ok_or_else(|| {
        CompanionError::Internal("manifest path has no parent directory".to_string())
    })?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(tmp.as_file_mut(), manifest)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| CompanionError::Io(e.error))?;
    Ok(())
}

/// Updates (or inserts) the entry for `model` and writes the manifest back
/// atomically.
pub fn record_extraction(
    cache_root: &Path,
    fingerprint: &str,
    source_file_path: &str,
    source_file_size_bytes: u64,
    source_file_mtime_ms: i64,
    model: &str,
    model_exports_dir: &str,
    file_count: usize,
    reused_extraction: bool,
) -> Result<(), CompanionError> {
    let path = manifest_path(cache_root, fingerprint);
    let mut manifest = load_manifest(&path).unwrap_or_else(|| ExtractionCacheManifest {
        source_file_path: source_file_path.to_string(),
        source_file_size_bytes,
        source_file_mtime_ms,
        source_fingerprint: fingerprint.to_string(),
        cache_root: cache_root.display().to_string(),
        model_exports_dir: model_exports_dir.to_string(),
        models: Default::default(),
    });

    manifest.models.insert(
        model.to_string(),
        ModelExportState {
            file_count,
            reused_extraction,
            extracted_in_last_run: !reused_extraction,
            updated_at: Utc::now(),
        },
    );

    save_manifest_atomic(&path, &manifest)
}
