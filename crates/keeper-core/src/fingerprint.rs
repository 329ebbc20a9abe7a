use sha2::{Digest, Sha256};
use std::path::Path;

/// Source fingerprint: a stable hash of `(resolved absolute path, size,
/// floor(mtime ms))` (spec §3 `ExtractionCacheManifest`, §4.4).
pub fn source_fingerprint(resolved_path: &Path, size_bytes: u64, mtime_ms: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(resolved_path.to_string_lossy().as_bytes());
    hasher.update(b"|");
    hasher.update(size_bytes.to_le_bytes());
    hasher.update(b"|");
    hasher.update(mtime_ms.to_le_bytes());
    hex::encode(hasher.finalize())
}

/// Stable 32-bit hash over an arbitrary ordered list of run-shaping
/// parameter strings, used both for the sampler's seed derivation
/// (spec §4.5) and the checkpoint signature (spec §3, §4.6.7).
///
/// Callers pass each field pre-stringified (and in a fixed order) so the
/// hash is reproducible regardless of the caller's internal types.
pub fn stable_hash_u32(parts: &[&str]) -> u32 {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\x1f");
        }
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Full hex digest, used for the checkpoint `signature` field where
/// collision resistance matters more than compactness.
pub fn stable_hash_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\x1f");
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Sanitize a string for use as a filesystem path segment: any byte
/// outside `[A-Za-z0-9._-]` becomes `_`, then leading/trailing
/// underscores are trimmed (spec §4.3 filename schema, §4.4 model dirs).
pub fn sanitize_path_segment(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    mapped.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn fingerprint_is_deterministic() {
        let p = PathBuf::from("/tmp/conversations.json");
        let a = source_fingerprint(&p, 1024, 1_700_000_000_000);
        let b = source_fingerprint(&p, 1024, 1_700_000_000_000);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_changes_with_mtime() {
        let p = PathBuf::from("/tmp/conversations.json");
        let a = source_fingerprint(&p, 1024, 1);
        let b = source_fingerprint(&p, 1024, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn stable_hash_is_deterministic_and_order_sensitive() {
        let a = stable_hash_u32(&["x", "y"]);
        let b = stable_hash_u32(&["x", "y"]);
        let c = stable_hash_u32(&["y", "x"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn sanitize_replaces_and_trims() {
        assert_eq!(sanitize_path_segment("conv/a?1"), "conv_a_1");
        assert_eq!(sanitize_path_segment("__weird__"), "weird");
    }
}
