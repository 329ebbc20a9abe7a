//! C2 — opens a vendor export path into a plain, seekable `conversations.json`
//! stream, regardless of whether it was handed a raw `.json` file or a `.zip`
//! archive containing one.

use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::Path;

use keeper_core::CompanionError;

/// A opened conversations.json stream plus the metadata C4's fingerprint
/// needs, resolved once up front so callers never re-`stat` the source.
#[derive(Debug)]
pub struct OpenedSource {
    pub reader: BufReader<File>,
    pub resolved_path: std::path::PathBuf,
    pub size_bytes: u64,
    pub mtime_ms: i64,
}

/// Opens `path`, dispatching on extension:
/// - `.json` is read directly.
/// - `.zip` is scanned case-insensitively for an entry named
///   `conversations.json` (at any depth), which is spilled to a temp file
///   so the returned reader is a plain, seekable `File` rather than a
///   borrow into a `ZipArchive`.
///
/// Any other extension, or a path that isn't a regular file, is rejected
/// with `NotAFile` before any bytes are read.
pub fn open_source(path: &Path) -> Result<OpenedSource, CompanionError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        CompanionError::NotAFile(format!("{}: {e}", path.display()))
    })?;
    if !metadata.is_file() {
        return Err(CompanionError::NotAFile(path.display().to_string()));
    }

    let ext = path
        .extension()
        .and_then(OsStr::to_str)
        .map(|s| s.to_ascii_lowercase());

    match ext.as_deref() {
        Some("json") => {
            let file = File::open(path)?;
            let mtime_ms = mtime_millis(&metadata);
            Ok(OpenedSource {
                reader: BufReader::new(file),
                resolved_path: std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()),
                size_bytes: metadata.len(),
                mtime_ms,
            })
        }
        Some("zip") => open_from_zip(path, &metadata),
        _ => Err(CompanionError::NotAFile(format!(
            "{}: expected a .json or .zip extension",
            path.display()
        ))),
    }
}

fn open_from_zip(path: &Path, metadata: &std::fs::Metadata) -> Result<OpenedSource, CompanionError> {
    let archive_file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(archive_file)
        .map_err(|e| CompanionError::ArchiveCorrupt(format!("{}: {e}", path.display())))?;

    let target_index = (0..archive.len())
        .find(|&i| {
            archive
                .by_index(i)
                .ok()
                .map(|entry| {
                    entry
                        .enclosed_name()
                        .and_then(|p| p.file_name().map(|n| n.to_os_string()))
                        .and_then(|n| n.to_str().map(|s| s.to_ascii_lowercase()))
                        .as_deref()
                        == Some("conversations.json")
                })
                .unwrap_or(false)
        })
        .ok_or_else(|| {
            CompanionError::ConversationsJsonMissing(path.display().to_string())
        })?;

    let mut entry = archive
        .by_index(target_index)
        .map_err(|e| CompanionError::ArchiveCorrupt(format!("{}: {e}", path.display())))?;

    // Unnamed temp file: the zip crate's `ZipFile<'a>` borrows from its
    // parent `ZipArchive`, so we spill the entry to disk and hand back a
    // plain `File` rather than threading that borrow through the pipeline.
    let mut file = tempfile::tempfile()?;
    std::io::copy(&mut entry, &mut file)
        .map_err(|e| CompanionError::ArchiveCorrupt(format!("{}: {e}", path.display())))?;
    file.seek(SeekFrom::Start(0))?;

    Ok(OpenedSource {
        reader: BufReader::new(file),
        resolved_path: std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()),
        size_bytes: metadata.len(),
        mtime_ms: mtime_millis(metadata),
    })
}

fn mtime_millis(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn opens_raw_json_file() {
        let mut f = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(f, "[]").unwrap();
        let opened = open_source(f.path()).unwrap();
        assert!(opened.size_bytes > 0);
    }

    #[test]
    fn rejects_missing_file() {
        let err = open_source(Path::new("/nonexistent/path.json")).unwrap_err();
        assert!(matches!(err, CompanionError::NotAFile(_)));
    }

    #[test]
    fn rejects_unsupported_extension() {
        let f = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        let err = open_source(f.path()).unwrap_err();
        assert!(matches!(err, CompanionError::NotAFile(_)));
    }

    #[test]
    fn opens_conversations_json_from_zip() {
        let zip_file = tempfile::Builder::new().suffix(".zip").tempfile().unwrap();
        {
            let file = zip_file.reopen().unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let opts: zip::write::FileOptions<()> = zip::write::FileOptions::default();
            writer.start_file("export/conversations.json", opts).unwrap();
            writer.write_all(br#"[{"a":1}]"#).unwrap();
            writer.finish().unwrap();
        }
        let opened = open_source(zip_file.path()).unwrap();
        let mut buf = Vec::new();
        let mut reader = opened.reader;
        std::io::Read::read_to_end(&mut reader, &mut buf).unwrap();
        assert_eq!(buf, br#"[{"a":1}]"#);
    }

    #[test]
    fn missing_conversations_json_in_zip_is_reported() {
        let zip_file = tempfile::Builder::new().suffix(".zip").tempfile().unwrap();
        {
            let file = zip_file.reopen().unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let opts: zip::write::FileOptions<()> = zip::write::FileOptions::default();
            writer.start_file("other.json", opts).unwrap();
            writer.write_all(b"{}").unwrap();
            writer.finish().unwrap();
        }
        let err = open_source(zip_file.path()).unwrap_err();
        assert!(matches!(err, CompanionError::ConversationsJsonMissing(_)));
    }
}
