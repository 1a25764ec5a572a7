//! Filesystem primitives: reads, atomic replace and backups
//!
//! Atomic write:
//! - write to a temp file in the destination's directory (no cross-device rename)
//! - flush + `sync_all`
//! - rename into place with replace semantics
//!
//! If any step before the rename fails the destination is untouched and the
//! temp file is removed when it drops.

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// `strftime` pattern of backup timestamps (UTC)
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";

fn parent_dir_or_dot(path: &Path) -> &Path {
    // `parent()` of a bare file name is `Some("")`
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Read a whole document
///
/// # Errors
/// [`EngineError::NotFound`] if the file does not exist, otherwise
/// [`EngineError::Io`]
pub fn read_bytes(path: &Path) -> EngineResult<Vec<u8>> {
    fs::read(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            EngineError::NotFound(path.to_path_buf())
        } else {
            EngineError::io(path, e)
        }
    })
}

/// Replace `dest` with `bytes` atomically
///
/// # Errors
/// Returns [`EngineError::Io`]; the destination is unchanged on failure
pub fn atomic_write(dest: &Path, bytes: &[u8]) -> EngineResult<()> {
    let dir = parent_dir_or_dot(dest);
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| EngineError::io(dir, e))?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file_mut().flush())
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| EngineError::io(tmp.path(), e))?;
    tmp.persist(dest).map_err(|e| EngineError::io(dest, e.error))?;

    // Best-effort: the file is already in place
    let _ = File::open(dir).and_then(|d| d.sync_all());
    debug!(path = %dest.display(), bytes = bytes.len(), "atomic write complete");
    Ok(())
}

/// Backup path for `original` taken at `at`
#[must_use]
pub fn backup_path(original: &Path, at: DateTime<Utc>) -> PathBuf {
    let mut name = original.as_os_str().to_owned();
    name.push(format!(".{}.bak", at.format(BACKUP_TIMESTAMP_FORMAT)));
    PathBuf::from(name)
}

/// Write a full copy of `bytes` next to `original`
///
/// The backup is created exclusively; when two backups land in the same
/// millisecond a `-N` counter is added before `.bak`.
///
/// # Errors
/// Returns [`EngineError::Io`] if no backup file could be written
pub fn write_backup(original: &Path, bytes: &[u8]) -> EngineResult<PathBuf> {
    let base = backup_path(original, Utc::now());
    let mut candidate = base.clone();
    for attempt in 1..=100u32 {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(mut file) => {
                file.write_all(bytes)
                    .and_then(|()| file.sync_all())
                    .map_err(|e| EngineError::io(&candidate, e))?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let stem = base.to_string_lossy();
                let stem = stem.strip_suffix(".bak").unwrap_or(&stem);
                candidate = PathBuf::from(format!("{stem}-{attempt}.bak"));
            }
            Err(e) => return Err(EngineError::io(&candidate, e)),
        }
    }
    Err(EngineError::io(
        &base,
        io::Error::new(io::ErrorKind::AlreadyExists, "no free backup name"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_bytes(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn atomic_write_replaces_content_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.json");
        fs::write(&path, b"old").unwrap();

        atomic_write(&path, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn atomic_write_into_missing_dir_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("book.json");
        assert!(matches!(atomic_write(&path, b"x"), Err(EngineError::Io { .. })));
    }

    #[test]
    fn backup_name_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let path = backup_path(Path::new("/data/book.json"), at);
        assert_eq!(path, PathBuf::from("/data/book.json.20240305T140709000Z.bak"));
    }

    #[test]
    fn backups_never_overwrite_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.json");
        let a = write_backup(&path, b"one").unwrap();
        let b = write_backup(&path, b"two").unwrap();
        assert_ne!(a, b);
        assert_eq!(fs::read(&a).unwrap(), b"one");
        assert_eq!(fs::read(&b).unwrap(), b"two");
    }
}
