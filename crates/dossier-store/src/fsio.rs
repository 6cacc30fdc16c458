//! Durable filesystem primitives shared by the per-report stores and the
//! global index.
//!
//! The write discipline everywhere is the same: write the full payload to a
//! temporary file in the *target* directory, flush and fsync it, atomically
//! rename it over the destination, then best-effort fsync the directory
//! entry. A reader therefore observes either the old bytes or the new bytes
//! in full, never a truncated mix.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use tracing::warn;

/// Atomically replace `path` with `bytes`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path has no parent directory: {}", path.display()),
        )
    })?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("outline");
    let tmp = dir.join(format!(".{}.tmp-{}", file_name, std::process::id()));

    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()?;
    drop(file);

    if let Err(err) = fs::rename(&tmp, path) {
        // Leave no temp turd behind on failure.
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    sync_dir(dir);
    Ok(())
}

/// Append one JSONL record (without trailing newline) to `path`, creating
/// the file if needed. The record itself is synced; prior records are never
/// rewritten.
pub fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()?;
    file.sync_all()
}

/// Best-effort fsync of a directory entry. Failure is logged, never fatal:
/// on some filesystems directories cannot be opened for sync at all.
pub fn sync_dir(dir: &Path) {
    match File::open(dir) {
        Ok(handle) => {
            if let Err(err) = handle.sync_all() {
                warn!(dir = %dir.display(), error = %err, "directory sync failed");
            }
        }
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "directory open for sync failed");
        }
    }
}

/// Recursively copy a report directory, skipping transient files (the LOCK
/// file and any in-flight temp files).
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if name_str == crate::lock::LOCK_FILE || name_str.starts_with('.') {
            continue;
        }
        let src_path = entry.path();
        let dst_path = dst.join(&name);
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_replaces_content_and_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("outline.json");

        write_atomic(&target, b"{\"v\":1}").unwrap();
        write_atomic(&target, b"{\"v\":2}").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"{\"v\":2}");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_append_line_is_append_only() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("audit.log");
        append_line(&log, "{\"a\":1}").unwrap();
        append_line(&log, "{\"a\":2}").unwrap();
        let content = fs::read_to_string(&log).unwrap();
        assert_eq!(content, "{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn test_copy_dir_recursive_skips_lock_and_temp_files() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("backups")).unwrap();
        fs::write(src.join("outline.json"), b"{}").unwrap();
        fs::write(src.join("backups/snap.json"), b"{}").unwrap();
        fs::write(src.join(crate::lock::LOCK_FILE), b"123").unwrap();
        fs::write(src.join(".outline.json.tmp-99"), b"partial").unwrap();

        let dst = dir.path().join("dst");
        copy_dir_recursive(&src, &dst).unwrap();

        assert!(dst.join("outline.json").exists());
        assert!(dst.join("backups/snap.json").exists());
        assert!(!dst.join(crate::lock::LOCK_FILE).exists());
        assert!(!dst.join(".outline.json.tmp-99").exists());
    }
}
