//! The Per-Report Store: all bytes for one report.
//!
//! A `ReportStore` is a cheap handle; nothing touches disk until called.
//! Mutating methods assume the caller holds the report's [`ReportLock`]:
//! the update protocol in `engine` is the only internal code path that
//! writes, and it always locks first. Bare reads for display are allowed
//! without the lock and may observe a version about to be superseded.

use crate::error::{Result, StoreError};
use crate::fsio;
use crate::lock::ReportLock;
use chrono::Utc;
use dossier_model::{AuditEvent, Outline};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const OUTLINE_FILE: &str = "outline.json";
pub const AUDIT_LOG_FILE: &str = "audit.log";
pub const BACKUPS_DIR: &str = "backups";

/// What a `save` did: the backup snapshot it took of the previous outline
/// (absent on the very first save) and the SHA-256 of the bytes it wrote,
/// recorded in the audit payload for manual-edit detection.
#[derive(Debug, Clone)]
pub struct SaveReceipt {
    pub backup_filename: Option<String>,
    pub outline_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ReportStore {
    report_id: String,
    dir: PathBuf,
}

impl ReportStore {
    /// Handle for `<root>/by_id/<report_id>`; does not touch the disk.
    pub fn open(root: &Path, report_id: &str) -> Self {
        Self {
            report_id: report_id.to_string(),
            dir: root.join(crate::index::BY_ID_DIR).join(report_id),
        }
    }

    pub fn report_id(&self) -> &str {
        &self.report_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn outline_path(&self) -> PathBuf {
        self.dir.join(OUTLINE_FILE)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.dir.join(AUDIT_LOG_FILE)
    }

    pub fn backup_path(&self, backup_filename: &str) -> PathBuf {
        self.dir.join(BACKUPS_DIR).join(backup_filename)
    }

    pub fn exists(&self) -> bool {
        self.outline_path().is_file()
    }

    pub fn create_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.dir.join(BACKUPS_DIR))?;
        Ok(())
    }

    /// Exclusive lock for this report; required around every mutation.
    pub fn lock(&self) -> Result<ReportLock> {
        fs::create_dir_all(&self.dir)?;
        Ok(ReportLock::acquire(&self.dir)?)
    }

    // ------------------------------------------------------------------
    // Outline
    // ------------------------------------------------------------------

    pub fn load_bytes(&self) -> Result<Vec<u8>> {
        let path = self.outline_path();
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::ReportNotFound(self.report_id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Deserialize and structurally validate the current outline.
    pub fn load(&self) -> Result<Outline> {
        let bytes = self.load_bytes()?;
        self.parse_outline(&bytes, &self.outline_path())
    }

    /// Parse outline bytes from this store, distinguishing damage
    /// (`Corrupt`) from absence (`ReportNotFound`).
    pub fn parse_outline(&self, bytes: &[u8], origin: &Path) -> Result<Outline> {
        let outline: Outline = serde_json::from_slice(bytes)
            .map_err(|err| StoreError::corrupt(origin, err.to_string()))?;
        let errors = outline.integrity_errors();
        if !errors.is_empty() {
            let detail = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(StoreError::corrupt(origin, detail));
        }
        Ok(outline)
    }

    /// Persist `outline` atomically, snapshotting the previous bytes first.
    ///
    /// The very first save has nothing to back up and skips that step.
    pub fn save(&self, outline: &Outline) -> Result<SaveReceipt> {
        self.create_dirs()?;
        let backup_filename = self.backup_current()?;

        let mut bytes = serde_json::to_vec_pretty(outline)
            .map_err(|err| StoreError::InvalidInput(err.to_string()))?;
        bytes.push(b'\n');
        fsio::write_atomic(&self.outline_path(), &bytes)?;
        debug!(
            report_id = %self.report_id,
            outline_version = outline.outline_version,
            backup = backup_filename.as_deref().unwrap_or("-"),
            "saved outline"
        );

        Ok(SaveReceipt {
            backup_filename,
            outline_sha256: sha256_hex(&bytes),
        })
    }

    /// Copy the live outline bytes into `backups/`, returning the backup's
    /// filename; `None` when no outline exists yet.
    pub fn backup_current(&self) -> Result<Option<String>> {
        let outline_path = self.outline_path();
        if !outline_path.is_file() {
            return Ok(None);
        }
        let backups = self.dir.join(BACKUPS_DIR);
        fs::create_dir_all(&backups)?;
        let seq = fs::read_dir(&backups)?.filter_map(|e| e.ok()).count() + 1;
        let name = format!("{}-{:04}.json", Utc::now().format("%Y%m%dT%H%M%S%3fZ"), seq);
        fs::copy(&outline_path, backups.join(&name))?;
        fsio::sync_dir(&backups);
        Ok(Some(name))
    }

    /// Read and validate one backup snapshot.
    pub fn load_backup(&self, backup_filename: &str) -> Result<Outline> {
        let path = self.backup_path(backup_filename);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::InvalidInput(format!(
                    "backup {backup_filename} does not exist for report {}",
                    self.report_id
                )))
            }
            Err(err) => return Err(err.into()),
        };
        self.parse_outline(&bytes, &path)
    }

    /// SHA-256 of the current on-disk outline bytes.
    pub fn outline_sha256(&self) -> Result<String> {
        Ok(sha256_hex(&self.load_bytes()?))
    }

    // ------------------------------------------------------------------
    // Audit log
    // ------------------------------------------------------------------

    /// Append one event as a JSONL record. Prior records are never touched.
    pub fn append_audit_event(&self, event: &AuditEvent) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let line = serde_json::to_string(event)
            .map_err(|err| StoreError::InvalidInput(err.to_string()))?;
        fsio::append_line(&self.audit_log_path(), &line)?;
        Ok(())
    }

    /// Events in append order. A corrupt line is skipped with a warning
    /// rather than failing the whole read: the trail is forensic data and
    /// a torn final line must not make history unreadable.
    pub fn load_audit_events(&self) -> Result<Vec<AuditEvent>> {
        let path = self.audit_log_path();
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut events = Vec::new();
        for (line_no, line) in std::io::BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(&line) {
                Ok(event) => events.push(event),
                Err(err) => {
                    warn!(
                        report_id = %self.report_id,
                        line = line_no + 1,
                        error = %err,
                        "skipping corrupt audit log line"
                    );
                }
            }
        }
        Ok(events)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
