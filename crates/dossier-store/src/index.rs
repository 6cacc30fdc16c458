//! The Global Index: a derived catalog of every report, for title/ID
//! resolution and listing without opening each store.
//!
//! Backing file is `index.jsonl` at the repository root, rewritten whole on
//! every mutation with the same temp-file + rename discipline as outlines.
//! In memory it is two maps behind a `parking_lot::RwLock`. The index is
//! never the source of truth (the per-report stores are), and
//! [`GlobalIndex::rebuild_from_filesystem`] can reconstruct it at any time.
//!
//! Concurrent index writers are serialized only by the atomic rename (last
//! whole-file writer wins); a dropped refresh is healed by a rebuild. This
//! is a deliberate trade-off, not an oversight.

use crate::error::{Result, StoreError};
use crate::fsio;
use crate::report_store::ReportStore;
use dossier_model::{IndexEntry, ReportStatus};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const INDEX_FILE: &str = "index.jsonl";
pub const BY_ID_DIR: &str = "by_id";

#[derive(Debug, Default)]
struct IndexState {
    by_id: BTreeMap<String, IndexEntry>,
    /// Lowercased title → report_id; last writer wins on duplicate titles.
    by_title: BTreeMap<String, String>,
}

impl IndexState {
    fn insert(&mut self, entry: IndexEntry) {
        // Drop the old title mapping when a report was renamed.
        if let Some(old) = self.by_id.get(&entry.report_id) {
            let old_key = old.current_title.to_lowercase();
            if self.by_title.get(&old_key).map(String::as_str) == Some(entry.report_id.as_str()) {
                self.by_title.remove(&old_key);
            }
        }
        self.by_title
            .insert(entry.current_title.to_lowercase(), entry.report_id.clone());
        self.by_id.insert(entry.report_id.clone(), entry);
    }

    fn remove(&mut self, report_id: &str) -> Option<IndexEntry> {
        let entry = self.by_id.remove(report_id)?;
        let key = entry.current_title.to_lowercase();
        if self.by_title.get(&key).map(String::as_str) == Some(report_id) {
            self.by_title.remove(&key);
        }
        Some(entry)
    }
}

#[derive(Debug)]
pub struct GlobalIndex {
    root: PathBuf,
    state: RwLock<IndexState>,
}

impl GlobalIndex {
    /// Load `index.jsonl` under `root`, tolerating an absent file (empty
    /// repository) and skipping corrupt lines with a warning.
    pub fn open(root: &Path) -> Result<Self> {
        let index = Self {
            root: root.to_path_buf(),
            state: RwLock::new(IndexState::default()),
        };
        let path = index.index_path();
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(index),
            Err(err) => return Err(err.into()),
        };
        let mut state = IndexState::default();
        for (line_no, line) in std::io::BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<IndexEntry>(&line) {
                Ok(entry) => state.insert(entry),
                Err(err) => {
                    warn!(line = line_no + 1, error = %err, "skipping corrupt index line");
                }
            }
        }
        *index.state.write() = state;
        Ok(index)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn entry(&self, report_id: &str) -> Option<IndexEntry> {
        self.state.read().by_id.get(report_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().by_id.is_empty()
    }

    /// All entries, optionally hiding archived reports, newest update first.
    pub fn list(&self, include_archived: bool) -> Vec<IndexEntry> {
        let state = self.state.read();
        let mut entries: Vec<IndexEntry> = state
            .by_id
            .values()
            .filter(|e| include_archived || e.status == ReportStatus::Active)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        entries
    }

    /// Resolve a title to a report ID.
    ///
    /// Exact case-insensitive match first. With `allow_partial`, a
    /// case-insensitive substring match over *active* reports is attempted
    /// next, but only a unique hit resolves; zero or several candidates
    /// return `None` (ambiguity is never silently resolved).
    pub fn resolve_title(&self, title: &str, allow_partial: bool) -> Option<String> {
        let state = self.state.read();
        let needle = title.to_lowercase();
        if let Some(id) = state.by_title.get(&needle) {
            return Some(id.clone());
        }
        if !allow_partial {
            return None;
        }
        let mut candidates = state.by_id.values().filter(|e| {
            e.status == ReportStatus::Active && e.current_title.to_lowercase().contains(&needle)
        });
        let first = candidates.next()?;
        if candidates.next().is_some() {
            return None;
        }
        Some(first.report_id.clone())
    }

    /// Insert or replace one entry and rewrite the backing file.
    pub fn upsert(&self, entry: IndexEntry) -> Result<()> {
        let mut state = self.state.write();
        state.insert(entry);
        self.persist(&state)
    }

    /// Drop one entry and rewrite the backing file.
    pub fn remove(&self, report_id: &str) -> Result<()> {
        let mut state = self.state.write();
        state.remove(report_id);
        self.persist(&state)
    }

    /// Authoritative recovery: scan every report directory, rebuild each
    /// entry from its current outline, and replace the whole index.
    /// Directories with missing or corrupt outlines are skipped with a
    /// warning. Safe to run at any time; returns the number of reports
    /// indexed.
    pub fn rebuild_from_filesystem(&self) -> Result<usize> {
        let by_id_root = self.root.join(BY_ID_DIR);
        let mut fresh = IndexState::default();
        if by_id_root.is_dir() {
            for entry in fs::read_dir(&by_id_root)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let report_id = entry.file_name().to_string_lossy().to_string();
                let store = ReportStore::open(&self.root, &report_id);
                match store.load() {
                    Ok(outline) => {
                        fresh.insert(IndexEntry::from_outline(
                            &outline,
                            format!("{BY_ID_DIR}/{}", outline.report_id),
                        ));
                    }
                    Err(err) => {
                        warn!(
                            report_id = %report_id,
                            error = %err,
                            "skipping report during index rebuild"
                        );
                    }
                }
            }
        }
        let count = fresh.by_id.len();
        let mut state = self.state.write();
        *state = fresh;
        self.persist(&state)?;
        debug!(reports = count, "rebuilt index from filesystem");
        Ok(count)
    }

    /// Report index/disk drift without mutating anything.
    pub fn validate_consistency(&self) -> Result<Vec<String>> {
        let mut problems = Vec::new();
        let state = self.state.read();

        for (report_id, entry) in &state.by_id {
            let store = ReportStore::open(&self.root, report_id);
            if !store.exists() {
                problems.push(format!(
                    "indexed report {report_id} (\"{}\") has no outline on disk",
                    entry.current_title
                ));
            }
        }

        let by_id_root = self.root.join(BY_ID_DIR);
        if by_id_root.is_dir() {
            for entry in fs::read_dir(&by_id_root)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let report_id = entry.file_name().to_string_lossy().to_string();
                let store = ReportStore::open(&self.root, &report_id);
                if store.exists() && !state.by_id.contains_key(&report_id) {
                    problems.push(format!("report {report_id} exists on disk but is unindexed"));
                }
            }
        }

        Ok(problems)
    }

    fn persist(&self, state: &IndexState) -> Result<()> {
        let mut buf = String::new();
        for entry in state.by_id.values() {
            let line = serde_json::to_string(entry)
                .map_err(|err| StoreError::InvalidInput(err.to_string()))?;
            buf.push_str(&line);
            buf.push('\n');
        }
        fsio::write_atomic(&self.index_path(), buf.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dossier_model::Outline;
    use tempfile::tempdir;

    fn entry(id: &str, title: &str, status: ReportStatus) -> IndexEntry {
        IndexEntry {
            report_id: id.to_string(),
            current_title: title.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            tags: Vec::new(),
            status,
            path: format!("{BY_ID_DIR}/{id}"),
        }
    }

    #[test]
    fn test_resolve_exact_beats_partial_and_is_case_insensitive() {
        let dir = tempdir().unwrap();
        let index = GlobalIndex::open(dir.path()).unwrap();
        index
            .upsert(entry("r-1", "Q1 Review", ReportStatus::Active))
            .unwrap();
        index
            .upsert(entry("r-2", "Q1 Review Draft", ReportStatus::Active))
            .unwrap();

        assert_eq!(index.resolve_title("q1 review", false), Some("r-1".into()));
        // Partial match across both candidates is ambiguous.
        assert_eq!(index.resolve_title("q1", true), None);
        assert_eq!(index.resolve_title("draft", true), Some("r-2".into()));
        assert_eq!(index.resolve_title("draft", false), None);
    }

    #[test]
    fn test_partial_resolution_ignores_archived_reports() {
        let dir = tempdir().unwrap();
        let index = GlobalIndex::open(dir.path()).unwrap();
        index
            .upsert(entry("r-1", "Churn study", ReportStatus::Archived))
            .unwrap();
        index
            .upsert(entry("r-2", "Churn deep dive", ReportStatus::Active))
            .unwrap();
        assert_eq!(index.resolve_title("churn", true), Some("r-2".into()));
    }

    #[test]
    fn test_mutations_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let index = GlobalIndex::open(dir.path()).unwrap();
            index
                .upsert(entry("r-1", "Persisted", ReportStatus::Active))
                .unwrap();
            index
                .upsert(entry("r-2", "Removed", ReportStatus::Active))
                .unwrap();
            index.remove("r-2").unwrap();
        }
        let reopened = GlobalIndex::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.entry("r-1").is_some());
        assert!(reopened.entry("r-2").is_none());
    }

    #[test]
    fn test_rename_releases_old_title_key() {
        let dir = tempdir().unwrap();
        let index = GlobalIndex::open(dir.path()).unwrap();
        index
            .upsert(entry("r-1", "Old name", ReportStatus::Active))
            .unwrap();
        index
            .upsert(entry("r-1", "New name", ReportStatus::Active))
            .unwrap();
        assert_eq!(index.resolve_title("old name", false), None);
        assert_eq!(index.resolve_title("new name", false), Some("r-1".into()));
    }

    #[test]
    fn test_rebuild_is_idempotent_and_matches_disk() {
        let dir = tempdir().unwrap();
        // Two reports on disk, one corrupt directory to skip.
        for title in ["Alpha", "Beta"] {
            let outline = Outline::new(title);
            let store = ReportStore::open(dir.path(), &outline.report_id);
            store.save(&outline).unwrap();
        }
        let bad = dir.path().join(BY_ID_DIR).join("broken");
        fs::create_dir_all(&bad).unwrap();
        fs::write(bad.join("outline.json"), b"not json").unwrap();

        let index = GlobalIndex::open(dir.path()).unwrap();
        assert_eq!(index.rebuild_from_filesystem().unwrap(), 2);
        let first = index.list(true);
        assert_eq!(index.rebuild_from_filesystem().unwrap(), 2);
        let second = index.list(true);
        assert_eq!(first, second);
        assert!(index.resolve_title("alpha", false).is_some());
    }

    #[test]
    fn test_validate_consistency_reports_drift_both_ways() {
        let dir = tempdir().unwrap();
        let index = GlobalIndex::open(dir.path()).unwrap();
        // Indexed but missing on disk.
        index
            .upsert(entry("ghost", "Ghost", ReportStatus::Active))
            .unwrap();
        // On disk but unindexed.
        let outline = Outline::new("Unindexed");
        ReportStore::open(dir.path(), &outline.report_id)
            .save(&outline)
            .unwrap();

        let problems = index.validate_consistency().unwrap();
        assert_eq!(problems.len(), 2);
        assert!(problems.iter().any(|p| p.contains("ghost")));
        assert!(problems.iter().any(|p| p.contains(&outline.report_id)));
    }
}
