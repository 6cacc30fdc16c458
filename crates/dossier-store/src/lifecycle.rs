//! Lifecycle operations built on the per-report store and the commit path:
//! archive, delete-to-trash, fork, synthesize, revert, explicit snapshot.
//!
//! Nothing here hard-deletes: "delete" relocates the whole report directory
//! into `.trash/` with its audit log intact, and every destructive recovery
//! (revert) first snapshots the state it is about to discard, so recovery
//! itself is undoable.

use crate::engine::{ActionContext, ReportEngine};
use crate::error::{Result, StoreError};
use crate::fsio;
use crate::report_store::{ReportStore, AUDIT_LOG_FILE};
use chrono::Utc;
use dossier_model::outline::meta;
use dossier_model::{ActionType, AuditEvent, Outline, Section};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};
use uuid::Uuid;

pub const TRASH_DIR: &str = ".trash";

impl ReportEngine {
    /// Mark a report archived. One ordinary mutation: the outline survives,
    /// listings hide it by default and partial title resolution skips it.
    pub fn archive(
        &self,
        report_id: &str,
        expected_version: Option<u64>,
        ctx: &ActionContext,
    ) -> Result<Outline> {
        let outcome = self.commit(
            report_id,
            expected_version,
            ctx,
            ActionType::Archive,
            serde_json::Map::new(),
            |current| {
                let mut next = current.clone();
                next.metadata
                    .insert(meta::STATUS.to_string(), serde_json::json!("archived"));
                Ok((next, Vec::new()))
            },
        )?;
        Ok(outcome.outline)
    }

    /// Move the whole report directory to the trash area, keeping its audit
    /// log for forensics, and drop the index entry. The final `delete`
    /// event is written into the *trash* copy of the log so provenance
    /// survives the move.
    pub fn delete(&self, report_id: &str, ctx: &ActionContext) -> Result<PathBuf> {
        let store = self.store(report_id);
        let guard = store.lock()?;
        if !store.exists() {
            return Err(StoreError::ReportNotFound(report_id.to_string()));
        }

        let trash_root = self.config.root.join(TRASH_DIR);
        fs::create_dir_all(&trash_root)?;
        let dest = trash_root.join(format!(
            "{report_id}_{}",
            Utc::now().format("%Y%m%dT%H%M%S%3fZ")
        ));
        fs::rename(store.dir(), &dest)?;
        fsio::sync_dir(&trash_root);
        drop(guard);

        let event = AuditEvent::new(
            report_id,
            ctx.actor,
            ActionType::Delete,
            ctx.request_id.clone(),
            serde_json::json!({ "trashed_to": dest.to_string_lossy() }),
        );
        let line = serde_json::to_string(&event)
            .map_err(|err| StoreError::InvalidInput(err.to_string()))?;
        fsio::append_line(&dest.join(AUDIT_LOG_FILE), &line)?;

        if let Err(err) = self.index.remove(report_id) {
            warn!(report_id = %report_id, error = %err, "index removal after delete failed");
        }
        debug!(report_id = %report_id, dest = %dest.display(), "report moved to trash");
        Ok(dest)
    }

    /// Deep-copy a report under a fresh identity. The copy keeps the full
    /// backup and audit history at fork time, restarts `outline_version` at
    /// 1, and records its provenance in metadata.
    pub fn fork(&self, source_id: &str, ctx: &ActionContext) -> Result<Outline> {
        let source = self.store(source_id);
        let source_guard = source.lock()?;
        let source_outline = source.load()?;

        let new_id = Uuid::new_v4().to_string();
        let target = ReportStore::open(&self.config.root, &new_id);
        fsio::copy_dir_recursive(source.dir(), target.dir())?;
        drop(source_guard);

        let now = Utc::now();
        let mut forked = source_outline;
        forked.report_id = new_id.clone();
        forked.outline_version = 1;
        forked.created_at = now;
        forked.updated_at = now;
        forked
            .metadata
            .insert(meta::FORKED_FROM.to_string(), serde_json::json!(source_id));
        forked.metadata.insert(
            meta::FORKED_AT.to_string(),
            serde_json::json!(now.to_rfc3339()),
        );

        let guard = target.lock()?;
        // This save snapshots the copied at-fork outline into backups/.
        let receipt = target.save(&forked)?;
        target.append_audit_event(&AuditEvent::new(
            &new_id,
            ctx.actor,
            ActionType::Fork,
            ctx.request_id.clone(),
            serde_json::json!({
                "forked_from": source_id,
                "backup_filename": receipt.backup_filename,
                "outline_sha256": receipt.outline_sha256,
            }),
        ))?;
        drop(guard);

        if let Some(warning) = self.refresh_index(&forked) {
            warn!(report_id = %new_id, warning, "index refresh after fork failed");
        }
        Ok(forked)
    }

    /// Merge N source reports into one new report: all sections (renumbered
    /// to a single order sequence) and all insights, with the source IDs
    /// recorded in metadata. Insight IDs are preserved; an insight shared
    /// by several sources (fork siblings) is carried once. Section IDs that
    /// collide across sources are re-minted.
    pub fn synthesize(
        &self,
        source_ids: &[String],
        title: &str,
        ctx: &ActionContext,
    ) -> Result<Outline> {
        if source_ids.is_empty() {
            return Err(StoreError::InvalidInput(
                "synthesize needs at least one source report".to_string(),
            ));
        }
        if title.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "report title must be non-empty".to_string(),
            ));
        }

        let mut merged = Outline::new(title);
        merged.metadata.insert(
            meta::SYNTHESIZED_FROM.to_string(),
            serde_json::json!(source_ids),
        );

        let mut next_order: u32 = 0;
        for source_id in source_ids {
            let source = self.store(source_id);
            let guard = source.lock()?;
            let outline = source.load()?;
            drop(guard);

            for insight in outline.insights {
                if merged.insight(&insight.insight_id).is_none() {
                    merged.insights.push(insight);
                }
            }
            let mut sections: Vec<Section> = outline.sections;
            sections.sort_by_key(|s| s.order);
            for mut section in sections {
                if merged.section(&section.section_id).is_some() {
                    section.section_id = Uuid::new_v4().to_string();
                }
                section.order = next_order;
                next_order += 1;
                merged.sections.push(section);
            }
        }

        let store = self.store(&merged.report_id);
        store.create_dirs()?;
        let guard = store.lock()?;
        let receipt = store.save(&merged)?;
        store.append_audit_event(&AuditEvent::new(
            &merged.report_id,
            ctx.actor,
            ActionType::Create,
            ctx.request_id.clone(),
            serde_json::json!({
                "title": merged.title,
                "synthesized_from": source_ids,
                "outline_sha256": receipt.outline_sha256,
            }),
        ))?;
        drop(guard);

        if let Some(warning) = self.refresh_index(&merged) {
            warn!(report_id = %merged.report_id, warning, "index refresh after synthesize failed");
        }
        Ok(merged)
    }

    /// Restore the outline snapshot taken just before `action_id` was
    /// applied, undoing that action and everything after it.
    ///
    /// The target event must carry a `backup_filename`; the backup must
    /// parse as a valid outline. The pre-revert state is snapshotted first,
    /// and the revert's own audit payload names both snapshots, so a revert
    /// can itself be reverted. `outline_version` keeps counting up: content
    /// goes back, the optimistic-concurrency counter never does.
    pub fn revert(
        &self,
        report_id: &str,
        action_id: &str,
        ctx: &ActionContext,
    ) -> Result<Outline> {
        let store = self.store(report_id);
        let guard = store.lock()?;
        let current = store.load()?;

        let events = store.load_audit_events()?;
        let target = events
            .iter()
            .find(|e| e.action_id == action_id)
            .ok_or_else(|| StoreError::ActionNotFound(action_id.to_string()))?;
        let backup_name = target.backup_filename().ok_or_else(|| {
            StoreError::InvalidInput(format!(
                "action {action_id} ({:?}) carries no backup snapshot to revert to",
                target.action_type
            ))
        })?;

        let mut restored = store.load_backup(backup_name)?;
        restored.report_id = current.report_id.clone();
        restored.outline_version = current.outline_version + 1;
        restored.updated_at = Utc::now();

        let receipt = store.save(&restored)?;
        store.append_audit_event(&AuditEvent::new(
            report_id,
            ctx.actor,
            ActionType::Revert,
            ctx.request_id.clone(),
            serde_json::json!({
                "reverted_action_id": action_id,
                "restored_from_backup": backup_name,
                "backup_filename": receipt.backup_filename,
                "outline_sha256": receipt.outline_sha256,
            }),
        ))?;
        drop(guard);

        if let Some(warning) = self.refresh_index(&restored) {
            warn!(report_id = %report_id, warning, "index refresh after revert failed");
        }
        Ok(restored)
    }

    /// Take an explicit point-in-time snapshot of the current outline
    /// without modifying it. Returns the backup filename, which the
    /// accompanying `backup` audit event also records.
    pub fn snapshot(&self, report_id: &str, ctx: &ActionContext) -> Result<String> {
        let store = self.store(report_id);
        let _guard = store.lock()?;
        let backup = store
            .backup_current()?
            .ok_or_else(|| StoreError::ReportNotFound(report_id.to_string()))?;
        store.append_audit_event(&AuditEvent::new(
            report_id,
            ctx.actor,
            ActionType::Backup,
            ctx.request_id.clone(),
            serde_json::json!({ "backup_filename": backup }),
        ))?;
        Ok(backup)
    }

    /// Reports currently sitting in the trash area, newest first by
    /// directory name.
    pub fn trashed(&self) -> Result<Vec<String>> {
        let trash_root = self.config.root.join(TRASH_DIR);
        let mut names = Vec::new();
        if trash_root.is_dir() {
            for entry in fs::read_dir(&trash_root)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    names.push(entry.file_name().to_string_lossy().to_string());
                }
            }
        }
        names.sort_by(|a, b| b.cmp(a));
        Ok(names)
    }
}
