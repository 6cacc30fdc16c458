//! The update protocol: every mutation of a report runs
//! `lock → load → version check → transform → persist → audit → index`.
//!
//! The version check is the whole optimistic-concurrency story: a caller
//! passes the `outline_version` it last observed, and a mismatch means
//! another writer won the race: the attempt fails with
//! [`StoreError::VersionConflict`] before anything is written. Passing no
//! expected version opts into last-write-wins.
//!
//! The index refresh runs *after* the lock is released and its failure
//! never rolls back the durable write; it is returned as a warning and the
//! index healed later by a rebuild.

use crate::error::{Result, StoreError};
use crate::index::GlobalIndex;
use crate::report_store::{sha256_hex, ReportStore};
use chrono::Utc;
use dossier_model::outline::meta;
use dossier_model::{
    apply_change_set, diff_outlines, ActionType, Actor, AuditEvent, ChangeSet, CitationPolicy,
    IndexEntry, Outline, OutlineDiff,
};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// ============================================================================
// Configuration & caller identity
// ============================================================================

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Repository root; reports live under `<root>/by_id/`.
    pub root: PathBuf,
    /// Which templates demand citations on added/modified insights.
    pub citation_policy: CitationPolicy,
}

impl EngineConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            citation_policy: CitationPolicy::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("./reports")
    }
}

/// Who is calling, recorded in every audit event. Supplied by the outer
/// tool-dispatch layer.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub actor: Actor,
    pub request_id: Option<String>,
}

impl ActionContext {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Result of one successful mutation.
#[derive(Debug, Clone)]
pub struct EvolveOutcome {
    pub outline: Outline,
    pub diff: OutlineDiff,
    /// Non-fatal diagnostics: quality warnings from the change engine plus
    /// any swallowed secondary failure (index refresh).
    pub warnings: Vec<String>,
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug)]
pub struct ReportEngine {
    pub(crate) config: EngineConfig,
    pub(crate) index: GlobalIndex,
}

impl ReportEngine {
    pub fn open(config: EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(config.root.join(crate::index::BY_ID_DIR))?;
        let index = GlobalIndex::open(&config.root)?;
        Ok(Self { config, index })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn index(&self) -> &GlobalIndex {
        &self.index
    }

    pub(crate) fn store(&self, report_id: &str) -> ReportStore {
        ReportStore::open(&self.config.root, report_id)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Unlocked read of the current outline. Fine for display; the version
    /// it reports may be superseded the moment it returns, so never feed it
    /// into a later write without passing that version as
    /// `expected_version`.
    pub fn get(&self, report_id: &str) -> Result<Outline> {
        self.store(report_id).load()
    }

    /// Audit trail in append order.
    pub fn history(&self, report_id: &str) -> Result<Vec<AuditEvent>> {
        let store = self.store(report_id);
        if !store.exists() {
            return Err(StoreError::ReportNotFound(report_id.to_string()));
        }
        store.load_audit_events()
    }

    /// Resolve a human-entered selector (report ID or title) to a report ID.
    pub fn resolve(&self, selector: &str, allow_partial: bool) -> Result<String> {
        if self.index.entry(selector).is_some() || self.store(selector).exists() {
            return Ok(selector.to_string());
        }
        self.index
            .resolve_title(selector, allow_partial)
            .ok_or_else(|| StoreError::ReportNotFound(selector.to_string()))
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Create a new, empty report. The first save takes no backup; the
    /// index entry is registered immediately.
    pub fn create(
        &self,
        title: &str,
        template: Option<&str>,
        tags: Vec<String>,
        ctx: &ActionContext,
    ) -> Result<Outline> {
        if title.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "report title must be non-empty".to_string(),
            ));
        }
        let mut outline = Outline::new(title);
        if let Some(template) = template {
            outline
                .metadata
                .insert(meta::TEMPLATE.to_string(), serde_json::json!(template));
        }
        if !tags.is_empty() {
            outline
                .metadata
                .insert(meta::TAGS.to_string(), serde_json::json!(tags));
        }

        let store = self.store(&outline.report_id);
        store.create_dirs()?;
        let _guard = store.lock()?;
        let receipt = store.save(&outline)?;
        store.append_audit_event(&AuditEvent::new(
            &outline.report_id,
            ctx.actor,
            ActionType::Create,
            ctx.request_id.clone(),
            serde_json::json!({
                "title": outline.title,
                "template": template,
                "outline_sha256": receipt.outline_sha256,
            }),
        ))?;
        drop(_guard);

        if let Some(warning) = self.refresh_index(&outline) {
            warn!(report_id = %outline.report_id, warning, "index refresh after create failed");
        }
        Ok(outline)
    }

    /// Apply a change-set under the optimistic-concurrency protocol.
    pub fn evolve(
        &self,
        report_id: &str,
        changes: &ChangeSet,
        expected_version: Option<u64>,
        ctx: &ActionContext,
    ) -> Result<EvolveOutcome> {
        let policy = self.config.citation_policy.clone();
        self.commit(
            report_id,
            expected_version,
            ctx,
            ActionType::Evolve,
            serde_json::Map::new(),
            |current| {
                let outcome = apply_change_set(current, changes, &policy)?;
                Ok((outcome.outline, outcome.warnings))
            },
        )
    }

    /// Retitle a report; the index's title map is refreshed with the rest
    /// of the entry.
    pub fn rename(
        &self,
        report_id: &str,
        new_title: &str,
        expected_version: Option<u64>,
        ctx: &ActionContext,
    ) -> Result<Outline> {
        if new_title.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "report title must be non-empty".to_string(),
            ));
        }
        let mut extra = serde_json::Map::new();
        extra.insert("new_title".to_string(), serde_json::json!(new_title));
        let outcome = self.commit(
            report_id,
            expected_version,
            ctx,
            ActionType::Rename,
            extra,
            |current| {
                let mut next = current.clone();
                next.title = new_title.to_string();
                Ok((next, Vec::new()))
            },
        )?;
        Ok(outcome.outline)
    }

    /// Replace the report's tag list.
    pub fn update_tags(
        &self,
        report_id: &str,
        tags: Vec<String>,
        expected_version: Option<u64>,
        ctx: &ActionContext,
    ) -> Result<Outline> {
        let tags_value = serde_json::json!(tags);
        let mut extra = serde_json::Map::new();
        extra.insert("tags".to_string(), tags_value.clone());
        let outcome = self.commit(
            report_id,
            expected_version,
            ctx,
            ActionType::TagUpdate,
            extra,
            |current| {
                let mut next = current.clone();
                next.metadata
                    .insert(meta::TAGS.to_string(), tags_value.clone());
                Ok((next, Vec::new()))
            },
        )?;
        Ok(outcome.outline)
    }

    /// Record that the external renderer produced an artifact for this
    /// report. The outline itself is untouched.
    pub fn record_render(
        &self,
        report_id: &str,
        output: &str,
        ctx: &ActionContext,
    ) -> Result<()> {
        let store = self.store(report_id);
        let _guard = store.lock()?;
        if !store.exists() {
            return Err(StoreError::ReportNotFound(report_id.to_string()));
        }
        store.append_audit_event(&AuditEvent::new(
            report_id,
            ctx.actor,
            ActionType::Render,
            ctx.request_id.clone(),
            serde_json::json!({ "output": output }),
        ))
    }

    // ------------------------------------------------------------------
    // Shared commit path
    // ------------------------------------------------------------------

    /// One `Locked → Loaded → Diffed → Persisted → Indexed` cycle.
    ///
    /// `build` produces the candidate next outline (version and timestamp
    /// are stamped here, not by the builder). On a version conflict nothing
    /// is written and no audit event is appended.
    pub(crate) fn commit(
        &self,
        report_id: &str,
        expected_version: Option<u64>,
        ctx: &ActionContext,
        action_type: ActionType,
        mut extra_payload: serde_json::Map<String, serde_json::Value>,
        build: impl FnOnce(&Outline) -> Result<(Outline, Vec<String>)>,
    ) -> Result<EvolveOutcome> {
        let store = self.store(report_id);
        let guard = store.lock()?;

        let bytes = store.load_bytes()?;
        let current = store.parse_outline(&bytes, &store.outline_path())?;
        self.detect_manual_edit(&store, &bytes, ctx)?;

        if let Some(expected) = expected_version {
            if expected != current.outline_version {
                return Err(StoreError::VersionConflict {
                    expected,
                    actual: current.outline_version,
                });
            }
        }

        let (mut next, mut warnings) = build(&current)?;
        next.outline_version = current.outline_version + 1;
        next.updated_at = Utc::now();

        let diff = diff_outlines(&current, &next);
        let receipt = store.save(&next)?;

        extra_payload.insert(
            "diff".to_string(),
            serde_json::to_value(&diff).unwrap_or_default(),
        );
        extra_payload.insert(
            "change_count".to_string(),
            serde_json::json!(diff.total_changes()),
        );
        extra_payload.insert(
            "backup_filename".to_string(),
            serde_json::json!(receipt.backup_filename),
        );
        extra_payload.insert(
            "outline_sha256".to_string(),
            serde_json::json!(receipt.outline_sha256),
        );
        store.append_audit_event(&AuditEvent::new(
            report_id,
            ctx.actor,
            action_type,
            ctx.request_id.clone(),
            serde_json::Value::Object(extra_payload),
        ))?;
        drop(guard);

        debug!(
            report_id = %report_id,
            outline_version = next.outline_version,
            changes = diff.total_changes(),
            "committed mutation"
        );

        if let Some(warning) = self.refresh_index(&next) {
            warnings.push(warning);
        }

        Ok(EvolveOutcome {
            outline: next,
            diff,
            warnings,
        })
    }

    /// Compare the on-disk outline hash against the one recorded by the
    /// last write event; an out-of-band edit gets its own audit event so
    /// the trail explains the discontinuity. Never fails the mutation.
    fn detect_manual_edit(
        &self,
        store: &ReportStore,
        current_bytes: &[u8],
        ctx: &ActionContext,
    ) -> Result<()> {
        let events = store.load_audit_events()?;
        let Some(recorded) = events
            .iter()
            .rev()
            .find(|e| e.is_write())
            .and_then(|e| e.outline_sha256())
        else {
            return Ok(());
        };
        let observed = sha256_hex(current_bytes);
        if observed != recorded {
            warn!(
                report_id = %store.report_id(),
                "outline was edited outside the engine since the last recorded write"
            );
            store.append_audit_event(&AuditEvent::new(
                store.report_id(),
                ctx.actor,
                ActionType::ManualEditDetected,
                ctx.request_id.clone(),
                serde_json::json!({
                    "recorded_sha256": recorded,
                    "observed_sha256": observed,
                }),
            ))?;
        }
        Ok(())
    }

    /// Refresh this report's Global Index entry. Failure is returned as a
    /// warning string: the outline write is already durable and must not
    /// be rolled back by a catalog problem.
    pub(crate) fn refresh_index(&self, outline: &Outline) -> Option<String> {
        let entry = IndexEntry::from_outline(
            outline,
            format!("{}/{}", crate::index::BY_ID_DIR, outline.report_id),
        );
        match self.index.upsert(entry) {
            Ok(()) => None,
            Err(err) => {
                warn!(report_id = %outline.report_id, error = %err, "index refresh failed");
                Some(format!(
                    "index refresh failed (rebuild_from_filesystem can heal it): {err}"
                ))
            }
        }
    }
}
