//! Denormalized catalog records for the global index.
//!
//! An [`IndexEntry`] is intentionally lossy: enough to list and resolve
//! reports without opening their stores. It is derived data: the per-report
//! outline is always the source of truth, and entries can be rebuilt from it
//! at any time.

use crate::outline::Outline;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    #[default]
    Active,
    Archived,
}

/// One line of `index.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub report_id: String,
    pub current_title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: ReportStatus,
    /// Storage directory relative to the repository root.
    pub path: String,
}

impl IndexEntry {
    pub fn from_outline(outline: &Outline, path: impl Into<String>) -> Self {
        Self {
            report_id: outline.report_id.clone(),
            current_title: outline.title.clone(),
            created_at: outline.created_at,
            updated_at: outline.updated_at,
            tags: outline.tags(),
            status: if outline.is_archived() {
                ReportStatus::Archived
            } else {
                ReportStatus::Active
            },
            path: path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outline::meta;

    #[test]
    fn test_entry_derives_tags_and_status_from_metadata() {
        let mut outline = Outline::new("Q1 Review");
        outline
            .metadata
            .insert(meta::TAGS.into(), serde_json::json!(["finance", "q1"]));
        outline
            .metadata
            .insert(meta::STATUS.into(), serde_json::json!("archived"));

        let entry = IndexEntry::from_outline(&outline, "by_id/abc");
        assert_eq!(entry.tags, vec!["finance", "q1"]);
        assert_eq!(entry.status, ReportStatus::Archived);
        assert_eq!(entry.path, "by_id/abc");
    }

    #[test]
    fn test_missing_metadata_defaults_to_active_untagged() {
        let outline = Outline::new("Bare");
        let entry = IndexEntry::from_outline(&outline, "by_id/x");
        assert!(entry.tags.is_empty());
        assert_eq!(entry.status, ReportStatus::Active);
    }
}
