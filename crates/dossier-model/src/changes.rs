//! Change-set instructions: loosely-structured add/modify/remove requests,
//! typically produced by an agent rather than a human.
//!
//! Patches carry per-field optionality: an omitted (or explicitly null)
//! field means "leave unchanged", never "clear". Validation failures are
//! structured records naming the field, the offending value, the reason and
//! the IDs that *would* have been valid, so an automated caller can
//! self-correct without a second round trip.

use crate::outline::{InsightStatus, SupportingQuery};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// ============================================================================
// Instructions
// ============================================================================

/// A proposed mutation of one outline: three disjoint instruction lists for
/// each of sections and insights.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default)]
    pub add_sections: Vec<SectionDraft>,
    #[serde(default)]
    pub modify_sections: Vec<SectionPatch>,
    #[serde(default)]
    pub remove_sections: Vec<String>,
    #[serde(default)]
    pub add_insights: Vec<InsightDraft>,
    #[serde(default)]
    pub modify_insights: Vec<InsightPatch>,
    #[serde(default)]
    pub remove_insights: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.add_sections.is_empty()
            && self.modify_sections.is_empty()
            && self.remove_sections.is_empty()
            && self.add_insights.is_empty()
            && self.modify_insights.is_empty()
            && self.remove_insights.is_empty()
    }
}

/// A brand-new insight. `insight_id` may be caller-supplied (so other
/// instructions in the same change-set can reference it) or left out for a
/// generated UUID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insight_id: Option<String>,
    pub summary: String,
    #[serde(default = "default_importance")]
    pub importance: u8,
    #[serde(default)]
    pub status: InsightStatus,
    #[serde(default)]
    pub supporting_queries: Vec<SupportingQuery>,
}

fn default_importance() -> u8 {
    5
}

/// A brand-new section. `insight_ids` links existing insights;
/// `new_insights` creates and links fresh ones in the same call. The two are
/// mutually exclusive: supplying both makes the intent ambiguous and is
/// rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    pub title: String,
    /// Display position; appended after the current maximum when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
    #[serde(default)]
    pub insight_ids: Vec<String>,
    #[serde(default)]
    pub new_insights: Vec<InsightDraft>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Partial update of one section, identified strictly by ID.
///
/// `insight_ids_to_add` / `insight_ids_to_remove` are set-like: adding an
/// already-linked ID and removing an absent one are both no-ops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionPatch {
    pub section_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub insight_ids_to_add: Vec<String>,
    #[serde(default)]
    pub insight_ids_to_remove: Vec<String>,
    /// Keys merged into the section's metadata map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

impl SectionPatch {
    /// A patch that names an ID but changes nothing is a caller mistake.
    pub fn is_noop(&self) -> bool {
        self.title.is_none()
            && self.order.is_none()
            && self.notes.is_none()
            && self.content.is_none()
            && self.insight_ids_to_add.is_empty()
            && self.insight_ids_to_remove.is_empty()
            && self.metadata.is_none()
    }
}

/// Partial update of one insight, identified strictly by ID.
/// `supporting_queries`, when present, replaces the whole citation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightPatch {
    pub insight_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InsightStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supporting_queries: Option<Vec<SupportingQuery>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_changes: Option<serde_json::Value>,
}

impl InsightPatch {
    pub fn is_noop(&self) -> bool {
        self.summary.is_none()
            && self.importance.is_none()
            && self.status.is_none()
            && self.supporting_queries.is_none()
            && self.draft_changes.is_none()
    }
}

// ============================================================================
// Validation records
// ============================================================================

/// One structured reason a change-set was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Which instruction/field is at fault, e.g. `modify_sections.section_id`.
    pub field: String,
    /// The offending value as supplied.
    pub value: String,
    pub reason: String,
    /// IDs that would have been accepted in this position, when enumerable.
    #[serde(default)]
    pub valid_ids: Vec<String>,
}

impl ValidationIssue {
    pub fn new(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
            valid_ids: Vec::new(),
        }
    }

    pub fn with_valid_ids(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.valid_ids = ids.into_iter().collect();
        self
    }
}

/// A change-set was rejected before any mutation; every violation is listed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("change-set rejected: {}", render_issues(.issues))]
pub struct ChangeError {
    pub issues: Vec<ValidationIssue>,
}

fn render_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{} = {:?}: {}", i.field, i.value, i.reason))
        .collect::<Vec<_>>()
        .join("; ")
}
