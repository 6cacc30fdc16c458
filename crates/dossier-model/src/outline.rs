//! The report document: an [`Outline`] holding ordered sections and the flat
//! arena of insights they reference by ID.
//!
//! Sections never own insights: they hold ID lists into
//! `Outline::insights`, so one insight can back several sections. Hard
//! structural rules (every referenced ID exists, importance in range) are
//! enforced by [`Outline::integrity_errors`]; softer quality rules
//! (orphaned insights, empty sections) surface as warnings via
//! [`Outline::quality_warnings`] and never block a write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use uuid::Uuid;

/// Schema tag written into every persisted outline.
pub const OUTLINE_SCHEMA_VERSION: &str = "1.0";

/// Metadata keys with engine-level meaning. Everything else in
/// `Outline::metadata` is free-form caller state.
pub mod meta {
    pub const TAGS: &str = "tags";
    pub const STATUS: &str = "status";
    pub const TEMPLATE: &str = "template";
    pub const FORKED_FROM: &str = "forked_from";
    pub const FORKED_AT: &str = "forked_at";
    pub const SYNTHESIZED_FROM: &str = "synthesized_from";
}

// ============================================================================
// Value types
// ============================================================================

/// A dataset-source reference used as a citation on an insight.
///
/// The engine stores and validates the *reference*; resolving it to rows is
/// the query-execution backend's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportingQuery {
    /// Execution identifier in the query backend.
    pub execution_id: String,
    /// Content hash of the query, when the backend is content-addressed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Dataset the query ran against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    /// Free-form caller note ("supports the churn claim").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl SupportingQuery {
    /// A citation counts only if it actually points at an execution.
    pub fn has_reference(&self) -> bool {
        !self.execution_id.trim().is_empty()
            || self
                .content_hash
                .as_deref()
                .is_some_and(|h| !h.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightStatus {
    #[default]
    Active,
    Archived,
    Killed,
}

/// A cited, importance-ranked finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub insight_id: String,
    /// 0–10 inclusive; 10 is "lead finding".
    pub importance: u8,
    #[serde(default)]
    pub status: InsightStatus,
    pub summary: String,
    #[serde(default)]
    pub supporting_queries: Vec<SupportingQuery>,
    /// Pending edits proposed but not yet merged into the summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_changes: Option<serde_json::Value>,
}

impl Insight {
    pub fn new(summary: impl Into<String>, importance: u8) -> Self {
        Self {
            insight_id: Uuid::new_v4().to_string(),
            importance,
            status: InsightStatus::Active,
            summary: summary.into(),
            supporting_queries: Vec::new(),
            draft_changes: None,
        }
    }

    pub fn has_citation(&self) -> bool {
        self.supporting_queries.iter().any(|q| q.has_reference())
    }
}

/// An ordered slot in the report holding references into the insight arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub section_id: String,
    pub title: String,
    /// Display position; validation flags duplicates but the model does not
    /// forbid them.
    pub order: u32,
    #[serde(default)]
    pub insight_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Section {
    pub fn new(title: impl Into<String>, order: u32) -> Self {
        Self {
            section_id: Uuid::new_v4().to_string(),
            title: title.into(),
            order,
            insight_ids: Vec::new(),
            notes: None,
            content: None,
            metadata: BTreeMap::new(),
        }
    }
}

/// The authoritative document for one report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    pub report_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Schema tag, see [`OUTLINE_SCHEMA_VERSION`].
    pub version: String,
    /// Monotonic counter starting at 1, compared for optimistic locking.
    pub outline_version: u64,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub insights: Vec<Insight>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

// ============================================================================
// Validation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutlineError {
    #[error("section {section_id} references unknown insight {insight_id}")]
    DanglingInsightRef {
        section_id: String,
        insight_id: String,
    },
    #[error("duplicate section id {0}")]
    DuplicateSectionId(String),
    #[error("duplicate insight id {0}")]
    DuplicateInsightId(String),
    #[error("section {0} has an empty title")]
    EmptySectionTitle(String),
    #[error("insight {0} has an empty summary")]
    EmptyInsightSummary(String),
    #[error("insight {0} importance {1} is outside 0..=10")]
    ImportanceOutOfRange(String, u8),
    #[error("outline title is empty")]
    EmptyTitle,
    #[error("outline_version must be >= 1 (found {0})")]
    BadOutlineVersion(u64),
}

impl Outline {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            report_id: Uuid::new_v4().to_string(),
            title: title.into(),
            created_at: now,
            updated_at: now,
            version: OUTLINE_SCHEMA_VERSION.to_string(),
            outline_version: 1,
            sections: Vec::new(),
            insights: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn section(&self, section_id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.section_id == section_id)
    }

    pub fn insight(&self, insight_id: &str) -> Option<&Insight> {
        self.insights.iter().find(|i| i.insight_id == insight_id)
    }

    pub fn insight_id_set(&self) -> BTreeSet<&str> {
        self.insights.iter().map(|i| i.insight_id.as_str()).collect()
    }

    /// Tags from `metadata.tags`, tolerating absent or non-array values.
    pub fn tags(&self) -> Vec<String> {
        self.metadata
            .get(meta::TAGS)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn template(&self) -> Option<&str> {
        self.metadata.get(meta::TEMPLATE).and_then(|v| v.as_str())
    }

    pub fn is_archived(&self) -> bool {
        self.metadata
            .get(meta::STATUS)
            .and_then(|v| v.as_str())
            .is_some_and(|s| s == "archived")
    }

    /// Hard structural violations. An outline with any of these must never
    /// be persisted, and one loaded with them is treated as corrupt.
    pub fn integrity_errors(&self) -> Vec<OutlineError> {
        let mut errors = Vec::new();

        if self.title.trim().is_empty() {
            errors.push(OutlineError::EmptyTitle);
        }
        if self.outline_version == 0 {
            errors.push(OutlineError::BadOutlineVersion(self.outline_version));
        }

        let mut section_ids = BTreeSet::new();
        for section in &self.sections {
            if !section_ids.insert(section.section_id.as_str()) {
                errors.push(OutlineError::DuplicateSectionId(
                    section.section_id.clone(),
                ));
            }
            if section.title.trim().is_empty() {
                errors.push(OutlineError::EmptySectionTitle(section.section_id.clone()));
            }
        }

        let mut insight_ids = BTreeSet::new();
        for insight in &self.insights {
            if !insight_ids.insert(insight.insight_id.as_str()) {
                errors.push(OutlineError::DuplicateInsightId(
                    insight.insight_id.clone(),
                ));
            }
            if insight.summary.trim().is_empty() {
                errors.push(OutlineError::EmptyInsightSummary(
                    insight.insight_id.clone(),
                ));
            }
            if insight.importance > 10 {
                errors.push(OutlineError::ImportanceOutOfRange(
                    insight.insight_id.clone(),
                    insight.importance,
                ));
            }
        }

        for section in &self.sections {
            for insight_id in &section.insight_ids {
                if !insight_ids.contains(insight_id.as_str()) {
                    errors.push(OutlineError::DanglingInsightRef {
                        section_id: section.section_id.clone(),
                        insight_id: insight_id.clone(),
                    });
                }
            }
        }

        errors
    }

    /// Soft diagnostics surfaced to callers as warnings, never enforced at
    /// write time.
    pub fn quality_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let referenced: BTreeSet<&str> = self
            .sections
            .iter()
            .flat_map(|s| s.insight_ids.iter().map(String::as_str))
            .collect();
        for insight in &self.insights {
            if !referenced.contains(insight.insight_id.as_str()) {
                warnings.push(format!(
                    "insight {} (\"{}\") is not referenced by any section",
                    insight.insight_id,
                    truncate(&insight.summary, 48)
                ));
            }
        }

        for section in &self.sections {
            if section.insight_ids.is_empty() {
                warnings.push(format!(
                    "section {} (\"{}\") has no linked insights",
                    section.section_id, section.title
                ));
            }
        }

        let mut orders = BTreeSet::new();
        for section in &self.sections {
            if !orders.insert(section.order) {
                warnings.push(format!(
                    "section order {} is used more than once",
                    section.order
                ));
            }
        }

        warnings
    }

    /// Next free display position for an appended section.
    pub fn next_order(&self) -> u32 {
        self.sections
            .iter()
            .map(|s| s.order + 1)
            .max()
            .unwrap_or(0)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}…")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn outline_with_section_and_insight() -> Outline {
        let mut outline = Outline::new("Q1 Review");
        let insight = Insight::new("Churn doubled in March", 8);
        let mut section = Section::new("Findings", 0);
        section.insight_ids.push(insight.insight_id.clone());
        outline.insights.push(insight);
        outline.sections.push(section);
        outline
    }

    #[test]
    fn test_valid_outline_has_no_integrity_errors() {
        let outline = outline_with_section_and_insight();
        assert!(outline.integrity_errors().is_empty());
        assert!(outline.quality_warnings().is_empty());
    }

    #[test]
    fn test_dangling_insight_ref_is_an_integrity_error() {
        let mut outline = outline_with_section_and_insight();
        outline.sections[0]
            .insight_ids
            .push("no-such-insight".to_string());
        let errors = outline.integrity_errors();
        assert!(errors.iter().any(|e| matches!(
            e,
            OutlineError::DanglingInsightRef { insight_id, .. } if insight_id == "no-such-insight"
        )));
    }

    #[test]
    fn test_all_violations_are_reported_not_just_the_first() {
        let mut outline = outline_with_section_and_insight();
        outline.title = "  ".to_string();
        outline.insights[0].importance = 11;
        outline.sections[0].title = String::new();
        let errors = outline.integrity_errors();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_orphans_and_empty_sections_are_warnings() {
        let mut outline = outline_with_section_and_insight();
        outline.insights.push(Insight::new("Unreferenced", 3));
        outline.sections.push(Section::new("Empty", 1));
        assert!(outline.integrity_errors().is_empty());
        let warnings = outline.quality_warnings();
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_citation_requires_non_empty_reference() {
        let mut insight = Insight::new("Claim", 5);
        insight.supporting_queries.push(SupportingQuery {
            execution_id: "  ".to_string(),
            content_hash: None,
            dataset: None,
            note: None,
        });
        assert!(!insight.has_citation());
        insight.supporting_queries[0].content_hash = Some("abc123".to_string());
        assert!(insight.has_citation());
    }

    #[test]
    fn test_outline_roundtrips_through_json() {
        let outline = outline_with_section_and_insight();
        let json = serde_json::to_string(&outline).unwrap();
        let back: Outline = serde_json::from_str(&json).unwrap();
        assert_eq!(outline, back);
    }

    #[test]
    fn test_next_order_appends_after_the_highest() {
        let mut outline = outline_with_section_and_insight();
        assert_eq!(outline.next_order(), 1);
        outline.sections.push(Section::new("Later", 7));
        assert_eq!(outline.next_order(), 8);
    }
}
