//! The change-application engine.
//!
//! `apply_change_set` is a pure transformation `(outline, change_set,
//! policy) → (outline, warnings)`. It runs a full validation pass first and
//! only mutates a clone once the whole change-set is known to be valid, so
//! a rejected change-set leaves no trace: all-or-nothing.
//!
//! Validation collects *every* violation, not just the first, and each
//! [`ValidationIssue`] carries the IDs that would have been valid so an
//! agent caller can repair its request in one step.

use crate::changes::{ChangeError, ChangeSet, InsightDraft, ValidationIssue};
use crate::outline::{Insight, Outline, Section};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

// ============================================================================
// Policy
// ============================================================================

/// Which document templates demand that every added-or-modified insight
/// carries at least one citation with a non-empty execution reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationPolicy {
    pub required_templates: BTreeSet<String>,
}

impl Default for CitationPolicy {
    fn default() -> Self {
        Self {
            required_templates: ["deep_research", "due_diligence"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl CitationPolicy {
    /// Policy that never requires citations, for free-form templates.
    pub fn disabled() -> Self {
        Self {
            required_templates: BTreeSet::new(),
        }
    }

    pub fn applies_to(&self, outline: &Outline) -> bool {
        outline
            .template()
            .is_some_and(|t| self.required_templates.contains(t))
    }
}

/// Result of a successful application: the new outline plus non-fatal
/// quality diagnostics (orphaned insights, empty sections).
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub outline: Outline,
    pub warnings: Vec<String>,
}

// ============================================================================
// Engine
// ============================================================================

pub fn apply_change_set(
    current: &Outline,
    changes: &ChangeSet,
    policy: &CitationPolicy,
) -> Result<ApplyOutcome, ChangeError> {
    let issues = validate(current, changes, policy);
    if !issues.is_empty() {
        return Err(ChangeError { issues });
    }

    let mut next = current.clone();
    mutate(&mut next, changes);

    // The validation pass is supposed to make this unreachable; surface any
    // hole as a rejection rather than persisting a broken document.
    let residual = next.integrity_errors();
    if !residual.is_empty() {
        return Err(ChangeError {
            issues: residual
                .into_iter()
                .map(|e| ValidationIssue::new("change_set", "", e.to_string()))
                .collect(),
        });
    }

    let warnings = next.quality_warnings();
    Ok(ApplyOutcome {
        outline: next,
        warnings,
    })
}

// ============================================================================
// Validation pass
// ============================================================================

fn validate(
    current: &Outline,
    changes: &ChangeSet,
    policy: &CitationPolicy,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if changes.is_empty() {
        issues.push(ValidationIssue::new(
            "change_set",
            "",
            "no instructions supplied",
        ));
        return issues;
    }

    let citations_required = policy.applies_to(current);

    let current_section_ids: BTreeSet<String> = current
        .sections
        .iter()
        .map(|s| s.section_id.clone())
        .collect();
    let current_insight_ids: BTreeSet<String> = current
        .insights
        .iter()
        .map(|i| i.insight_id.clone())
        .collect();
    let removed_sections: BTreeSet<&str> =
        changes.remove_sections.iter().map(String::as_str).collect();
    let removed_insights: BTreeSet<&str> =
        changes.remove_insights.iter().map(String::as_str).collect();

    // Caller-supplied IDs of insights being added anywhere in this
    // change-set (top-level adds and inline section adds). Generated IDs
    // cannot be referenced by other instructions, so they are not tracked.
    let mut added_insight_ids: BTreeSet<String> = BTreeSet::new();
    let mut added_section_ids: BTreeSet<String> = BTreeSet::new();

    // ------------------------------------------------------------------
    // Insight adds
    // ------------------------------------------------------------------
    for (idx, draft) in changes.add_insights.iter().enumerate() {
        let field = format!("add_insights[{idx}]");
        validate_insight_draft(draft, &field, citations_required, &mut issues);
        if let Some(id) = &draft.insight_id {
            if current_insight_ids.contains(id) || !added_insight_ids.insert(id.clone()) {
                issues.push(ValidationIssue::new(
                    format!("{field}.insight_id"),
                    id.clone(),
                    "insight id already exists",
                ));
            }
        }
    }

    // ------------------------------------------------------------------
    // Section adds
    // ------------------------------------------------------------------
    for (idx, draft) in changes.add_sections.iter().enumerate() {
        let field = format!("add_sections[{idx}]");
        if draft.title.trim().is_empty() {
            issues.push(ValidationIssue::new(
                format!("{field}.title"),
                draft.title.clone(),
                "section title must be non-empty",
            ));
        }
        if let Some(id) = &draft.section_id {
            if current_section_ids.contains(id) || !added_section_ids.insert(id.clone()) {
                issues.push(ValidationIssue::new(
                    format!("{field}.section_id"),
                    id.clone(),
                    "section id already exists",
                ));
            }
        }
        if !draft.insight_ids.is_empty() && !draft.new_insights.is_empty() {
            issues.push(ValidationIssue::new(
                field.clone(),
                draft.title.clone(),
                "insight_ids and new_insights are mutually exclusive; link existing \
                 insights or inline new ones, not both",
            ));
        }
        for (j, inline) in draft.new_insights.iter().enumerate() {
            let inline_field = format!("{field}.new_insights[{j}]");
            validate_insight_draft(inline, &inline_field, citations_required, &mut issues);
            if let Some(id) = &inline.insight_id {
                if current_insight_ids.contains(id) || !added_insight_ids.insert(id.clone()) {
                    issues.push(ValidationIssue::new(
                        format!("{inline_field}.insight_id"),
                        id.clone(),
                        "insight id already exists",
                    ));
                }
            }
        }
        for id in &draft.insight_ids {
            check_linkable_insight(
                id,
                &format!("{field}.insight_ids"),
                &current_insight_ids,
                &added_insight_ids,
                &removed_insights,
                &mut issues,
            );
        }
    }

    // ------------------------------------------------------------------
    // Section modifies
    // ------------------------------------------------------------------
    let mut patched_sections: BTreeSet<&str> = BTreeSet::new();
    for (idx, patch) in changes.modify_sections.iter().enumerate() {
        let field = format!("modify_sections[{idx}]");
        if !patched_sections.insert(patch.section_id.as_str()) {
            issues.push(ValidationIssue::new(
                format!("{field}.section_id"),
                patch.section_id.clone(),
                "section is modified more than once in this change-set",
            ));
            continue;
        }
        let known = current_section_ids.contains(&patch.section_id)
            || added_section_ids.contains(&patch.section_id);
        if !known {
            issues.push(
                ValidationIssue::new(
                    format!("{field}.section_id"),
                    patch.section_id.clone(),
                    "unknown section",
                )
                .with_valid_ids(current_section_ids.iter().cloned()),
            );
            continue;
        }
        if removed_sections.contains(patch.section_id.as_str()) {
            issues.push(ValidationIssue::new(
                format!("{field}.section_id"),
                patch.section_id.clone(),
                "section is also being removed in this change-set",
            ));
        }
        if patch.is_noop() {
            issues.push(ValidationIssue::new(
                field.clone(),
                patch.section_id.clone(),
                "patch supplies no fields to change",
            ));
        }
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            issues.push(ValidationIssue::new(
                format!("{field}.title"),
                patch.title.clone().unwrap_or_default(),
                "section title must be non-empty",
            ));
        }
        for id in &patch.insight_ids_to_add {
            check_linkable_insight(
                id,
                &format!("{field}.insight_ids_to_add"),
                &current_insight_ids,
                &added_insight_ids,
                &removed_insights,
                &mut issues,
            );
        }
        // insight_ids_to_remove is set-like; absent IDs are a no-op.
    }

    // ------------------------------------------------------------------
    // Insight modifies
    // ------------------------------------------------------------------
    let mut patched_insights: BTreeSet<&str> = BTreeSet::new();
    for (idx, patch) in changes.modify_insights.iter().enumerate() {
        let field = format!("modify_insights[{idx}]");
        if !patched_insights.insert(patch.insight_id.as_str()) {
            issues.push(ValidationIssue::new(
                format!("{field}.insight_id"),
                patch.insight_id.clone(),
                "insight is modified more than once in this change-set",
            ));
            continue;
        }
        let known = current_insight_ids.contains(&patch.insight_id)
            || added_insight_ids.contains(&patch.insight_id);
        if !known {
            issues.push(
                ValidationIssue::new(
                    format!("{field}.insight_id"),
                    patch.insight_id.clone(),
                    "unknown insight",
                )
                .with_valid_ids(current_insight_ids.iter().cloned()),
            );
            continue;
        }
        if removed_insights.contains(patch.insight_id.as_str()) {
            issues.push(ValidationIssue::new(
                format!("{field}.insight_id"),
                patch.insight_id.clone(),
                "insight is also being removed in this change-set",
            ));
        }
        if patch.is_noop() {
            issues.push(ValidationIssue::new(
                field.clone(),
                patch.insight_id.clone(),
                "patch supplies no fields to change",
            ));
        }
        if patch.summary.as_deref().is_some_and(|s| s.trim().is_empty()) {
            issues.push(ValidationIssue::new(
                format!("{field}.summary"),
                patch.summary.clone().unwrap_or_default(),
                "insight summary must be non-empty",
            ));
        }
        if let Some(importance) = patch.importance {
            if importance > 10 {
                issues.push(ValidationIssue::new(
                    format!("{field}.importance"),
                    importance.to_string(),
                    "importance must be within 0..=10",
                ));
            }
        }
        if citations_required {
            // The insight as it will exist after the patch must be cited:
            // a replacement citation list is checked directly, otherwise the
            // existing citations must already qualify.
            let cited = match &patch.supporting_queries {
                Some(queries) => queries.iter().any(|q| q.has_reference()),
                None => current
                    .insight(&patch.insight_id)
                    .map(Insight::has_citation)
                    .unwrap_or(true), // target was added in this change-set; the add already checked
            };
            if !cited {
                issues.push(ValidationIssue::new(
                    format!("{field}.supporting_queries"),
                    patch.insight_id.clone(),
                    "this template requires every modified insight to carry at least \
                     one citation with a non-empty execution reference",
                ));
            }
        }
    }

    // ------------------------------------------------------------------
    // Removes
    // ------------------------------------------------------------------
    for id in &removed_sections {
        if !current_section_ids.contains(*id) {
            issues.push(
                ValidationIssue::new("remove_sections", *id, "unknown section")
                    .with_valid_ids(current_section_ids.iter().cloned()),
            );
        }
    }
    for id in &removed_insights {
        if !current_insight_ids.contains(*id) {
            issues.push(
                ValidationIssue::new("remove_insights", *id, "unknown insight")
                    .with_valid_ids(current_insight_ids.iter().cloned()),
            );
        }
    }

    issues
}

fn validate_insight_draft(
    draft: &InsightDraft,
    field: &str,
    citations_required: bool,
    issues: &mut Vec<ValidationIssue>,
) {
    if draft.summary.trim().is_empty() {
        issues.push(ValidationIssue::new(
            format!("{field}.summary"),
            draft.summary.clone(),
            "insight summary must be non-empty",
        ));
    }
    if draft.importance > 10 {
        issues.push(ValidationIssue::new(
            format!("{field}.importance"),
            draft.importance.to_string(),
            "importance must be within 0..=10",
        ));
    }
    if citations_required && !draft.supporting_queries.iter().any(|q| q.has_reference()) {
        issues.push(ValidationIssue::new(
            format!("{field}.supporting_queries"),
            draft.insight_id.clone().unwrap_or_default(),
            "this template requires every added insight to carry at least one \
             citation with a non-empty execution reference",
        ));
    }
}

fn check_linkable_insight(
    id: &str,
    field: &str,
    current: &BTreeSet<String>,
    added: &BTreeSet<String>,
    removed: &BTreeSet<&str>,
    issues: &mut Vec<ValidationIssue>,
) {
    if removed.contains(id) {
        issues.push(ValidationIssue::new(
            field,
            id,
            "insight is being removed in this change-set",
        ));
    } else if !current.contains(id) && !added.contains(id) {
        issues.push(
            ValidationIssue::new(field, id, "unknown insight").with_valid_ids(
                current.iter().cloned().chain(added.iter().cloned()),
            ),
        );
    }
}

// ============================================================================
// Mutation pass (runs only on a fully-validated change-set)
// ============================================================================

fn mutate(next: &mut Outline, changes: &ChangeSet) {
    // Insight adds first so section adds and patches can link them.
    for draft in &changes.add_insights {
        let insight = realize_insight(draft);
        next.insights.push(insight);
    }

    for draft in &changes.add_sections {
        let mut linked = draft.insight_ids.clone();
        for inline in &draft.new_insights {
            let insight = realize_insight(inline);
            linked.push(insight.insight_id.clone());
            next.insights.push(insight);
        }
        let order = draft.order.unwrap_or_else(|| next.next_order());
        next.sections.push(Section {
            section_id: draft
                .section_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            title: draft.title.clone(),
            order,
            insight_ids: linked,
            notes: draft.notes.clone(),
            content: draft.content.clone(),
            metadata: draft.metadata.clone(),
        });
    }

    for patch in &changes.modify_insights {
        if let Some(insight) = next
            .insights
            .iter_mut()
            .find(|i| i.insight_id == patch.insight_id)
        {
            if let Some(summary) = &patch.summary {
                insight.summary = summary.clone();
            }
            if let Some(importance) = patch.importance {
                insight.importance = importance;
            }
            if let Some(status) = patch.status {
                insight.status = status;
            }
            if let Some(queries) = &patch.supporting_queries {
                insight.supporting_queries = queries.clone();
            }
            if let Some(draft_changes) = &patch.draft_changes {
                insight.draft_changes = Some(draft_changes.clone());
            }
        }
    }

    for patch in &changes.modify_sections {
        if let Some(section) = next
            .sections
            .iter_mut()
            .find(|s| s.section_id == patch.section_id)
        {
            if let Some(title) = &patch.title {
                section.title = title.clone();
            }
            if let Some(order) = patch.order {
                section.order = order;
            }
            if let Some(notes) = &patch.notes {
                section.notes = Some(notes.clone());
            }
            if let Some(content) = &patch.content {
                section.content = Some(content.clone());
            }
            for id in &patch.insight_ids_to_add {
                if !section.insight_ids.contains(id) {
                    section.insight_ids.push(id.clone());
                }
            }
            if !patch.insight_ids_to_remove.is_empty() {
                let drop: BTreeSet<&str> = patch
                    .insight_ids_to_remove
                    .iter()
                    .map(String::as_str)
                    .collect();
                section.insight_ids.retain(|id| !drop.contains(id.as_str()));
            }
            if let Some(metadata) = &patch.metadata {
                for (key, value) in metadata {
                    section.metadata.insert(key.clone(), value.clone());
                }
            }
        }
    }

    if !changes.remove_insights.is_empty() {
        let drop: BTreeSet<&str> = changes.remove_insights.iter().map(String::as_str).collect();
        next.insights.retain(|i| !drop.contains(i.insight_id.as_str()));
        // Referential cleanup: a removed insight never leaves a dangling ID
        // behind in any section.
        for section in &mut next.sections {
            section.insight_ids.retain(|id| !drop.contains(id.as_str()));
        }
    }

    if !changes.remove_sections.is_empty() {
        let drop: BTreeSet<&str> = changes.remove_sections.iter().map(String::as_str).collect();
        next.sections.retain(|s| !drop.contains(s.section_id.as_str()));
    }
}

fn realize_insight(draft: &InsightDraft) -> Insight {
    Insight {
        insight_id: draft
            .insight_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        importance: draft.importance,
        status: draft.status,
        summary: draft.summary.clone(),
        supporting_queries: draft.supporting_queries.clone(),
        draft_changes: None,
    }
}

// ============================================================================
// Tests
// ============================================================================
