//! Structural diff between two outline versions.
//!
//! The update protocol embeds this in every `evolve` audit payload so the
//! trail records *which* IDs each write touched, not just that a write
//! happened.

use crate::outline::Outline;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineDiff {
    #[serde(default)]
    pub sections_added: Vec<String>,
    #[serde(default)]
    pub sections_modified: Vec<String>,
    #[serde(default)]
    pub sections_removed: Vec<String>,
    #[serde(default)]
    pub insights_added: Vec<String>,
    #[serde(default)]
    pub insights_modified: Vec<String>,
    #[serde(default)]
    pub insights_removed: Vec<String>,
}

impl OutlineDiff {
    pub fn is_empty(&self) -> bool {
        self.sections_added.is_empty()
            && self.sections_modified.is_empty()
            && self.sections_removed.is_empty()
            && self.insights_added.is_empty()
            && self.insights_modified.is_empty()
            && self.insights_removed.is_empty()
    }

    pub fn total_changes(&self) -> usize {
        self.sections_added.len()
            + self.sections_modified.len()
            + self.sections_removed.len()
            + self.insights_added.len()
            + self.insights_modified.len()
            + self.insights_removed.len()
    }
}

/// Compare two outlines by ID. "Modified" means present in both with any
/// serialized field difference.
pub fn diff_outlines(before: &Outline, after: &Outline) -> OutlineDiff {
    let mut diff = OutlineDiff::default();

    let before_sections: BTreeMap<&str, serde_json::Value> = before
        .sections
        .iter()
        .map(|s| (s.section_id.as_str(), serde_json::to_value(s).unwrap_or_default()))
        .collect();
    let after_sections: BTreeMap<&str, serde_json::Value> = after
        .sections
        .iter()
        .map(|s| (s.section_id.as_str(), serde_json::to_value(s).unwrap_or_default()))
        .collect();

    for (id, value) in &after_sections {
        match before_sections.get(id) {
            None => diff.sections_added.push((*id).to_string()),
            Some(old) if old != value => diff.sections_modified.push((*id).to_string()),
            Some(_) => {}
        }
    }
    for id in before_sections.keys() {
        if !after_sections.contains_key(id) {
            diff.sections_removed.push((*id).to_string());
        }
    }

    let before_insights: BTreeMap<&str, serde_json::Value> = before
        .insights
        .iter()
        .map(|i| (i.insight_id.as_str(), serde_json::to_value(i).unwrap_or_default()))
        .collect();
    let after_insights: BTreeMap<&str, serde_json::Value> = after
        .insights
        .iter()
        .map(|i| (i.insight_id.as_str(), serde_json::to_value(i).unwrap_or_default()))
        .collect();

    for (id, value) in &after_insights {
        match before_insights.get(id) {
            None => diff.insights_added.push((*id).to_string()),
            Some(old) if old != value => diff.insights_modified.push((*id).to_string()),
            Some(_) => {}
        }
    }
    for id in before_insights.keys() {
        if !after_insights.contains_key(id) {
            diff.insights_removed.push((*id).to_string());
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outline::{Insight, Section};

    #[test]
    fn test_identical_outlines_produce_empty_diff() {
        let outline = Outline::new("Same");
        let diff = diff_outlines(&outline, &outline.clone());
        assert!(diff.is_empty());
    }

    #[test]
    fn test_add_modify_remove_are_all_detected() {
        let mut before = Outline::new("Before");
        let kept = Insight::new("Kept but edited", 5);
        let dropped = Insight::new("Dropped", 2);
        before.insights.push(kept.clone());
        before.insights.push(dropped.clone());
        before.sections.push(Section::new("Old section", 0));

        let mut after = before.clone();
        after.insights.retain(|i| i.insight_id != dropped.insight_id);
        after.insights[0].importance = 9;
        after.sections.clear();
        let new_section = Section::new("New section", 0);
        after.sections.push(new_section.clone());
        let new_insight = Insight::new("Fresh", 7);
        after.insights.push(new_insight.clone());

        let diff = diff_outlines(&before, &after);
        assert_eq!(diff.sections_added, vec![new_section.section_id]);
        assert_eq!(
            diff.sections_removed,
            vec![before.sections[0].section_id.clone()]
        );
        assert_eq!(diff.insights_added, vec![new_insight.insight_id]);
        assert_eq!(diff.insights_modified, vec![kept.insight_id]);
        assert_eq!(diff.insights_removed, vec![dropped.insight_id]);
        assert_eq!(diff.total_changes(), 5);
    }
}
