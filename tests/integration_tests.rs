//! Integration tests for the complete dossier pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Change sets → apply → persisted outline + audit trail
//! - Concurrent writers → version conflict → retry
//! - Backups → revert → restored content
//! - Fork → independent evolution
//!
//! Run with: cargo test --test integration_tests

use dossier_model::{
    ActionType, Actor, ChangeSet, InsightDraft, InsightStatus, SectionDraft, SupportingQuery,
};
use dossier_store::{ActionContext, EngineConfig, ReportEngine, StoreError};
use tempfile::tempdir;

fn open_engine(root: &std::path::Path) -> ReportEngine {
    ReportEngine::open(EngineConfig::new(root)).unwrap()
}

fn findings_change_set() -> ChangeSet {
    ChangeSet {
        add_sections: vec![SectionDraft {
            section_id: None,
            title: "Key Findings".to_string(),
            order: None,
            insight_ids: vec![],
            new_insights: vec![InsightDraft {
                insight_id: None,
                summary: "Churn doubled quarter over quarter".to_string(),
                importance: 9,
                status: InsightStatus::Active,
                supporting_queries: vec![SupportingQuery {
                    execution_id: "exec-42".to_string(),
                    content_hash: None,
                    dataset: Some("warehouse.churn".to_string()),
                    note: None,
                }],
            }],
            notes: None,
            content: None,
            metadata: Default::default(),
        }],
        ..Default::default()
    }
}

// ============================================================================
// Full report lifecycle: create → evolve → conflict → revert
// ============================================================================

#[test]
fn test_report_lifecycle_with_conflicting_writers_and_revert() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());
    let agent = ActionContext::new(Actor::Agent).with_request_id("agent-1");

    // Create: version 1, empty outline, indexed under its title.
    let report = engine.create("Q1 Review", None, vec![], &agent).unwrap();
    assert_eq!(report.outline_version, 1);
    assert!(report.sections.is_empty());

    // First writer read version 1 and commits against it.
    let outcome = engine
        .evolve(&report.report_id, &findings_change_set(), Some(1), &agent)
        .unwrap();
    assert_eq!(outcome.outline.outline_version, 2);
    assert_eq!(outcome.outline.sections.len(), 1);
    assert_eq!(outcome.outline.insights.len(), 1);

    // Second writer also read version 1; its commit must be rejected
    // without touching disk.
    let rival = ActionContext::new(Actor::Agent).with_request_id("agent-2");
    let err = engine
        .evolve(&report.report_id, &findings_change_set(), Some(1), &rival)
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::VersionConflict {
            expected: 1,
            actual: 2
        }
    ));
    assert!(err.is_retryable());
    assert_eq!(engine.get(&report.report_id).unwrap().outline_version, 2);

    // After a re-read the rival's retry succeeds.
    let retried = engine
        .evolve(&report.report_id, &findings_change_set(), Some(2), &rival)
        .unwrap();
    assert_eq!(retried.outline.outline_version, 3);

    // Revert the first evolve: back to the empty post-create outline,
    // with the version counter still moving forward.
    let history = engine.history(&report.report_id).unwrap();
    let first_evolve = history
        .iter()
        .find(|e| e.action_type == ActionType::Evolve)
        .unwrap();
    let reverted = engine
        .revert(&report.report_id, &first_evolve.action_id, &agent)
        .unwrap();
    assert!(reverted.sections.is_empty());
    assert!(reverted.insights.is_empty());
    assert_eq!(reverted.outline_version, 4);

    // The trail tells the whole story, failed attempt excluded.
    let kinds: Vec<ActionType> = engine
        .history(&report.report_id)
        .unwrap()
        .iter()
        .map(|e| e.action_type)
        .collect();
    assert_eq!(
        kinds,
        vec![
            ActionType::Create,
            ActionType::Evolve,
            ActionType::Evolve,
            ActionType::Revert
        ]
    );
}

// ============================================================================
// Fork: shared history, independent futures
// ============================================================================

#[test]
fn test_forked_reports_evolve_independently() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());
    let human = ActionContext::new(Actor::Human);

    let original = engine.create("Market scan", None, vec![], &human).unwrap();
    engine
        .evolve(&original.report_id, &findings_change_set(), Some(1), &human)
        .unwrap();

    let fork = engine.fork(&original.report_id, &human).unwrap();
    assert_eq!(fork.outline_version, 1);
    assert_eq!(
        fork.metadata.get("forked_from").and_then(|v| v.as_str()),
        Some(original.report_id.as_str())
    );
    assert_eq!(fork.sections, engine.get(&original.report_id).unwrap().sections);

    // Diverge the fork; the original must not move.
    engine
        .evolve(&fork.report_id, &findings_change_set(), Some(1), &human)
        .unwrap();
    assert_eq!(engine.get(&original.report_id).unwrap().sections.len(), 1);
    assert_eq!(engine.get(&fork.report_id).unwrap().sections.len(), 2);

    // Both resolve independently through the catalog.
    assert_eq!(
        engine.resolve(&original.report_id, false).unwrap(),
        original.report_id
    );
    assert_eq!(engine.resolve(&fork.report_id, false).unwrap(), fork.report_id);
}

// ============================================================================
// Catalog recovery after index loss
// ============================================================================

#[test]
fn test_catalog_rebuild_restores_resolution_after_index_loss() {
    let dir = tempdir().unwrap();
    let report_id = {
        let engine = open_engine(dir.path());
        let ctx = ActionContext::new(Actor::Cli);
        let report = engine.create("Q1 Review", None, vec![], &ctx).unwrap();
        engine
            .evolve(&report.report_id, &findings_change_set(), Some(1), &ctx)
            .unwrap();
        report.report_id
    };

    std::fs::remove_file(dir.path().join("index.jsonl")).unwrap();

    let engine = open_engine(dir.path());
    assert!(engine.resolve("q1 review", false).is_err());
    assert_eq!(engine.index().rebuild_from_filesystem().unwrap(), 1);
    assert_eq!(engine.resolve("q1 review", false).unwrap(), report_id);

    // The rebuilt entry reflects the evolved outline, not the created one.
    let entry = engine.index().entry(&report_id).unwrap();
    assert_eq!(entry.current_title, "Q1 Review");
    assert!(entry.updated_at >= entry.created_at);
}
