//! Dossier document model
//!
//! This crate defines the value types for one analytical report, the
//! [`Outline`] aggregate with its sections and cited insights, plus the
//! pure change-application engine that turns a proposed [`ChangeSet`] into
//! a new, referentially-valid document.
//!
//! Nothing in this crate touches the filesystem. Persistence, locking and
//! the optimistic-concurrency protocol live in `dossier-store`; this crate
//! is the part both the store and external callers (agents, tool dispatch)
//! agree on.

pub mod apply;
pub mod audit;
pub mod catalog;
pub mod changes;
pub mod diff;
pub mod outline;

pub use apply::{apply_change_set, ApplyOutcome, CitationPolicy};
pub use audit::{ActionType, Actor, AuditEvent};
pub use catalog::{IndexEntry, ReportStatus};
pub use changes::{
    ChangeError, ChangeSet, InsightDraft, InsightPatch, SectionDraft, SectionPatch,
    ValidationIssue,
};
pub use diff::{diff_outlines, OutlineDiff};
pub use outline::{Insight, InsightStatus, Outline, OutlineError, Section, SupportingQuery};
