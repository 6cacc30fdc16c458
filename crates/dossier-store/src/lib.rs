//! Dossier persistence layer
//!
//! Owns all bytes for a repository of reports and the concurrency rules
//! that keep concurrent writers from corrupting them:
//!
//! ```text
//! <root>/
//!   index.jsonl                       global catalog, one IndexEntry per line
//!   by_id/<report_id>/
//!     outline.json                    current document
//!     backups/<ts>-<seq>.json         point-in-time snapshots
//!     audit.log                       append-only JSONL audit trail
//!     LOCK                            per-report exclusive lock file
//!   .trash/<report_id>_<ts>/          deleted reports, audit log preserved
//! ```
//!
//! Correctness rests on two mechanisms: the per-report filesystem lock
//! (at most one `Locked → Persisted` cycle per report at a time) and the
//! optimistic `outline_version` check that rejects stale writers. Every
//! write is temp-file + fsync + atomic rename; every overwrite snapshots
//! the previous bytes first so any audit event can be reverted.

pub mod engine;
pub mod error;
pub mod fsio;
pub mod index;
pub mod lifecycle;
pub mod lock;
pub mod report_store;

pub use engine::{ActionContext, EngineConfig, EvolveOutcome, ReportEngine};
pub use error::{Result, StoreError};
pub use index::GlobalIndex;
pub use lock::ReportLock;
pub use report_store::{ReportStore, SaveReceipt};
