//! Error taxonomy for the persistence layer.
//!
//! `Corrupt` is deliberately distinct from `NotFound` so an operator can
//! tell "never existed" from "damaged on disk". `VersionConflict` is always
//! recoverable: reload, re-apply, retry. `Validation` is rejected before
//! any write and therefore never partially applied.

use dossier_model::ChangeError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("report not found: {0}")]
    ReportNotFound(String),

    #[error("audit action not found: {0}")]
    ActionNotFound(String),

    #[error("corrupt stored data at {path}: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    #[error("version conflict: expected outline_version {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error(transparent)]
    Validation(#[from] ChangeError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn corrupt(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Stale-writer conflicts are the one class callers should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}
