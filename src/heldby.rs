//! Held-by exclusion filter.
//!
//! Drops records whose primary holder carries a blocked reference code.
//! Blocked records are persisted to a side-channel store for manual review
//! and never reach the dedup/grouping stages. An empty `heldBy` sequence is
//! "no match": the record passes through untouched.

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::record::Record;

#[derive(Debug, Error)]
pub enum ExcludedStoreError {
    #[error("failed to persist excluded record: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize excluded record: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeldByDecision {
    Keep,
    Exclude,
}

#[derive(Debug, Default)]
pub struct HeldByFilter {
    blocked_reference_code: Option<String>,
}

impl HeldByFilter {
    pub fn new(blocked_reference_code: Option<String>) -> Self {
        Self {
            blocked_reference_code,
        }
    }

    pub fn decide(&self, record: &Record) -> HeldByDecision {
        let Some(blocked) = &self.blocked_reference_code else {
            return HeldByDecision::Keep;
        };
        match record.held_by.first() {
            Some(holder) if holder.reference_code == *blocked => HeldByDecision::Exclude,
            _ => HeldByDecision::Keep,
        }
    }
}

/// Side channel for records dropped by the held-by filter.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait ExcludedStore: Send + Sync {
    fn persist(&self, record: &Record) -> Result<(), ExcludedStoreError>;
}

/// Writes excluded records as `<dir>/<iaid>.json` (local execution modes).
pub struct FsExcludedStore {
    dir: PathBuf,
}

impl FsExcludedStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ExcludedStore for FsExcludedStore {
    fn persist(&self, record: &Record) -> Result<(), ExcludedStoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.json", record.iaid));
        let payload = serde_json::to_vec_pretty(&record.to_delivery_json())?;
        std::fs::write(&path, payload)?;
        info!(iaid = %record.iaid, path = %path.display(), "persisted excluded record");
        Ok(())
    }
}

/// Discards excluded records; used in cloud execution modes where the side
/// channel is unavailable.
pub struct NullExcludedStore;

impl ExcludedStore for NullExcludedStore {
    fn persist(&self, _record: &Record) -> Result<(), ExcludedStoreError> {
        Ok(())
    }
}
