//! Delivery sink: where packed archives, the aggregate bundle and the
//! manifest end up.
//!
//! The trait keeps the pipeline independent of the delivery target: a
//! filesystem sink for local runs, object-store clients in the invocation
//! wrapper, mocks in tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("delivery sink write failure: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Deliver one per-group archive. `level_dir` is the group's level
    /// folder name; sinks may flatten it.
    async fn put_archive(&self, name: &str, level_dir: &str, bytes: &[u8])
        -> Result<(), SinkError>;

    /// Deliver the aggregate bundle.
    async fn put_aggregate(&self, name: &str, bytes: &[u8]) -> Result<(), SinkError>;

    /// Deliver the run manifest.
    async fn put_manifest(&self, name: &str, bytes: &[u8]) -> Result<(), SinkError>;
}

/// Writes deliveries under a root directory, optionally one subfolder per
/// catalogue level.
pub struct FsSink {
    root: PathBuf,
    level_subfolders: bool,
}

impl FsSink {
    pub fn new(root: impl Into<PathBuf>, level_subfolders: bool) -> Self {
        Self {
            root: root.into(),
            level_subfolders,
        }
    }

    fn write(&self, dir: &Path, name: &str, bytes: &[u8]) -> Result<(), SinkError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(name);
        std::fs::write(&path, bytes)?;
        info!(path = %path.display(), bytes = bytes.len(), "delivered to filesystem sink");
        Ok(())
    }
}

#[async_trait]
impl DeliverySink for FsSink {
    async fn put_archive(
        &self,
        name: &str,
        level_dir: &str,
        bytes: &[u8],
    ) -> Result<(), SinkError> {
        let dir = if self.level_subfolders {
            self.root.join(level_dir)
        } else {
            self.root.clone()
        };
        self.write(&dir, name, bytes)
    }

    async fn put_aggregate(&self, name: &str, bytes: &[u8]) -> Result<(), SinkError> {
        self.write(&self.root, name, bytes)
    }

    async fn put_manifest(&self, name: &str, bytes: &[u8]) -> Result<(), SinkError> {
        self.write(&self.root, name, bytes)
    }
}
