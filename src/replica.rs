//! Replica / digitisation transformer.
//!
//! Fetches replica metadata for a record's IAID from an external metadata
//! source and attaches it to the record. A metadata miss leaves the record
//! unchanged; a hit attaches the metadata, resolves `creatorName` through an
//! ordered fallback and derives the `digitised` flag.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::record::Record;
use crate::transform::{TransformError, Transformer};

/// Placeholder used when neither metadata creator field is populated.
pub const DEFAULT_CREATOR_NAME: &str = "Unknown";

#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("failed to read replica metadata: {0}")]
    Io(#[from] std::io::Error),
    #[error("replica metadata for {iaid} is not valid JSON: {source}")]
    Malformed {
        iaid: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Source of replica metadata documents, keyed by IAID. Implementations are
/// interchangeable: filesystem for local runs, object-store clients in the
/// invocation wrapper, mocks in tests.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ReplicaSource: Send + Sync {
    /// Fetch the metadata document for an IAID. `Ok(None)` means no replica
    /// metadata exists for this record.
    async fn fetch(&self, iaid: &str) -> Result<Option<Value>, ReplicaError>;
}

/// Reads replica metadata from `<dir>/<iaid>.json`.
pub struct FsReplicaSource {
    dir: PathBuf,
}

impl FsReplicaSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ReplicaSource for FsReplicaSource {
    async fn fetch(&self, iaid: &str) -> Result<Option<Value>, ReplicaError> {
        let path = self.dir.join(format!("{iaid}.json"));
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let value = serde_json::from_slice(&raw).map_err(|source| ReplicaError::Malformed {
            iaid: iaid.to_string(),
            source,
        })?;
        Ok(Some(value))
    }
}

pub struct ReplicaTransformer {
    source: Arc<dyn ReplicaSource>,
}

impl ReplicaTransformer {
    pub fn new(source: Arc<dyn ReplicaSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Transformer for ReplicaTransformer {
    fn name(&self) -> &'static str {
        "replica"
    }

    async fn apply(&self, record: &mut Record) -> Result<(), TransformError> {
        // Every record carries the replicaId field, populated or not.
        record
            .fields
            .entry("replicaId".to_string())
            .or_insert(Value::Null);

        let Some(metadata) = self.source.fetch(&record.iaid).await? else {
            return Ok(());
        };

        if let Some(replica_id) = metadata.get("replicaId").filter(|v| !v.is_null()) {
            record
                .fields
                .insert("replicaId".to_string(), replica_id.clone());
        }

        // creatorName fallback: creator, then custodian, then placeholder.
        let creator = non_empty(metadata.get("creator"))
            .or_else(|| non_empty(metadata.get("custodian")))
            .unwrap_or(DEFAULT_CREATOR_NAME);
        record.fields.insert(
            "creatorName".to_string(),
            Value::String(creator.to_string()),
        );

        let has_digital_files = metadata
            .get("files")
            .and_then(Value::as_array)
            .map(|files| !files.is_empty())
            .unwrap_or(false);
        if has_digital_files {
            record.digitised = true;
        }

        debug!(iaid = %record.iaid, digitised = record.digitised, "attached replica metadata");
        record.fields.insert("replica".to_string(), metadata);
        Ok(())
    }
}

fn non_empty(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Level;
    use serde_json::{json, Map};

    fn record(iaid: &str) -> Record {
        Record {
            iaid: iaid.to_string(),
            level: Level::Item,
            fields: Map::new(),
            held_by: vec![],
            digitised: false,
            source_file: "t.xml".to_string(),
        }
    }

    #[tokio::test]
    async fn miss_leaves_record_unchanged_except_replica_id_placeholder() {
        let mut source = MockReplicaSource::new();
        source.expect_fetch().returning(|_| Ok(None));
        let transformer = ReplicaTransformer::new(Arc::new(source));

        let mut rec = record("C404");
        transformer.apply(&mut rec).await.unwrap();

        assert_eq!(rec.fields["replicaId"], Value::Null);
        assert!(!rec.fields.contains_key("replica"));
        assert!(!rec.digitised);
    }

    #[tokio::test]
    async fn hit_attaches_metadata_and_sets_digitised() {
        let mut source = MockReplicaSource::new();
        source.expect_fetch().returning(|_| {
            Ok(Some(json!({
                "replicaId": "R77",
                "creator": " Records Office ",
                "files": [{"name": "page1.tiff"}]
            })))
        });
        let transformer = ReplicaTransformer::new(Arc::new(source));

        let mut rec = record("C200");
        transformer.apply(&mut rec).await.unwrap();

        assert_eq!(rec.fields["replicaId"], json!("R77"));
        assert_eq!(rec.fields["creatorName"], json!("Records Office"));
        assert!(rec.digitised);
        assert_eq!(rec.fields["replica"]["files"][0]["name"], json!("page1.tiff"));
    }

    #[tokio::test]
    async fn creator_name_falls_back_to_custodian_then_placeholder() {
        let mut source = MockReplicaSource::new();
        source
            .expect_fetch()
            .returning(|_| Ok(Some(json!({"custodian": "Archive Team", "files": []}))));
        let transformer = ReplicaTransformer::new(Arc::new(source));
        let mut rec = record("C1");
        transformer.apply(&mut rec).await.unwrap();
        assert_eq!(rec.fields["creatorName"], json!("Archive Team"));
        assert!(!rec.digitised);

        let mut source = MockReplicaSource::new();
        source
            .expect_fetch()
            .returning(|_| Ok(Some(json!({"creator": "", "files": []}))));
        let transformer = ReplicaTransformer::new(Arc::new(source));
        let mut rec = record("C2");
        transformer.apply(&mut rec).await.unwrap();
        assert_eq!(rec.fields["creatorName"], json!(DEFAULT_CREATOR_NAME));
    }

    #[tokio::test]
    async fn fs_source_reads_by_iaid_and_misses_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("C9.json"),
            r#"{"files": [{"name": "f.tiff"}]}"#,
        )
        .unwrap();
        let source = FsReplicaSource::new(dir.path());

        let hit = source.fetch("C9").await.unwrap();
        assert!(hit.is_some());
        assert!(source.fetch("C10").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fs_source_reports_malformed_metadata() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("C9.json"), "not json").unwrap();
        let source = FsReplicaSource::new(dir.path());
        let err = source.fetch("C9").await.unwrap_err();
        assert!(matches!(err, ReplicaError::Malformed { .. }));
    }
}
