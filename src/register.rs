//! Transfer register: the persisted set of record identifiers already
//! delivered in prior runs, used for idempotent re-delivery prevention.
//!
//! The register is an explicit store injected into the pipeline, never a
//! module-level singleton. A missing register is an empty set (first run); an
//! unreadable one is corruption and aborts the run rather than risking
//! duplicate or lost delivery.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::record::Record;

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("transfer register I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("transfer register at {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted register document: delivery outcome keyed by IAID.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegisterDocument {
    records: BTreeMap<String, RegisterEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegisterEntry {
    outcome: String,
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait RegisterStore: Send + Sync {
    /// Load the set of identifiers delivered by prior runs. Missing register
    /// means first run: empty set.
    fn load(&self) -> Result<BTreeSet<String>, RegisterError>;

    /// Persist the full delivered set. Called at every checkpoint so an
    /// abrupt termination never loses a delivered batch.
    fn save(&self, delivered: &BTreeSet<String>) -> Result<(), RegisterError>;
}

/// JSON-file register store. Saves go through a temp file plus rename so a
/// crash mid-write cannot corrupt the previous register.
pub struct FsRegisterStore {
    path: PathBuf,
}

impl FsRegisterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RegisterStore for FsRegisterStore {
    fn load(&self) -> Result<BTreeSet<String>, RegisterError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no transfer register found, starting empty");
                return Ok(BTreeSet::new());
            }
            Err(err) => return Err(err.into()),
        };
        let document: RegisterDocument =
            serde_json::from_slice(&raw).map_err(|source| RegisterError::Corrupt {
                path: self.path.display().to_string(),
                source,
            })?;
        debug!(
            path = %self.path.display(),
            entries = document.records.len(),
            "loaded transfer register"
        );
        Ok(document.records.into_keys().collect())
    }

    fn save(&self, delivered: &BTreeSet<String>) -> Result<(), RegisterError> {
        let document = RegisterDocument {
            records: delivered
                .iter()
                .map(|iaid| {
                    (
                        iaid.clone(),
                        RegisterEntry {
                            outcome: "delivered".to_string(),
                        },
                    )
                })
                .collect(),
        };
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&parent)?;
        let payload = serde_json::to_vec_pretty(&document).map_err(|source| {
            RegisterError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, source))
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(&payload)?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        debug!(path = %self.path.display(), entries = delivered.len(), "saved transfer register");
        Ok(())
    }
}

/// In-memory register store for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryRegisterStore {
    inner: Mutex<BTreeSet<String>>,
}

impl InMemoryRegisterStore {
    pub fn with_entries(entries: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner: Mutex::new(entries.into_iter().collect()),
        }
    }

    pub fn snapshot(&self) -> BTreeSet<String> {
        self.inner.lock().expect("register lock").clone()
    }
}

impl RegisterStore for InMemoryRegisterStore {
    fn load(&self) -> Result<BTreeSet<String>, RegisterError> {
        Ok(self.inner.lock().expect("register lock").clone())
    }

    fn save(&self, delivered: &BTreeSet<String>) -> Result<(), RegisterError> {
        *self.inner.lock().expect("register lock") = delivered.clone();
        Ok(())
    }
}

/// Drop records already present in the register. Returns the surviving
/// records (in encounter order) and the number removed.
pub fn filter_new(records: Vec<Record>, register: &BTreeSet<String>) -> (Vec<Record>, usize) {
    let before = records.len();
    let survivors: Vec<Record> = records
        .into_iter()
        .filter(|record| !register.contains(&record.iaid))
        .collect();
    let removed = before - survivors.len();
    if removed > 0 {
        info!(removed, remaining = survivors.len(), "dedup removed previously delivered records");
    }
    (survivors, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Level;
    use serde_json::Map;

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

    #[test]
    fn missing_register_is_an_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRegisterStore::new(dir.path().join("register.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn register_round_trips_through_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRegisterStore::new(dir.path().join("register.json"));
        let delivered: BTreeSet<String> = ["C1", "C2"].iter().map(|s| s.to_string()).collect();

        store.save(&delivered).unwrap();
        assert_eq!(store.load().unwrap(), delivered);
    }

    #[test]
    fn corrupt_register_aborts_instead_of_starting_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("register.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = FsRegisterStore::new(&path);
        assert!(matches!(store.load(), Err(RegisterError::Corrupt { .. })));
    }

    #[test]
    fn filter_new_preserves_encounter_order() {
        let register: BTreeSet<String> = ["C2".to_string()].into_iter().collect();
        let (survivors, removed) =
            filter_new(vec![record("C1"), record("C2"), record("C3")], &register);
        assert_eq!(removed, 1);
        let order: Vec<&str> = survivors.iter().map(|r| r.iaid.as_str()).collect();
        assert_eq!(order, vec!["C1", "C3"]);
    }
}
