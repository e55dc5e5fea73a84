//! Batch grouping and archive packing.
//!
//! Survivors of the dedup stage are grouped by (catalogue level, digitised)
//! preserving encounter order, packed into size-bounded tar.gz archives with
//! cumulative end-count naming, and finally bundled into a single aggregate
//! archive accompanied by a manifest.

use std::collections::{BTreeMap, BTreeSet};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tar::{Builder, Header};
use thiserror::Error;
use tracing::{debug, info};

use crate::record::{Level, Record};

/// Maximum number of record entries per archive unless configured otherwise.
pub const DEFAULT_ARCHIVE_CEILING: usize = 10_000;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive write failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize record {iaid}: {source}")]
    Serialize {
        iaid: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Output grouping key. Digitised records of a level never share an archive
/// with non-digitised records of the same level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupKey {
    pub level: Level,
    pub digitised: bool,
}

impl GroupKey {
    /// Archive-name component for this group, e.g. `item` or
    /// `item_digitised`.
    pub fn label(&self) -> String {
        if self.digitised {
            format!("{}_digitised", self.level.dir_name())
        } else {
            self.level.dir_name().to_string()
        }
    }
}

/// Group records by (level, digitised), keeping encounter order within each
/// group. With `separate_digitised` off, everything lands in the
/// non-digitised group for its level.
pub fn group_records(
    records: Vec<Record>,
    separate_digitised: bool,
) -> BTreeMap<GroupKey, Vec<Record>> {
    let mut groups: BTreeMap<GroupKey, Vec<Record>> = BTreeMap::new();
    for record in records {
        let key = GroupKey {
            level: record.level,
            digitised: record.digitised && separate_digitised,
        };
        groups.entry(key).or_default().push(record);
    }
    debug!(groups = groups.len(), "grouped records for packaging");
    groups
}

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Name of the catalogue tree being delivered; the leading component of
    /// every archive name.
    pub tree: String,
    pub item_ceiling: usize,
}

/// One packed archive, ready for delivery. Carries the identifiers of its
/// records so the register can be checkpointed per delivered archive.
pub struct BuiltArchive {
    pub name: String,
    pub level: Level,
    pub digitised: bool,
    pub record_count: usize,
    pub iaids: Vec<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    pub archive_name: String,
    pub record_count: usize,
    pub level: String,
    pub digitised: bool,
}

/// Ordered list of every archive delivered in a run.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn push(&mut self, archive: &BuiltArchive) {
        self.entries.push(ManifestEntry {
            archive_name: archive.name.clone(),
            record_count: archive.record_count,
            level: archive.level.dir_name().to_string(),
            digitised: archive.digitised,
        });
    }

    pub fn total_records(&self) -> usize {
        self.entries.iter().map(|e| e.record_count).sum()
    }

    pub fn to_json_bytes(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(self).unwrap_or_default()
    }
}

/// Pack one group into archives of at most `item_ceiling` entries. Names
/// carry the cumulative record count at the end of each archive, so
/// 10,001 items at the default ceiling yield `<tree>_<label>_10000.tar.gz`
/// and `<tree>_<label>_10001.tar.gz`.
pub fn build_group_archives(
    key: GroupKey,
    records: &[Record],
    options: &ArchiveOptions,
) -> Result<Vec<BuiltArchive>, ArchiveError> {
    let ceiling = options.item_ceiling.max(1);
    let mut archives = Vec::new();
    let mut cumulative = 0usize;
    for chunk in records.chunks(ceiling) {
        cumulative += chunk.len();
        let name = format!("{}_{}_{}.tar.gz", options.tree, key.label(), cumulative);
        let bytes = pack_records(chunk)?;
        info!(
            archive = %name,
            records = chunk.len(),
            bytes = bytes.len(),
            "built archive"
        );
        archives.push(BuiltArchive {
            name,
            level: key.level,
            digitised: key.digitised,
            record_count: chunk.len(),
            iaids: chunk.iter().map(|r| r.iaid.clone()).collect(),
            bytes,
        });
    }
    Ok(archives)
}

/// Bundle every per-group archive into the aggregate `<tree>.tar.gz`.
pub fn build_aggregate(
    tree: &str,
    archives: &[BuiltArchive],
) -> Result<(String, Vec<u8>), ArchiveError> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);
    for archive in archives {
        append_entry(&mut builder, &archive.name, &archive.bytes)?;
    }
    let bytes = builder.into_inner()?.finish()?;
    let name = format!("{tree}.tar.gz");
    info!(aggregate = %name, archives = archives.len(), bytes = bytes.len(), "built aggregate bundle");
    Ok((name, bytes))
}

fn pack_records(records: &[Record]) -> Result<Vec<u8>, ArchiveError> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);
    let mut taken = BTreeSet::new();
    for record in records {
        let payload = serde_json::to_vec_pretty(&record.to_delivery_json()).map_err(|source| {
            ArchiveError::Serialize {
                iaid: record.iaid.clone(),
                source,
            }
        })?;
        let entry_name = unique_entry_name(&record.iaid, &mut taken);
        append_entry(&mut builder, &entry_name, &payload)?;
    }
    Ok(builder.into_inner()?.finish()?)
}

fn append_entry<W: std::io::Write>(
    builder: &mut Builder<W>,
    name: &str,
    payload: &[u8],
) -> Result<(), ArchiveError> {
    let mut header = Header::new_gnu();
    header.set_size(payload.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder.append_data(&mut header, name, payload)?;
    Ok(())
}

/// Sanitized, in-archive-unique entry name for a record: `<iaid>.json` with
/// path separators and control characters neutralized, never empty and never
/// a traversal component. Collisions get a numeric suffix.
fn unique_entry_name(iaid: &str, taken: &mut BTreeSet<String>) -> String {
    let base = sanitize_component(iaid);
    let mut candidate = format!("{base}.json");
    let mut counter = 1usize;
    while taken.contains(&candidate) {
        counter += 1;
        candidate = format!("{base}_{counter}.json");
    }
    taken.insert(candidate.clone());
    candidate
}

fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "record".to_string()
    } else {
        trimmed.to_string()
    }
}
