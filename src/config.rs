//! Validated run configuration.
//!
//! These are the types the pipeline consumes. The YAML-shaped raw structs
//! and the validation that produces a [`RunConfig`] live in `load_config`.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};

use crate::bundle::DEFAULT_ARCHIVE_CEILING;
use crate::ynaming::{DefinitiveCodeSet, ExclusionRule};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config YAML in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("unknown transformer kind: {kind}")]
    UnknownTransformer { kind: String },
    #[error("y_naming is enabled but definitive_codes is empty")]
    EmptyDefinitiveSet,
    #[error("exclusion rule {index} constrains nothing beyond its field")]
    UnconstrainedExclusion { index: usize },
    #[error("exclusion rule {index} has an invalid {anchor} pattern: {source}")]
    InvalidRegex {
        index: usize,
        anchor: &'static str,
        #[source]
        source: regex::Error,
    },
    #[error("replica transformer is enabled but replica.metadata_dir is not set")]
    MissingReplicaMetadataDir,
}

/// The transformers the pipeline knows how to build, in no particular order;
/// execution order comes from the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformerKind {
    NewlineToP,
    YNaming,
    Replica,
}

impl TransformerKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "newline_to_p" => Some(Self::NewlineToP),
            "y_naming" => Some(Self::YNaming),
            "replica" => Some(Self::Replica),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct YNamingConfig {
    pub definitive_codes: DefinitiveCodeSet,
    pub exclusions: Vec<ExclusionRule>,
}

#[derive(Debug)]
pub struct HeldByConfig {
    pub blocked_reference_code: Option<String>,
    /// Side channel for excluded records; `None` discards them.
    pub excluded_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub struct ArchiveConfig {
    pub item_ceiling: usize,
    pub separate_digitised: bool,
    pub level_subfolders: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            item_ceiling: DEFAULT_ARCHIVE_CEILING,
            separate_digitised: true,
            level_subfolders: true,
        }
    }
}

#[derive(Debug)]
pub struct RunConfig {
    pub output_dir: PathBuf,
    /// Enabled transformers in declared (execution) order.
    pub transformers: Vec<TransformerKind>,
    pub y_naming: YNamingConfig,
    pub held_by: HeldByConfig,
    pub archive: ArchiveConfig,
    pub register_path: PathBuf,
    pub replica_metadata_dir: Option<PathBuf>,
}

impl RunConfig {
    pub fn trace_loaded(&self) {
        info!(
            output_dir = %self.output_dir.display(),
            transformers = self.transformers.len(),
            exclusion_rules = self.y_naming.exclusions.len(),
            item_ceiling = self.archive.item_ceiling,
            register = %self.register_path.display(),
            "loaded run configuration"
        );
        debug!(?self, "run configuration (full debug)");
    }
}
