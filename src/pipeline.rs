//! Pipeline orchestrator: parse -> transform -> exclude -> dedup -> group ->
//! pack -> deliver, with per-archive register checkpoints and an optional
//! wall-clock deadline checked between groups.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::bundle::{
    build_aggregate, build_group_archives, group_records, ArchiveError, ArchiveOptions,
    BuiltArchive, Manifest, ManifestEntry,
};
use crate::config::{RunConfig, TransformerKind};
use crate::heldby::{
    ExcludedStore, FsExcludedStore, HeldByDecision, HeldByFilter, NullExcludedStore,
};
use crate::parse::{parse_path, ParseError};
use crate::register::{filter_new, FsRegisterStore, RegisterError, RegisterStore};
use crate::replica::{FsReplicaSource, ReplicaSource, ReplicaTransformer};
use crate::sink::{DeliverySink, FsSink, SinkError};
use crate::transform::{apply_chain, NewlineToP, TransformError, Transformer};
use crate::ynaming::YNaming;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Register(#[from] RegisterError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Optional wall-clock budget for a run. Checked between group batches so a
/// run near its limit exits cleanly after its last completed checkpoint.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn none() -> Self {
        Self { at: None }
    }

    /// A budget too large to represent as an instant means no deadline.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(budget),
        }
    }

    pub fn imminent(&self) -> bool {
        self.at.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

/// Outcome counters for one run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub parsed: usize,
    pub parse_failures: usize,
    pub excluded: usize,
    /// Blocked records that could not be written to the side channel; they
    /// are still withheld from delivery.
    pub excluded_store_failures: usize,
    pub duplicates_skipped: usize,
    pub delivered: usize,
    pub archives: Vec<ManifestEntry>,
    pub truncated_by_deadline: bool,
}

pub struct Pipeline {
    config: RunConfig,
    register: Arc<dyn RegisterStore>,
    excluded: Arc<dyn ExcludedStore>,
    sink: Arc<dyn DeliverySink>,
    replica_source: Option<Arc<dyn ReplicaSource>>,
}

impl Pipeline {
    /// Wire the pipeline with explicit stores; tests and alternative
    /// delivery targets go through here.
    pub fn new(
        config: RunConfig,
        register: Arc<dyn RegisterStore>,
        excluded: Arc<dyn ExcludedStore>,
        sink: Arc<dyn DeliverySink>,
        replica_source: Option<Arc<dyn ReplicaSource>>,
    ) -> Self {
        Self {
            config,
            register,
            excluded,
            sink,
            replica_source,
        }
    }

    /// Wire the pipeline with the filesystem implementations derived from
    /// the configuration.
    pub fn from_config(config: RunConfig) -> Self {
        let register: Arc<dyn RegisterStore> =
            Arc::new(FsRegisterStore::new(config.register_path.clone()));
        let excluded: Arc<dyn ExcludedStore> = match &config.held_by.excluded_dir {
            Some(dir) => Arc::new(FsExcludedStore::new(dir.clone())),
            None => Arc::new(NullExcludedStore),
        };
        let sink: Arc<dyn DeliverySink> = Arc::new(FsSink::new(
            config.output_dir.clone(),
            config.archive.level_subfolders,
        ));
        let replica_source: Option<Arc<dyn ReplicaSource>> = config
            .replica_metadata_dir
            .as_ref()
            .map(|dir| Arc::new(FsReplicaSource::new(dir.clone())) as Arc<dyn ReplicaSource>);
        Self::new(config, register, excluded, sink, replica_source)
    }

    fn build_chain(&self) -> Vec<Box<dyn Transformer>> {
        let mut chain: Vec<Box<dyn Transformer>> = Vec::new();
        for kind in &self.config.transformers {
            match kind {
                TransformerKind::NewlineToP => chain.push(Box::new(NewlineToP::default())),
                TransformerKind::YNaming => chain.push(Box::new(YNaming::new(
                    self.config.y_naming.definitive_codes.clone(),
                    self.config.y_naming.exclusions.clone(),
                ))),
                TransformerKind::Replica => match &self.replica_source {
                    Some(source) => {
                        chain.push(Box::new(ReplicaTransformer::new(source.clone())))
                    }
                    None => warn!("replica transformer configured without a metadata source"),
                },
            }
        }
        chain
    }

    pub async fn run(&self, input: &Path, deadline: Deadline) -> Result<RunReport, PipelineError> {
        let tree = tree_name(input);
        info!(input = %input.display(), tree = %tree, "pipeline run starting");
        let mut report = RunReport::default();

        let outcome = parse_path(input)?;
        report.parsed = outcome.records.len();
        report.parse_failures = outcome.failures;
        info!(
            parsed = report.parsed,
            parse_failures = report.parse_failures,
            "parse stage complete"
        );

        let chain = self.build_chain();
        let mut records = outcome.records;
        for record in &mut records {
            apply_chain(&chain, record).await?;
        }

        let filter = HeldByFilter::new(self.config.held_by.blocked_reference_code.clone());
        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            match filter.decide(&record) {
                HeldByDecision::Keep => kept.push(record),
                HeldByDecision::Exclude => {
                    // A failed side-channel write never aborts the run; the
                    // record still stays out of dedup and grouping.
                    if let Err(err) = self.excluded.persist(&record) {
                        warn!(
                            iaid = %record.iaid,
                            error = %err,
                            "failed to persist excluded record"
                        );
                        report.excluded_store_failures += 1;
                    }
                    report.excluded += 1;
                }
            }
        }
        info!(excluded = report.excluded, kept = kept.len(), "held-by filter complete");

        let mut delivered_set = self.register.load()?;
        let (survivors, duplicates) = filter_new(kept, &delivered_set);
        report.duplicates_skipped = duplicates;

        let groups = group_records(survivors, self.config.archive.separate_digitised);
        let options = ArchiveOptions {
            tree: tree.clone(),
            item_ceiling: self.config.archive.item_ceiling,
        };

        let mut manifest = Manifest::default();
        let mut delivered_archives: Vec<BuiltArchive> = Vec::new();
        for (key, group) in groups {
            if deadline.imminent() {
                warn!("deadline imminent, stopping after last completed checkpoint");
                report.truncated_by_deadline = true;
                break;
            }
            let archives = match build_group_archives(key, &group, &options) {
                Ok(archives) => archives,
                Err(err) => {
                    error!(group = %key.label(), error = %err, "group packing failed, skipping group");
                    continue;
                }
            };
            let level_dir = key.label();
            for archive in archives {
                if let Err(err) = self
                    .sink
                    .put_archive(&archive.name, &level_dir, &archive.bytes)
                    .await
                {
                    error!(
                        archive = %archive.name,
                        error = %err,
                        "archive delivery failed, skipping rest of group"
                    );
                    break;
                }
                delivered_set.extend(archive.iaids.iter().cloned());
                self.register.save(&delivered_set)?;
                report.delivered += archive.record_count;
                manifest.push(&archive);
                delivered_archives.push(archive);
            }
        }

        if !delivered_archives.is_empty() {
            if !report.truncated_by_deadline {
                let (name, bytes) = build_aggregate(&tree, &delivered_archives)?;
                self.sink.put_aggregate(&name, &bytes).await?;
            }
            self.sink
                .put_manifest("manifest.json", &manifest.to_json_bytes())
                .await?;
        }

        report.archives = manifest.entries;
        info!(
            delivered = report.delivered,
            archives = report.archives.len(),
            duplicates_skipped = report.duplicates_skipped,
            truncated = report.truncated_by_deadline,
            "pipeline run complete"
        );
        Ok(report)
    }
}

/// Delivery tree name derived from the input file stem.
fn tree_name(input: &Path) -> String {
    input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("catalogue")
        .to_lowercase()
        .replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_name_comes_from_the_input_stem() {
        assert_eq!(tree_name(Path::new("/data/Court Rolls.xml")), "court_rolls");
        assert_eq!(tree_name(Path::new("tree.xml")), "tree");
    }

    #[test]
    fn deadline_none_is_never_imminent() {
        assert!(!Deadline::none().imminent());
        assert!(Deadline::after(Duration::ZERO).imminent());
    }

    #[test]
    fn unrepresentable_budgets_behave_like_no_deadline() {
        let deadline = Deadline::after(Duration::from_secs(u64::MAX));
        assert!(!deadline.imminent());
    }
}
