//! YAML configuration loader and validator.
//!
//! Loads the static YAML file into raw serde structs, compiles the exclusion
//! patterns, applies defaults and produces a validated [`RunConfig`]. Every
//! rejection here happens before any record is parsed or delivered.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use tracing::{error, info};

use crate::bundle::DEFAULT_ARCHIVE_CEILING;
use crate::config::{
    ArchiveConfig, ConfigError, HeldByConfig, RunConfig, TransformerKind, YNamingConfig,
};
use crate::ynaming::{DefinitiveCodeSet, ExclusionRule};

#[derive(Deserialize)]
struct StaticConfig {
    output_dir: PathBuf,
    #[serde(default)]
    transformers: Vec<TransformerEntry>,
    #[serde(default)]
    y_naming: YNamingSection,
    #[serde(default)]
    held_by: HeldBySection,
    #[serde(default)]
    archive: ArchiveSection,
    register: RegisterSection,
    #[serde(default)]
    replica: ReplicaSection,
}

#[derive(Deserialize)]
struct TransformerEntry {
    kind: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Deserialize, Default)]
struct YNamingSection {
    #[serde(default)]
    definitive_codes: Vec<String>,
    #[serde(default)]
    exclusions: Vec<ExclusionEntry>,
}

#[derive(Deserialize)]
struct ExclusionEntry {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    preceded_by: Option<String>,
    #[serde(default)]
    followed_by: Option<String>,
}

#[derive(Deserialize, Default)]
struct HeldBySection {
    #[serde(default)]
    blocked_reference_code: Option<String>,
    #[serde(default)]
    excluded_dir: Option<PathBuf>,
}

#[derive(Deserialize, Default)]
struct ArchiveSection {
    #[serde(default)]
    item_ceiling: Option<usize>,
    #[serde(default)]
    separate_digitised: Option<bool>,
    #[serde(default)]
    level_subfolders: Option<bool>,
}

#[derive(Deserialize)]
struct RegisterSection {
    path: PathBuf,
}

#[derive(Deserialize, Default)]
struct ReplicaSection {
    #[serde(default)]
    metadata_dir: Option<PathBuf>,
}

/// Load and validate the YAML config file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RunConfig, ConfigError> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "loading configuration from file");

    let content = std::fs::read_to_string(path_ref).map_err(|source| {
        error!(error = ?source, config_path = ?path_ref, "failed to read config file");
        ConfigError::Io {
            path: path_ref.display().to_string(),
            source,
        }
    })?;

    let raw: StaticConfig = serde_yaml::from_str(&content).map_err(|source| {
        error!(error = ?source, config_path = ?path_ref, "failed to parse config YAML");
        ConfigError::Yaml {
            path: path_ref.display().to_string(),
            source,
        }
    })?;

    let mut transformers = Vec::new();
    for entry in &raw.transformers {
        let kind = TransformerKind::parse(&entry.kind).ok_or_else(|| {
            error!(kind = %entry.kind, "unknown transformer kind in config");
            ConfigError::UnknownTransformer {
                kind: entry.kind.clone(),
            }
        })?;
        if entry.enabled {
            transformers.push(kind);
        } else {
            info!(kind = %entry.kind, "transformer disabled by config");
        }
    }

    let y_naming = build_y_naming(&raw.y_naming, &transformers)?;

    if transformers.contains(&TransformerKind::Replica) && raw.replica.metadata_dir.is_none() {
        error!("replica transformer enabled without replica.metadata_dir");
        return Err(ConfigError::MissingReplicaMetadataDir);
    }

    let config = RunConfig {
        output_dir: raw.output_dir,
        transformers,
        y_naming,
        held_by: HeldByConfig {
            blocked_reference_code: raw.held_by.blocked_reference_code,
            excluded_dir: raw.held_by.excluded_dir,
        },
        archive: ArchiveConfig {
            item_ceiling: raw.archive.item_ceiling.unwrap_or(DEFAULT_ARCHIVE_CEILING),
            separate_digitised: raw.archive.separate_digitised.unwrap_or(true),
            level_subfolders: raw.archive.level_subfolders.unwrap_or(true),
        },
        register_path: raw.register.path,
        replica_metadata_dir: raw.replica.metadata_dir,
    };
    config.trace_loaded();
    Ok(config)
}

fn build_y_naming(
    section: &YNamingSection,
    transformers: &[TransformerKind],
) -> Result<YNamingConfig, ConfigError> {
    let enabled = transformers.contains(&TransformerKind::YNaming);
    if enabled && section.definitive_codes.is_empty() {
        error!("y_naming enabled with an empty definitive code set");
        return Err(ConfigError::EmptyDefinitiveSet);
    }

    let mut exclusions = Vec::with_capacity(section.exclusions.len());
    for (index, entry) in section.exclusions.iter().enumerate() {
        let rule = ExclusionRule {
            field: entry.field.clone(),
            code: entry.code.clone(),
            preceded_by: compile_anchor(index, "preceded_by", entry.preceded_by.as_deref())?,
            followed_by: compile_anchor(index, "followed_by", entry.followed_by.as_deref())?,
        };
        if !rule.is_constrained() {
            error!(index, "exclusion rule constrains nothing beyond its field");
            return Err(ConfigError::UnconstrainedExclusion { index });
        }
        exclusions.push(rule);
    }

    Ok(YNamingConfig {
        definitive_codes: DefinitiveCodeSet::new(section.definitive_codes.iter().cloned()),
        exclusions,
    })
}

fn compile_anchor(
    index: usize,
    anchor: &'static str,
    pattern: Option<&str>,
) -> Result<Option<Regex>, ConfigError> {
    pattern
        .map(|p| {
            Regex::new(p).map_err(|source| {
                error!(index, anchor, pattern = %p, "invalid exclusion pattern");
                ConfigError::InvalidRegex {
                    index,
                    anchor,
                    source,
                }
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(yaml: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        (dir, path)
    }

    const FULL: &str = r#"
output_dir: ./delivery
transformers:
  - kind: newline_to_p
  - kind: y_naming
    enabled: true
  - kind: replica
    enabled: false
y_naming:
  definitive_codes: [PO, HL, PARL]
  exclusions:
    - field: scopeContent.description
      code: PO
      preceded_by: '\(marker\s*$'
held_by:
  blocked_reference_code: "61"
  excluded_dir: ./excluded
archive:
  item_ceiling: 500
register:
  path: ./delivery/transfer_register.json
"#;

    #[test]
    fn full_config_loads_with_defaults_applied() {
        let (_dir, path) = write_config(FULL);
        let config = load_config(&path).unwrap();

        assert_eq!(
            config.transformers,
            vec![TransformerKind::NewlineToP, TransformerKind::YNaming]
        );
        assert_eq!(config.archive.item_ceiling, 500);
        assert!(config.archive.separate_digitised);
        assert!(config.archive.level_subfolders);
        assert_eq!(config.held_by.blocked_reference_code.as_deref(), Some("61"));
        assert!(config.y_naming.definitive_codes.contains("PARL"));
        assert_eq!(config.y_naming.exclusions.len(), 1);
    }

    #[test]
    fn empty_definitive_set_is_rejected_when_y_naming_enabled() {
        let (_dir, path) = write_config(
            r#"
output_dir: ./out
transformers:
  - kind: y_naming
register:
  path: ./register.json
"#,
        );
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::EmptyDefinitiveSet)
        ));
    }

    #[test]
    fn unconstrained_exclusion_rule_is_rejected() {
        let (_dir, path) = write_config(
            r#"
output_dir: ./out
transformers:
  - kind: y_naming
y_naming:
  definitive_codes: [PO]
  exclusions:
    - field: title
register:
  path: ./register.json
"#,
        );
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::UnconstrainedExclusion { index: 0 })
        ));
    }

    #[test]
    fn invalid_exclusion_regex_is_rejected() {
        let (_dir, path) = write_config(
            r#"
output_dir: ./out
transformers:
  - kind: y_naming
y_naming:
  definitive_codes: [PO]
  exclusions:
    - code: PO
      preceded_by: '([unclosed'
register:
  path: ./register.json
"#,
        );
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::InvalidRegex { index: 0, .. })
        ));
    }

    #[test]
    fn replica_requires_a_metadata_dir() {
        let (_dir, path) = write_config(
            r#"
output_dir: ./out
transformers:
  - kind: replica
register:
  path: ./register.json
"#,
        );
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::MissingReplicaMetadataDir)
        ));
    }

    #[test]
    fn unknown_transformer_kind_is_rejected() {
        let (_dir, path) = write_config(
            r#"
output_dir: ./out
transformers:
  - kind: frobnicate
register:
  path: ./register.json
"#,
        );
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::UnknownTransformer { .. })
        ));
    }
}
