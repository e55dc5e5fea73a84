//! Transformer chain: an ordered, configurable sequence of record visitors.
//!
//! Transformers mutate a [`Record`] in place and run in the order they are
//! declared in configuration. A transformer failure is fatal for the run;
//! per-record drop decisions belong to the held-by filter, not to the chain.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::record::Record;
use crate::replica::ReplicaError;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("replica metadata source failed: {0}")]
    Replica(#[from] ReplicaError),
}

#[async_trait]
pub trait Transformer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, record: &mut Record) -> Result<(), TransformError>;
}

/// Run every transformer against the record, in declared order.
pub async fn apply_chain(
    chain: &[Box<dyn Transformer>],
    record: &mut Record,
) -> Result<(), TransformError> {
    for transformer in chain {
        transformer.apply(record).await?;
        debug!(iaid = %record.iaid, transformer = transformer.name(), "applied transformer");
    }
    Ok(())
}

/// Replaces newlines with a paragraph marker in every string field.
///
/// Windows and bare carriage returns are normalized to `\n` first so all
/// newline flavours collapse to the same replacement.
pub struct NewlineToP {
    replacement: String,
}

impl NewlineToP {
    pub fn new(replacement: impl Into<String>) -> Self {
        Self {
            replacement: replacement.into(),
        }
    }

    fn rewrite(&self, text: &str) -> Option<String> {
        if !text.contains(['\n', '\r']) {
            return None;
        }
        let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
        Some(normalized.replace('\n', &self.replacement))
    }
}

impl Default for NewlineToP {
    fn default() -> Self {
        Self::new("<p>")
    }
}

#[async_trait]
impl Transformer for NewlineToP {
    fn name(&self) -> &'static str {
        "newline_to_p"
    }

    async fn apply(&self, record: &mut Record) -> Result<(), TransformError> {
        for (_, value) in record.fields.iter_mut() {
            for_each_string_mut(value, &mut |_path, text| {
                if let Some(rewritten) = self.rewrite(text) {
                    *text = rewritten;
                }
            });
        }
        Ok(())
    }
}

/// Visit every string value in a JSON tree with its normalized dotted path
/// (array indices are not part of the path, so `relatedMaterial[0].description`
/// and `relatedMaterial[1].description` both visit as
/// `relatedMaterial.description` under their parent key).
pub(crate) fn for_each_string_mut(value: &mut Value, visit: &mut dyn FnMut(&str, &mut String)) {
    fn walk(value: &mut Value, path: &mut String, visit: &mut dyn FnMut(&str, &mut String)) {
        match value {
            Value::String(text) => visit(path, text),
            Value::Array(items) => {
                for item in items {
                    walk(item, path, visit);
                }
            }
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    let previous_len = path.len();
                    if !path.is_empty() {
                        path.push('.');
                    }
                    path.push_str(key);
                    walk(child, path, visit);
                    path.truncate(previous_len);
                }
            }
            _ => {}
        }
    }
    let mut path = String::new();
    walk(value, &mut path, visit);
}

/// Visit every string value of a record's field mapping; the path starts at
/// the field name (e.g. `scopeContent.description`).
pub(crate) fn for_each_record_string_mut(
    record: &mut Record,
    visit: &mut dyn FnMut(&str, &mut String),
) {
    for (key, value) in record.fields.iter_mut() {
        let mut prefixed = |path: &str, text: &mut String| {
            if path.is_empty() {
                visit(key, text)
            } else {
                visit(&format!("{key}.{path}"), text)
            }
        };
        for_each_string_mut(value, &mut prefixed);
    }
}
