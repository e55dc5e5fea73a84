//! Core record model: a parsed catalogue record with its JSON field mapping.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Catalogue hierarchy level. The numeric depth matches the catalogue's
/// record-level mapping (FONDS = 1 down to ITEM = 10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Level {
    Fonds,
    SubFonds,
    SubSubFonds,
    SubSubSubFonds,
    SubSubSubSubFonds,
    Series,
    SubSeries,
    SubSubSeries,
    File,
    Item,
}

impl Level {
    pub const ALL: [Level; 10] = [
        Level::Fonds,
        Level::SubFonds,
        Level::SubSubFonds,
        Level::SubSubSubFonds,
        Level::SubSubSubSubFonds,
        Level::Series,
        Level::SubSeries,
        Level::SubSubSeries,
        Level::File,
        Level::Item,
    ];

    /// Parse the neutral-language level text as it appears in catalogue
    /// exports (e.g. "SUB-FONDS").
    pub fn from_catalogue_text(text: &str) -> Option<Level> {
        match text.trim() {
            "FONDS" => Some(Level::Fonds),
            "SUB-FONDS" => Some(Level::SubFonds),
            "SUB-SUB-FONDS" => Some(Level::SubSubFonds),
            "SUB-SUB-SUB-FONDS" => Some(Level::SubSubSubFonds),
            "SUB-SUB-SUB-SUB-FONDS" => Some(Level::SubSubSubSubFonds),
            "SERIES" => Some(Level::Series),
            "SUB-SERIES" => Some(Level::SubSeries),
            "SUB-SUB-SERIES" => Some(Level::SubSubSeries),
            "FILE" => Some(Level::File),
            "ITEM" => Some(Level::Item),
            _ => None,
        }
    }

    /// Numeric catalogue depth, 1..=10.
    pub fn depth(self) -> u8 {
        match self {
            Level::Fonds => 1,
            Level::SubFonds => 2,
            Level::SubSubFonds => 3,
            Level::SubSubSubFonds => 4,
            Level::SubSubSubSubFonds => 5,
            Level::Series => 6,
            Level::SubSeries => 7,
            Level::SubSubSeries => 8,
            Level::File => 9,
            Level::Item => 10,
        }
    }

    /// Lowercase folder/archive name component for this level.
    pub fn dir_name(self) -> &'static str {
        match self {
            Level::Fonds => "fonds",
            Level::SubFonds => "sub_fonds",
            Level::SubSubFonds => "sub_sub_fonds",
            Level::SubSubSubFonds => "sub_sub_sub_fonds",
            Level::SubSubSubSubFonds => "sub_sub_sub_sub_fonds",
            Level::Series => "series",
            Level::SubSeries => "sub_series",
            Level::SubSubSeries => "sub_sub_series",
            Level::File => "file",
            Level::Item => "item",
        }
    }
}

/// A holding-institution entry on a record, in delivery field naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holder {
    #[serde(rename = "xReferenceId")]
    pub reference_id: String,
    #[serde(rename = "xReferenceCode")]
    pub reference_code: String,
    #[serde(rename = "xReferenceName")]
    pub reference_name: String,
}

/// One catalogue record: typed identity plus a JSON field mapping that the
/// transformer chain mutates in place. The record becomes immutable once it
/// is handed to the batch grouper.
#[derive(Debug, Clone)]
pub struct Record {
    /// Unique catalogue identifier (IAID). Present and unique within a run.
    pub iaid: String,
    pub level: Level,
    /// Remaining fields as a JSON mapping: strings, nested mappings or
    /// ordered sequences.
    pub fields: Map<String, Value>,
    pub held_by: Vec<Holder>,
    /// Set by the replica transformer when metadata indicates an existing
    /// digital replica; read-only downstream, drives output grouping.
    pub digitised: bool,
    /// Provenance: the input file this record came from.
    pub source_file: String,
}

impl Record {
    /// Serialize to the delivery JSON shape: `{"record": {...}}`.
    pub fn to_delivery_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("iaid".to_string(), Value::String(self.iaid.clone()));
        obj.insert(
            "catalogueLevel".to_string(),
            Value::Number(self.level.depth().into()),
        );
        obj.insert("digitised".to_string(), Value::Bool(self.digitised));
        obj.insert(
            "heldBy".to_string(),
            serde_json::to_value(&self.held_by).unwrap_or(Value::Array(Vec::new())),
        );
        for (key, value) in &self.fields {
            obj.insert(key.clone(), value.clone());
        }
        let mut wrapper = Map::new();
        wrapper.insert("record".to_string(), Value::Object(obj));
        Value::Object(wrapper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_round_trips_catalogue_text_and_depth() {
        for level in Level::ALL {
            assert_eq!(Level::ALL[(level.depth() - 1) as usize], level);
        }
        assert_eq!(Level::from_catalogue_text("SUB-SERIES"), Some(Level::SubSeries));
        assert_eq!(Level::from_catalogue_text(" ITEM "), Some(Level::Item));
        assert_eq!(Level::from_catalogue_text("COLLECTION"), None);
    }

    #[test]
    fn delivery_json_wraps_record_and_keeps_fields() {
        let mut fields = Map::new();
        fields.insert("title".to_string(), Value::String("Minutes".to_string()));
        let record = Record {
            iaid: "C100".to_string(),
            level: Level::Series,
            fields,
            held_by: vec![],
            digitised: false,
            source_file: "tree.xml".to_string(),
        };
        let json = record.to_delivery_json();
        assert_eq!(json["record"]["iaid"], "C100");
        assert_eq!(json["record"]["catalogueLevel"], 6);
        assert_eq!(json["record"]["title"], "Minutes");
    }
}
