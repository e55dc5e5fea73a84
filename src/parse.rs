//! Catalogue XML parser: structured-markup record tree -> [`Record`]s.
//!
//! A malformed individual record is skipped with a warning and counted; only
//! a malformed document (unreadable XML) fails the parse as a whole.

use std::collections::HashSet;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::record::{Holder, Level, Record};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read input file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed XML document: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("record has no catalogue identifier")]
    MissingIdentifier,
    #[error("record {0}: duplicate catalogue identifier")]
    DuplicateIdentifier(String),
    #[error("record {0}: missing catalogue level")]
    MissingLevel(String),
    #[error("record {iaid}: unrecognized catalogue level '{level}'")]
    UnrecognizedLevel { iaid: String, level: String },
}

/// Result of parsing one input document.
#[derive(Debug)]
pub struct ParseOutcome {
    pub records: Vec<Record>,
    /// Records skipped because they were individually malformed.
    pub failures: usize,
}

/// Institution names and their delivery cross-reference entries.
const HOLDERS: [(&str, &str, &str, &str); 3] = [
    (
        "The National Archives, Kew",
        "A13530124",
        "66",
        "The National Archives, Kew",
    ),
    ("UK Parliament", "A13531051", "61", "UK Parliament"),
    (
        "British Film Institute",
        "A13532152",
        "2870",
        "British Film Institute (BFI) National Archive",
    ),
];

/// Element names consumed into typed `Record` fields rather than the generic
/// field mapping.
const CONSUMED_ELEMENTS: [&str; 4] = [
    "Alternative_number",
    "record_type",
    "institution.name",
    "digitised",
];

pub fn parse_path(path: &Path) -> Result<ParseOutcome, ParseError> {
    let xml = std::fs::read_to_string(path)?;
    let source_file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    parse_records(&xml, &source_file)
}

/// Parse every `<record>` element in the document.
pub fn parse_records(xml: &str, source_file: &str) -> Result<ParseOutcome, ParseError> {
    let root = read_tree(xml)?;
    let mut record_elements = Vec::new();
    root.collect_named("record", &mut record_elements);

    let mut records = Vec::with_capacity(record_elements.len());
    let mut failures = 0usize;
    let mut seen = HashSet::new();
    for element in record_elements {
        match extract_record(element, source_file, &mut seen) {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!(error = %err, source_file, "skipping malformed record");
                failures += 1;
            }
        }
    }
    debug!(
        parsed = records.len(),
        failures, source_file, "parsed catalogue document"
    );
    Ok(ParseOutcome { records, failures })
}

/// Minimal in-memory element tree; enough structure for field extraction.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.trim()).filter(|t| !t.is_empty())
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn collect_named<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        for child in &self.children {
            if child.name == name {
                out.push(child);
            } else {
                child.collect_named(name, out);
            }
        }
    }
}

fn read_tree(xml: &str) -> Result<Element, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<Element> = vec![Element::default()];
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(start) => {
                let mut element = Element {
                    name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                    ..Element::default()
                };
                for attr in start.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr.unescape_value().map(|v| v.into_owned()).unwrap_or_default();
                    element.attrs.push((key, value));
                }
                stack.push(element);
            }
            Event::Empty(start) => {
                let mut element = Element {
                    name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                    ..Element::default()
                };
                for attr in start.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr.unescape_value().map(|v| v.into_owned()).unwrap_or_default();
                    element.attrs.push((key, value));
                }
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(element);
                }
            }
            Event::Text(text) => {
                let unescaped = text.unescape()?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&unescaped);
                }
            }
            Event::CData(cdata) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&cdata));
                }
            }
            Event::End(_) => {
                // The root sentinel never pops; quick-xml rejects unbalanced tags.
                if stack.len() > 1 {
                    let element = stack.pop().expect("non-empty stack");
                    stack.last_mut().expect("root present").children.push(element);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(stack.pop().expect("root present"))
}

fn extract_record(
    element: &Element,
    source_file: &str,
    seen: &mut HashSet<String>,
) -> Result<Record, ParseError> {
    let iaid = find_alternative_number(element, "CALM RecordID")
        .ok_or(ParseError::MissingIdentifier)?
        .to_string();
    if !seen.insert(iaid.clone()) {
        return Err(ParseError::DuplicateIdentifier(iaid));
    }

    let level_text = element
        .child("record_type")
        .and_then(|rt| {
            rt.children
                .iter()
                .find(|c| c.name == "value" && c.attr("lang") == Some("neutral"))
        })
        .map(|v| v.text.trim().to_string())
        .ok_or_else(|| ParseError::MissingLevel(iaid.clone()))?;
    let level = Level::from_catalogue_text(&level_text).ok_or_else(|| {
        ParseError::UnrecognizedLevel {
            iaid: iaid.clone(),
            level: level_text,
        }
    })?;

    let held_by = element
        .child_text("institution.name")
        .and_then(|name| {
            HOLDERS
                .iter()
                .find(|(institution, _, _, _)| *institution == name)
        })
        .map(|(_, id, code, name)| {
            vec![Holder {
                reference_id: (*id).to_string(),
                reference_code: (*code).to_string(),
                reference_name: (*name).to_string(),
            }]
        })
        .unwrap_or_default();

    let digitised = element.child_text("digitised") == Some("x");

    let mut fields = Map::new();
    for child in &element.children {
        if CONSUMED_ELEMENTS.contains(&child.name.as_str()) {
            continue;
        }
        let value = element_to_value(child);
        insert_field(&mut fields, &child.name, value);
    }

    Ok(Record {
        iaid,
        level,
        fields,
        held_by,
        digitised,
        source_file: source_file.to_string(),
    })
}

fn find_alternative_number<'a>(record: &'a Element, kind: &str) -> Option<&'a str> {
    record
        .children
        .iter()
        .filter(|c| c.name == "Alternative_number")
        .find(|alt| alt.child_text("alternative_number.type") == Some(kind))
        .and_then(|alt| alt.child_text("alternative_number"))
}

/// Generic element -> JSON conversion: leaf elements become strings, nested
/// elements become objects, repeated names become arrays.
fn element_to_value(element: &Element) -> Value {
    if element.children.is_empty() {
        return Value::String(element.text.trim().to_string());
    }
    let mut map = Map::new();
    for child in &element.children {
        insert_field(&mut map, &child.name, element_to_value(child));
    }
    Value::Object(map)
}

fn insert_field(map: &mut Map<String, Value>, key: &str, value: Value) {
    match map.get_mut(key) {
        None => {
            map.insert(key.to_string(), value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}
