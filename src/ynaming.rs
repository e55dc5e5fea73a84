//! Department-code renamer ("Y-naming").
//!
//! Scans free-text fields for occurrences of department codes. An occurrence
//! is an individual token match with its surrounding context windows, never
//! a whole-field containment check. Each occurrence is renamed with a
//! `Y` prefix when the code belongs to the definitive set and no exclusion
//! rule suppresses that specific occurrence; all other text is byte-identical.

use std::collections::BTreeSet;

use async_trait::async_trait;
use regex::Regex;

use crate::record::Record;
use crate::transform::{for_each_record_string_mut, TransformError, Transformer};

/// Department codes eligible for Y-prefixing. Codes outside the set are
/// never transformed.
#[derive(Debug, Clone)]
pub struct DefinitiveCodeSet {
    codes: BTreeSet<String>,
}

impl DefinitiveCodeSet {
    pub fn new(codes: impl IntoIterator<Item = String>) -> Self {
        Self {
            codes: codes.into_iter().map(|c| c.trim().to_string()).collect(),
        }
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// One candidate occurrence of a department code inside a field: the
/// matched token plus the text immediately around it.
#[derive(Debug)]
pub struct Occurrence<'a> {
    pub code: &'a str,
    /// Context window immediately before the occurrence (anchor with `$`).
    pub before: &'a str,
    /// Context window immediately after the occurrence (anchor with `^`).
    pub after: &'a str,
}

/// Suppresses transformation of individual occurrences. Every populated
/// constraint must hold; a rule matching one occurrence has no effect on
/// other occurrences in the same field.
#[derive(Debug, Clone)]
pub struct ExclusionRule {
    pub field: Option<String>,
    pub code: Option<String>,
    pub preceded_by: Option<Regex>,
    pub followed_by: Option<Regex>,
}

impl ExclusionRule {
    pub fn suppresses(&self, field_path: &str, occurrence: &Occurrence<'_>) -> bool {
        if let Some(field) = &self.field {
            if field != field_path {
                return false;
            }
        }
        if let Some(code) = &self.code {
            if code != occurrence.code {
                return false;
            }
        }
        if let Some(preceded_by) = &self.preceded_by {
            if !preceded_by.is_match(occurrence.before) {
                return false;
            }
        }
        if let Some(followed_by) = &self.followed_by {
            if !followed_by.is_match(occurrence.after) {
                return false;
            }
        }
        true
    }

    /// A rule must constrain something beyond the field, otherwise it would
    /// suppress every occurrence in that field.
    pub fn is_constrained(&self) -> bool {
        self.code.is_some() || self.preceded_by.is_some() || self.followed_by.is_some()
    }
}

/// Bytes of surrounding text made available to exclusion-rule context checks.
const CONTEXT_WINDOW: usize = 64;

pub struct YNaming {
    codes: DefinitiveCodeSet,
    rules: Vec<ExclusionRule>,
    token_re: Regex,
}

impl YNaming {
    pub fn new(codes: DefinitiveCodeSet, rules: Vec<ExclusionRule>) -> Self {
        Self {
            codes,
            rules,
            // Candidate tokens: letter-led runs of letters/digits/hyphens, so
            // a code embedded in a longer token (e.g. "POX") never matches.
            token_re: Regex::new(r"[A-Za-z][A-Za-z0-9-]*").expect("valid token pattern"),
        }
    }

    /// Rename every eligible, non-excluded occurrence in `text`. Returns
    /// `None` when nothing changed so callers can keep the original bytes.
    pub fn rename_in_text(&self, field_path: &str, text: &str) -> Option<String> {
        let mut out = String::new();
        let mut copied_to = 0usize;
        for token in self.token_re.find_iter(text) {
            let code = token.as_str();
            if !self.codes.contains(code) {
                continue;
            }
            let Some(renamed) = renamed_code(code) else {
                continue;
            };
            let occurrence = Occurrence {
                code,
                before: window_before(text, token.start()),
                after: window_after(text, token.end()),
            };
            if self
                .rules
                .iter()
                .any(|rule| rule.suppresses(field_path, &occurrence))
            {
                continue;
            }
            out.push_str(&text[copied_to..token.start()]);
            out.push_str(&renamed);
            copied_to = token.end();
        }
        if copied_to == 0 {
            return None;
        }
        out.push_str(&text[copied_to..]);
        Some(out)
    }
}

/// The Y-named form of an eligible code:
/// - `PARL` maps to `YUKP`;
/// - codes already starting with `Y` are left alone (no double prefix);
/// - otherwise prefix `Y`, capping the result at 4 characters
///   (`LONG` -> `YLON`).
fn renamed_code(code: &str) -> Option<String> {
    if code == "PARL" {
        return Some("YUKP".to_string());
    }
    if code.starts_with('Y') {
        return None;
    }
    let mut renamed = String::with_capacity(code.len() + 1);
    renamed.push('Y');
    renamed.push_str(code);
    if renamed.len() > 4 {
        renamed.truncate(4);
    }
    Some(renamed)
}

fn window_before(text: &str, offset: usize) -> &str {
    let mut start = offset.saturating_sub(CONTEXT_WINDOW);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..offset]
}

fn window_after(text: &str, offset: usize) -> &str {
    let mut end = (offset + CONTEXT_WINDOW).min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[offset..end]
}

#[async_trait]
impl Transformer for YNaming {
    fn name(&self) -> &'static str {
        "y_naming"
    }

    async fn apply(&self, record: &mut Record) -> Result<(), TransformError> {
        for_each_record_string_mut(record, &mut |path, text| {
            if let Some(renamed) = self.rename_in_text(path, text) {
                *text = renamed;
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(list: &[&str]) -> DefinitiveCodeSet {
        DefinitiveCodeSet::new(list.iter().map(|c| c.to_string()))
    }

    fn rule(
        field: Option<&str>,
        code: Option<&str>,
        preceded_by: Option<&str>,
        followed_by: Option<&str>,
    ) -> ExclusionRule {
        ExclusionRule {
            field: field.map(str::to_string),
            code: code.map(str::to_string),
            preceded_by: preceded_by.map(|p| Regex::new(p).unwrap()),
            followed_by: followed_by.map(|p| Regex::new(p).unwrap()),
        }
    }

    #[test]
    fn renames_only_definitive_codes() {
        let renamer = YNaming::new(codes(&["PO"]), vec![]);
        assert_eq!(
            renamer.rename_in_text("title", "PO and ZZ records").as_deref(),
            Some("YPO and ZZ records")
        );
        assert_eq!(renamer.rename_in_text("title", "ZZ only"), None);
    }

    #[test]
    fn marker_exclusion_suppresses_that_occurrence_only() {
        let renamer = YNaming::new(
            codes(&["PO"]),
            vec![rule(Some("title"), Some("PO"), Some(r"\(marker\s*$"), None)],
        );
        let out = renamer
            .rename_in_text("title", "(marker PO.BAT) PO is valid")
            .expect("second occurrence renamed");
        assert_eq!(out, "(marker PO.BAT) YPO is valid");
    }

    #[test]
    fn excluding_one_code_leaves_another_eligible_code_renamed() {
        let renamer = YNaming::new(
            codes(&["PO", "HL"]),
            vec![rule(None, Some("PO"), Some(r"see\s$"), None)],
        );
        let out = renamer
            .rename_in_text("notes", "see PO then HL then PO")
            .unwrap();
        assert_eq!(out, "see PO then YHL then YPO");
    }

    #[test]
    fn rules_scoped_to_another_field_do_not_apply() {
        let renamer = YNaming::new(
            codes(&["PO"]),
            vec![rule(Some("scopeContent.description"), Some("PO"), None, None)],
        );
        assert_eq!(
            renamer.rename_in_text("title", "PO").as_deref(),
            Some("YPO")
        );
        assert_eq!(renamer.rename_in_text("scopeContent.description", "PO"), None);
    }

    #[test]
    fn reference_paths_rename_only_the_leading_code() {
        let renamer = YNaming::new(codes(&["PO"]), vec![]);
        assert_eq!(
            renamer.rename_in_text("ref", "PO/1/2 cited").as_deref(),
            Some("YPO/1/2 cited")
        );
    }

    #[test]
    fn long_codes_are_capped_at_four_characters() {
        let renamer = YNaming::new(codes(&["LONG"]), vec![]);
        assert_eq!(
            renamer.rename_in_text("ref", "LONG/1").as_deref(),
            Some("YLON/1")
        );
    }

    #[test]
    fn parl_maps_to_yukp_and_y_codes_never_double_prefix() {
        let renamer = YNaming::new(codes(&["PARL", "YABC"]), vec![]);
        assert_eq!(
            renamer.rename_in_text("ref", "PARL/123 in text").as_deref(),
            Some("YUKP/123 in text")
        );
        assert_eq!(renamer.rename_in_text("ref", "already YABC/1 here"), None);
    }

    #[test]
    fn codes_embedded_in_longer_tokens_are_not_occurrences() {
        let renamer = YNaming::new(codes(&["PO"]), vec![]);
        assert_eq!(renamer.rename_in_text("title", "POX EXPO"), None);
    }

    #[test]
    fn untouched_text_is_byte_identical_around_renames() {
        let renamer = YNaming::new(codes(&["PO"]), vec![]);
        let text = "  weird   spacing\tPO\tand (punctuation) PO.";
        let out = renamer.rename_in_text("title", text).unwrap();
        assert_eq!(out, "  weird   spacing\tYPO\tand (punctuation) YPO.");
    }
}
