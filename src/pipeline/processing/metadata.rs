use crate::config::FieldRules;
use crate::error::{HarvestError, Result};
use crate::pipeline::utils::strip_html;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Creator {
    pub first_name: String,
    pub last_name: String,
    pub title: String,
    pub affix: String,
    pub creator_type: String,
    pub ppn: String,
    pub gnd_number: String,
}

/// Medium of the resolved superior work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuperiorType {
    #[default]
    Unresolved,
    Online,
    Print,
}

/// Subject-collection grouping assigned to the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SsgType {
    #[default]
    None,
    Fg0,
    Fg1,
    Fg01,
    Fg21,
}

impl SsgType {
    pub fn from_config_value(value: &str) -> Self {
        match value {
            "FG_0" => SsgType::Fg0,
            "FG_1" => SsgType::Fg1,
            "FG_0/1" => SsgType::Fg01,
            "FG_2,1" => SsgType::Fg21,
            _ => SsgType::None,
        }
    }

    pub fn codes(&self) -> &'static [&'static str] {
        match self {
            SsgType::None => &[],
            SsgType::Fg0 => &["0"],
            SsgType::Fg1 => &["1"],
            SsgType::Fg01 => &["0", "1"],
            SsgType::Fg21 => &["2,1"],
        }
    }
}

/// Normalized intermediate form of one harvested item. Created once per
/// item, consumed once by record generation, never persisted.
#[derive(Debug, Clone, Default)]
pub struct MetadataRecord {
    pub item_type: String,
    pub title: String,
    pub short_title: String,
    pub abstract_note: String,
    pub publication_title: String,
    pub volume: String,
    pub issue: String,
    pub pages: String,
    pub date: String,
    pub doi: String,
    pub language: String,
    pub url: String,
    pub issn: String,
    pub superior_ppn: String,
    pub superior_type: SuperiorType,
    pub license: String,
    pub ssg: SsgType,
    pub creators: Vec<Creator>,
    pub keywords: Vec<String>,
    pub custom_metadata: BTreeMap<String, String>,
}

/// The translation server encodes item notes as separate response entries.
/// Folds each trailing `note` entry into the preceding item's `notes` array
/// so every surviving entry is a self-contained item.
pub fn fold_notes_into_items(entries: Vec<Value>) -> Result<Vec<Value>> {
    let mut items: Vec<Value> = Vec::new();
    for entry in entries {
        let item_type = entry
            .get("itemType")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if item_type == "note" {
            let Some(last) = items.last_mut() else {
                return Err(HarvestError::Conversion(
                    "unexpected leading note object in translation server response".into(),
                ));
            };
            let note_text = entry.get("note").and_then(Value::as_str).unwrap_or_default();
            if let Some(notes) = last.get_mut("notes").and_then(Value::as_array_mut) {
                notes.push(serde_json::json!({ "note": note_text }));
            }
            continue;
        }

        let mut item = entry;
        if let Some(object) = item.as_object_mut() {
            object
                .entry("notes")
                .or_insert_with(|| Value::Array(Vec::new()));
        }
        items.push(item);
    }
    Ok(items)
}

fn visit_string_leaves_mut(value: &mut Value, f: &mut dyn FnMut(&str, &mut String)) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if let Value::String(s) = child {
                    f(key, s);
                } else {
                    visit_string_leaves_mut(child, f);
                }
            }
        }
        Value::Array(items) => {
            for child in items.iter_mut() {
                visit_string_leaves_mut(child, f);
            }
        }
        _ => {}
    }
}

fn visit_string_leaves(value: &Value, f: &mut dyn FnMut(&str, &str)) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if let Value::String(s) = child {
                    f(key, s);
                } else {
                    visit_string_leaves(child, f);
                }
            }
        }
        Value::Array(items) => {
            for child in items {
                visit_string_leaves(child, f);
            }
        }
        _ => {}
    }
}

/// Substituted by the override value's `%org%` placeholder.
const ORIGINAL_VALUE_SPECIFIER: &str = "%org%";

/// Applies the journal's suppression and override rules to every string
/// field of the raw item, suppressions first. Runs before any other
/// interpretation of the metadata.
pub fn apply_field_rules(item: &mut Value, rules: &FieldRules) {
    visit_string_leaves_mut(item, &mut |name, value| {
        if let Some(regex) = rules.suppressions.get(name) {
            if regex.is_match(value) {
                debug!(field = name, %value, "suppressing metadata field");
                value.clear();
            }
        }
    });
    visit_string_leaves_mut(item, &mut |name, value| {
        if let Some(replacement) = rules.overrides.get(name) {
            let new_value = replacement.replace(ORIGINAL_VALUE_SPECIFIER, value);
            debug!(field = name, old = %value, new = %new_value, "overriding metadata field");
            *value = new_value;
        }
    });
}

/// Checks the pre-conversion exclusion rules. Returns the matched
/// field/pattern description when the whole item must be dropped.
pub fn matches_exclusion_filters(item: &Value, rules: &FieldRules) -> Option<String> {
    if rules.exclusions.is_empty() {
        return None;
    }
    let mut matched = None;
    visit_string_leaves(item, &mut |name, value| {
        if matched.is_some() {
            return;
        }
        if let Some(regex) = rules.exclusions.get(name) {
            if regex.is_match(value) {
                matched = Some(format!("{name}/{}/", regex.as_str()));
            }
        }
    });
    matched
}

fn stripped_field(item: &Value, field: &str) -> String {
    strip_html(item.get(field).and_then(Value::as_str).unwrap_or_default())
}

/// Builds the typed record from one raw translator item, stripping HTML
/// markup from every free-text field.
pub fn from_translator_json(item: &Value) -> MetadataRecord {
    let mut record = MetadataRecord {
        item_type: stripped_field(item, "itemType"),
        title: stripped_field(item, "title"),
        short_title: stripped_field(item, "shortTitle"),
        abstract_note: stripped_field(item, "abstractNote"),
        publication_title: stripped_field(item, "publicationTitle"),
        volume: stripped_field(item, "volume"),
        issue: stripped_field(item, "issue"),
        pages: stripped_field(item, "pages"),
        date: stripped_field(item, "date"),
        doi: stripped_field(item, "DOI"),
        language: stripped_field(item, "language"),
        url: stripped_field(item, "url"),
        issn: stripped_field(item, "ISSN"),
        ..MetadataRecord::default()
    };

    if record.publication_title.is_empty() {
        record.publication_title = stripped_field(item, "websiteTitle");
    }

    if let Some(creators) = item.get("creators").and_then(Value::as_array) {
        for creator in creators {
            record.creators.push(Creator {
                first_name: stripped_field(creator, "firstName"),
                last_name: stripped_field(creator, "lastName"),
                creator_type: stripped_field(creator, "creatorType"),
                ..Creator::default()
            });
        }
    }

    if let Some(tags) = item.get("tags").and_then(Value::as_array) {
        for tag in tags {
            let keyword = stripped_field(tag, "tag");
            if !keyword.is_empty() {
                record.keywords.push(keyword);
            }
        }
    }

    // Translator notes carry non-standard metadata as "key:value" lines.
    if let Some(notes) = item.get("notes").and_then(Value::as_array) {
        for note in notes {
            let text = note.get("note").and_then(Value::as_str).unwrap_or_default();
            if text.is_empty() {
                continue;
            }
            match text.split_once(':') {
                Some((key, value)) => {
                    record
                        .custom_metadata
                        .insert(key.trim().to_string(), value.trim().to_string());
                }
                // could be a legitimate free-form note added by the translator
                None => warn!(note = text, "metadata note is missing a colon"),
            }
        }
    }

    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use serde_json::json;

    #[test]
    fn notes_fold_into_their_preceding_item() {
        let entries = vec![
            json!({"itemType": "journalArticle", "title": "A"}),
            json!({"itemType": "note", "note": "ssgn:1"}),
            json!({"itemType": "journalArticle", "title": "B"}),
        ];
        let items = fold_notes_into_items(entries).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["notes"][0]["note"], "ssgn:1");
        assert_eq!(items[1]["notes"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn leading_note_is_an_error() {
        let entries = vec![json!({"itemType": "note", "note": "orphan"})];
        assert!(fold_notes_into_items(entries).is_err());
    }

    #[test]
    fn suppression_and_override_rules_apply_to_string_leaves() {
        let mut rules = FieldRules::default();
        rules
            .suppressions
            .insert("abstractNote".into(), Regex::new("^no abstract").unwrap());
        rules
            .overrides
            .insert("language".into(), "ger".into());
        rules
            .overrides
            .insert("title".into(), "%org% [annotated]".into());

        let mut item = json!({
            "title": "Original",
            "abstractNote": "no abstract available",
            "language": "de",
        });
        apply_field_rules(&mut item, &rules);
        assert_eq!(item["abstractNote"], "");
        assert_eq!(item["language"], "ger");
        assert_eq!(item["title"], "Original [annotated]");
    }

    #[test]
    fn exclusion_filters_match_nested_fields() {
        let mut rules = FieldRules::default();
        rules
            .exclusions
            .insert("title".into(), Regex::new("(?i)table of contents").unwrap());
        let item = json!({"title": "Table of Contents", "itemType": "journalArticle"});
        assert!(matches_exclusion_filters(&item, &rules).is_some());

        let item = json!({"title": "A real article", "itemType": "journalArticle"});
        assert!(matches_exclusion_filters(&item, &rules).is_none());
    }

    #[test]
    fn extracts_typed_record_with_html_stripped() {
        let item = json!({
            "itemType": "journalArticle",
            "title": "The <i>Psalms</i> reconsidered",
            "publicationTitle": "",
            "websiteTitle": "Fallback Journal",
            "creators": [
                {"firstName": "Anna", "lastName": "Schmidt", "creatorType": "author"}
            ],
            "tags": [{"tag": "exegesis"}, {"tag": ""}],
            "notes": [{"note": "ssgn:1"}, {"note": "no colon here"}],
            "pages": "12-34",
        });
        let record = from_translator_json(&item);
        assert_eq!(record.title, "The Psalms reconsidered");
        assert_eq!(record.publication_title, "Fallback Journal");
        assert_eq!(record.creators.len(), 1);
        assert_eq!(record.creators[0].last_name, "Schmidt");
        assert_eq!(record.keywords, vec!["exegesis"]);
        assert_eq!(record.custom_metadata["ssgn"], "1");
        assert_eq!(record.custom_metadata.len(), 1);
    }
}
