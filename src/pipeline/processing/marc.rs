use sha2::{Digest, Sha256};

/// Bookkeeping tags carry run metadata (source URL, journal registry id,
/// journal name). They are excluded from the content hash so re-harvesting
/// unchanged content yields an identical hash, and they never reach the
/// delivered record body's descriptive section semantics.
pub const BOOKKEEPING_TAGS: &[&str] = &["URL", "ZID", "JOU"];

pub const CONTROL_NUMBER_TAG: &str = "001";

#[derive(Debug, Clone, PartialEq)]
pub struct Subfield {
    pub code: char,
    pub value: String,
}

impl Subfield {
    pub fn new(code: char, value: impl Into<String>) -> Self {
        Subfield {
            code,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldData {
    Control(String),
    Data {
        ind1: char,
        ind2: char,
        subfields: Vec<Subfield>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub tag: String,
    pub data: FieldData,
}

impl Field {
    pub fn subfields(&self) -> &[Subfield] {
        match &self.data {
            FieldData::Control(_) => &[],
            FieldData::Data { subfields, .. } => subfields,
        }
    }

    pub fn first_subfield(&self, code: char) -> Option<&str> {
        self.subfields()
            .iter()
            .find(|sf| sf.code == code)
            .map(|sf| sf.value.as_str())
    }

    /// Flat content used for regex matching and hashing.
    pub fn contents(&self) -> String {
        match &self.data {
            FieldData::Control(value) => value.clone(),
            FieldData::Data {
                ind1,
                ind2,
                subfields,
            } => {
                let mut out = String::new();
                out.push(*ind1);
                out.push(*ind2);
                for sf in subfields {
                    out.push('\u{1f}');
                    out.push(sf.code);
                    out.push_str(&sf.value);
                }
                out
            }
        }
    }
}

/// An ordered, tagged, sub-fielded bibliographic record. Fields are kept
/// sorted by tag; insertion places a field *before* existing fields with
/// the same tag, so building repeated tags in reverse source order
/// preserves that order in the record.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: Vec<Field>,
}

impl Record {
    pub fn new() -> Self {
        Record::default()
    }

    fn insert(&mut self, field: Field) {
        let position = self
            .fields
            .iter()
            .position(|existing| existing.tag.as_str() >= field.tag.as_str())
            .unwrap_or(self.fields.len());
        self.fields.insert(position, field);
    }

    pub fn insert_control_field(&mut self, tag: &str, value: impl Into<String>) {
        self.insert(Field {
            tag: tag.to_string(),
            data: FieldData::Control(value.into()),
        });
    }

    pub fn insert_field(&mut self, tag: &str, subfields: Vec<Subfield>) {
        self.insert_field_with_indicators(tag, subfields, ' ', ' ');
    }

    pub fn insert_field_with_indicators(
        &mut self,
        tag: &str,
        subfields: Vec<Subfield>,
        ind1: char,
        ind2: char,
    ) {
        self.insert(Field {
            tag: tag.to_string(),
            data: FieldData::Data {
                ind1,
                ind2,
                subfields,
            },
        });
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.fields.iter().any(|f| f.tag == tag)
    }

    pub fn fields_with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Field> + 'a {
        self.fields.iter().filter(move |f| f.tag == tag)
    }

    pub fn retain<F: FnMut(&Field) -> bool>(&mut self, predicate: F) {
        self.fields.retain(predicate);
    }

    /// Content hash over all fields except the control number and the
    /// bookkeeping fields.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for field in &self.fields {
            if field.tag == CONTROL_NUMBER_TAG || BOOKKEEPING_TAGS.contains(&field.tag.as_str()) {
                continue;
            }
            hasher.update(field.tag.as_bytes());
            hasher.update([0x1e]);
            hasher.update(field.contents().as_bytes());
            hasher.update([0x1d]);
        }
        hex::encode(hasher.finalize())
    }

    /// Serializes the record as a MARCXML `<record>` element.
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<record>");
        out.push_str("<leader>00000nab a2200000   4500</leader>");
        for field in &self.fields {
            match &field.data {
                FieldData::Control(value) => {
                    out.push_str(&format!(
                        r#"<controlfield tag="{}">{}</controlfield>"#,
                        escape_xml(&field.tag),
                        escape_xml(value)
                    ));
                }
                FieldData::Data {
                    ind1,
                    ind2,
                    subfields,
                } => {
                    out.push_str(&format!(
                        r#"<datafield tag="{}" ind1="{}" ind2="{}">"#,
                        escape_xml(&field.tag),
                        ind1,
                        ind2
                    ));
                    for sf in subfields {
                        out.push_str(&format!(
                            r#"<subfield code="{}">{}</subfield>"#,
                            sf.code,
                            escape_xml(&sf.value)
                        ));
                    }
                    out.push_str("</datafield>");
                }
            }
        }
        out.push_str("</record>");
        out
    }
}

pub fn collection_to_xml(records: &[Record]) -> String {
    let mut out = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><collection xmlns="http://www.loc.gov/MARC21/slim">"#,
    );
    for record in records {
        out.push_str(&record.to_xml());
    }
    out.push_str("</collection>");
    out
}

fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_stay_ordered_and_equal_tags_insert_first() {
        let mut record = Record::new();
        record.insert_field("700", vec![Subfield::new('a', "Second, Author")]);
        record.insert_field("245", vec![Subfield::new('a', "Title")]);
        record.insert_field("700", vec![Subfield::new('a', "First, Author")]);
        record.insert_control_field("003", "DE-21");

        let tags: Vec<&str> = record.fields().iter().map(|f| f.tag.as_str()).collect();
        assert_eq!(tags, vec!["003", "245", "700", "700"]);
        // last inserted 700 sits before the earlier one
        assert_eq!(
            record.fields_with_tag("700").next().unwrap().first_subfield('a'),
            Some("First, Author")
        );
    }

    #[test]
    fn bookkeeping_fields_do_not_affect_the_hash() {
        let mut record = Record::new();
        record.insert_field("245", vec![Subfield::new('a', "Title")]);
        let bare_hash = record.content_hash();

        record.insert_field("URL", vec![Subfield::new('a', "https://example.org/1")]);
        record.insert_field("ZID", vec![Subfield::new('a', "42")]);
        record.insert_field("JOU", vec![Subfield::new('a', "Journal of Examples")]);
        record.insert_control_field("001", "Group#2020-01-01#abc");
        assert_eq!(record.content_hash(), bare_hash);

        record.insert_field("100", vec![Subfield::new('a', "Schmidt, Anna")]);
        assert_ne!(record.content_hash(), bare_hash);
    }

    #[test]
    fn hash_is_deterministic() {
        let build = || {
            let mut record = Record::new();
            record.insert_field("245", vec![Subfield::new('a', "Title")]);
            record.insert_field_with_indicators(
                "856",
                vec![Subfield::new('u', "https://example.org")],
                '4',
                '0',
            );
            record.content_hash()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn xml_serialization_escapes_content() {
        let mut record = Record::new();
        record.insert_field("245", vec![Subfield::new('a', "Faith & <Reason>")]);
        let xml = record.to_xml();
        assert!(xml.contains("Faith &amp; &lt;Reason&gt;"));
        assert!(xml.contains(r#"<datafield tag="245""#));
    }
}
