use crate::config::{GroupParams, JournalParams};
use crate::error::{HarvestError, Result};
use crate::pipeline::processing::augment::extract_year;
use crate::pipeline::processing::marc::{Field, Record, Subfield};
use crate::pipeline::processing::metadata::{MetadataRecord, SuperiorType};
use crate::pipeline::utils::collapse_whitespace;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Zotero creator types mapped to MARC 21 relator codes.
const CREATOR_TYPES_TO_RELATOR_CODES: &[(&str, &str)] = &[
    ("artist", "art"),
    ("attorneyAgent", "csl"),
    ("author", "aut"),
    ("bookAuthor", "edc"),
    ("cartographer", "ctg"),
    ("castMember", "act"),
    ("commenter", "cwt"),
    ("composer", "cmp"),
    ("contributor", "ctb"),
    ("cosponsor", "spn"),
    ("director", "drt"),
    ("editor", "edt"),
    ("guest", "pan"),
    ("interviewee", "ive"),
    ("inventor", "inv"),
    ("performer", "prf"),
    ("podcaster", "brd"),
    ("presenter", "pre"),
    ("producer", "pro"),
    ("programmer", "prg"),
    ("recipient", "rcp"),
    ("reviewedAuthor", "aut"),
    ("scriptwriter", "aus"),
    ("seriesEditor", "edt"),
    ("sponsor", "spn"),
    ("translator", "trl"),
    ("wordsBy", "wam"),
];

fn relator_code(creator_type: &str) -> Result<&'static str> {
    CREATOR_TYPES_TO_RELATOR_CODES
        .iter()
        .find(|(zotero, _)| *zotero == creator_type)
        .map(|(_, marc)| *marc)
        .ok_or_else(|| {
            HarvestError::Conversion(format!(
                "creator type '{creator_type}' could not be mapped to a relator code"
            ))
        })
}

#[derive(Debug)]
pub struct GeneratedRecord {
    pub record: Record,
    pub hash: String,
    /// Item URL used as the delivery-tracking key.
    pub url: String,
}

const TAG_LENGTH: usize = 3;

fn is_control_tag(tag: &str) -> bool {
    tag.starts_with("00")
}

static CUSTOM_FIELD_PLACEHOLDER_MATCHER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%([^%]+)%").unwrap());

/// Applies the journal's custom-field templates. A template whose
/// placeholder has no substitution in the record's custom metadata is
/// skipped; a template that is structurally broken is a configuration
/// error.
fn insert_custom_fields(
    metadata: &MetadataRecord,
    journal: &JournalParams,
    record: &mut Record,
) -> Result<()> {
    'templates: for template in &journal.record_rules.fields_to_add {
        let mut resolved = template.clone();
        for captures in CUSTOM_FIELD_PLACEHOLDER_MATCHER.captures_iter(template) {
            let placeholder = &captures[1];
            match metadata.custom_metadata.get(placeholder) {
                Some(substitution) => {
                    resolved = resolved.replace(&captures[0], substitution);
                }
                None => {
                    debug!(template = %template, placeholder, "custom field has a missing placeholder");
                    continue 'templates;
                }
            }
        }

        if resolved.len() < TAG_LENGTH + 1 {
            return Err(HarvestError::Config(format!(
                "custom field '{template}' is too short"
            )));
        }
        let (tag, rest) = resolved.split_at(TAG_LENGTH);
        if is_control_tag(tag) {
            record.insert_control_field(tag, rest);
            continue;
        }
        let mut chars = rest.chars();
        let (Some(ind1), Some(ind2)) = (chars.next(), chars.next()) else {
            return Err(HarvestError::Config(format!(
                "custom field '{template}' is too short"
            )));
        };
        let body: String = chars.collect();
        let mut subfields = Vec::new();
        if body.contains('\u{1f}') {
            for chunk in body.split('\u{1f}').filter(|c| !c.is_empty()) {
                let mut chunk_chars = chunk.chars();
                let code = chunk_chars.next().unwrap();
                subfields.push(Subfield::new(code, chunk_chars.collect::<String>()));
            }
        } else {
            let mut iter = body.chars();
            let Some(code) = iter.next() else {
                return Err(HarvestError::Config(format!(
                    "custom field '{template}' is too short"
                )));
            };
            let value: String = iter.collect();
            if value.is_empty() {
                return Err(HarvestError::Config(format!(
                    "custom field '{template}' is too short"
                )));
            }
            subfields.push(Subfield::new(code, value));
        }
        record.insert_field_with_indicators(tag, subfields, ind1, ind2);
        debug!(field = %resolved, "inserted custom field");
    }
    Ok(())
}

/// Matches a field against a `<tag>` or `<tag><subfield_code>` selector:
/// when the subfield is named and present its value is tested, otherwise
/// the whole field contents.
fn field_matches(field: &Field, selector: &str, matcher: &Regex) -> bool {
    if field.tag != selector[..TAG_LENGTH.min(selector.len())] {
        return false;
    }
    if let Some(code) = selector.chars().nth(TAG_LENGTH) {
        if let Some(value) = field.first_subfield(code) {
            return matcher.is_match(value);
        }
    }
    matcher.is_match(&field.contents())
}

fn apply_removal_filters(journal: &JournalParams, record: &mut Record) {
    for (selector, matcher) in &journal.record_rules.fields_to_remove {
        record.retain(|field| {
            let matched = field_matches(field, selector, matcher);
            if matched {
                debug!(selector = %selector, pattern = matcher.as_str(), "erased field due to removal filter");
            }
            !matched
        });
    }
}

/// Post-generation exclusion: returns the matched selector/pattern when the
/// whole record must be dropped.
pub fn matches_record_exclusion_filters(journal: &JournalParams, record: &Record) -> Option<String> {
    for (selector, matcher) in &journal.record_rules.exclusion_filters {
        if record
            .fields()
            .iter()
            .any(|field| field_matches(field, selector, matcher))
        {
            return Some(format!("{selector}/{}/", matcher.as_str()));
        }
    }
    None
}

/// Deterministic mapping from one normalized metadata record to a tagged
/// bibliographic record plus its content hash. The control number couples
/// identity to content: group name, current date and hash.
pub fn generate_record(
    metadata: &MetadataRecord,
    journal: &JournalParams,
    group: &GroupParams,
    harvest_url: &str,
) -> Result<GeneratedRecord> {
    let mut record = Record::new();

    record.insert_control_field("003", group.isil.clone());
    match metadata.superior_type {
        SuperiorType::Print => record.insert_control_field("007", "tu"),
        _ => record.insert_control_field("007", "cr|||||"),
    }

    // Creators are inserted in reverse order because insertion is positional
    // (first at top). The single/first creator is the primary one.
    for (index, creator) in metadata.creators.iter().enumerate().rev() {
        let mut subfields = Vec::new();
        if !creator.ppn.is_empty() {
            subfields.push(Subfield::new('0', format!("(DE-627){}", creator.ppn)));
        }
        if !creator.gnd_number.is_empty() {
            subfields.push(Subfield::new('0', format!("(DE-588){}", creator.gnd_number)));
        }
        if !creator.creator_type.is_empty() {
            subfields.push(Subfield::new('4', relator_code(&creator.creator_type)?));
        }
        let name = if creator.first_name.is_empty() {
            creator.last_name.clone()
        } else {
            format!("{}, {}", creator.last_name, creator.first_name)
        };
        subfields.push(Subfield::new('a', name));
        if !creator.affix.is_empty() {
            subfields.push(Subfield::new('b', format!("{}.", creator.affix)));
        }
        if !creator.title.is_empty() {
            subfields.push(Subfield::new('c', creator.title.clone()));
        }
        subfields.push(Subfield::new('e', "VerfasserIn"));

        let tag = if index == 0 { "100" } else { "700" };
        record.insert_field_with_indicators(tag, subfields, '1', ' ');
    }

    record.insert_field(
        "040",
        vec![
            Subfield::new('a', "DE-627"),
            Subfield::new('b', "ger"),
            Subfield::new('c', "DE-627"),
            Subfield::new('e', "rda"),
        ],
    );

    if metadata.title.is_empty() {
        return Err(HarvestError::Conversion(format!(
            "no title provided for item from URL {harvest_url}"
        )));
    }
    record.insert_field_with_indicators(
        "245",
        vec![Subfield::new('a', metadata.title.clone())],
        '0',
        '0',
    );

    if !metadata.language.is_empty() {
        record.insert_field("041", vec![Subfield::new('a', metadata.language.clone())]);
    }
    if !metadata.abstract_note.is_empty() {
        record.insert_field("520", vec![Subfield::new('a', metadata.abstract_note.clone())]);
    }

    let item_type = metadata.item_type.as_str();
    if !metadata.date.is_empty() && item_type != "journalArticle" && item_type != "review" {
        record.insert_field("362", vec![Subfield::new('a', metadata.date.clone())]);
    }

    let year = extract_year(&metadata.date)
        .unwrap_or_else(|| Utc::now().format("%Y").to_string());
    record.insert_field("264", vec![Subfield::new('c', year.clone())]);

    let license_note = if metadata.license == "LF" {
        Some("Kostenfrei")
    } else {
        None
    };
    if !metadata.url.is_empty() {
        let mut subfields = vec![Subfield::new('u', metadata.url.clone())];
        if let Some(note) = license_note {
            subfields.push(Subfield::new('z', note));
        }
        record.insert_field_with_indicators("856", subfields, '4', '0');
    }

    if !metadata.doi.is_empty() {
        record.insert_field_with_indicators(
            "024",
            vec![
                Subfield::new('a', metadata.doi.clone()),
                Subfield::new('2', "doi"),
            ],
            '7',
            ' ',
        );
        let doi_url = format!("https://doi.org/{}", metadata.doi);
        if doi_url != metadata.url {
            let mut subfields = vec![Subfield::new('u', doi_url)];
            if let Some(note) = license_note {
                subfields.push(Subfield::new('z', note));
            }
            record.insert_field_with_indicators("856", subfields, '4', '0');
        }
    }

    if item_type == "review" {
        record.insert_field_with_indicators(
            "655",
            vec![
                Subfield::new('a', "Rezension"),
                Subfield::new('0', "(DE-588)4049712-4"),
                Subfield::new('0', "(DE-627)106186019"),
                Subfield::new('2', "gnd-content"),
            ],
            ' ',
            '7',
        );
    }

    // Differentiating volume/issue/page block
    let mut _936_subfields = Vec::new();
    if !metadata.volume.is_empty() {
        _936_subfields.push(Subfield::new('d', metadata.volume.clone()));
        if !metadata.issue.is_empty() {
            _936_subfields.push(Subfield::new('e', metadata.issue.clone()));
        }
    } else if !metadata.issue.is_empty() {
        _936_subfields.push(Subfield::new('d', metadata.issue.clone()));
    }
    if !metadata.pages.is_empty() {
        _936_subfields.push(Subfield::new('h', metadata.pages.clone()));
    }
    _936_subfields.push(Subfield::new('j', year.clone()));
    record.insert_field_with_indicators("936", _936_subfields, 'u', 'w');

    // Superior work linkage
    let mut _773_subfields = Vec::new();
    if !metadata.publication_title.is_empty() {
        _773_subfields.push(Subfield::new('i', "In: "));
        _773_subfields.push(Subfield::new('t', metadata.publication_title.clone()));
    }
    if !metadata.issn.is_empty() {
        _773_subfields.push(Subfield::new('x', metadata.issn.clone()));
    }
    if !metadata.superior_ppn.is_empty() {
        _773_subfields.push(Subfield::new('w', format!("(DE-627){}", metadata.superior_ppn)));
    }
    let linkage_present = !_773_subfields.is_empty();
    let mut enumeration_present = false;
    if !metadata.volume.is_empty() {
        let mut enumeration = format!("{} ({year})", metadata.volume);
        if !metadata.issue.is_empty() {
            enumeration.push_str(&format!(", {}", metadata.issue));
        }
        if !metadata.pages.is_empty() {
            enumeration.push_str(&format!(", Seite {}", metadata.pages));
        }
        _773_subfields.push(Subfield::new('g', enumeration));
        enumeration_present = true;
    }
    if linkage_present && enumeration_present {
        record.insert_field_with_indicators("773", _773_subfields, '0', '8');
    } else {
        record.insert_field("773", _773_subfields);
    }

    for keyword in metadata.keywords.iter().rev() {
        record.insert_field_with_indicators(
            "650",
            vec![Subfield::new('a', collapse_whitespace(keyword))],
            ' ',
            '4',
        );
    }

    let ssg_codes = metadata.ssg.codes();
    if !ssg_codes.is_empty() {
        let mut subfields: Vec<Subfield> = ssg_codes
            .iter()
            .map(|code| Subfield::new('a', *code))
            .collect();
        subfields.push(Subfield::new('2', "ssgn"));
        record.insert_field("084", subfields);
    }

    // Institutional/source markers
    record.insert_field(
        "935",
        vec![Subfield::new('a', "zota"), Subfield::new('2', "LOK")],
    );
    record.insert_field("852", vec![Subfield::new('a', group.isil.clone())]);

    // Bookkeeping fields, excluded from the content hash
    record.insert_field("URL", vec![Subfield::new('a', harvest_url)]);
    record.insert_field(
        "ZID",
        vec![Subfield::new('a', journal.zeder_id.to_string())],
    );
    record.insert_field("JOU", vec![Subfield::new('a', journal.name.clone())]);

    insert_custom_fields(metadata, journal, &mut record)?;
    apply_removal_filters(journal, &mut record);

    // Generated last: the control number embeds the content hash.
    let hash = record.content_hash();
    record.insert_control_field(
        "001",
        format!("{}#{}#{}", group.name, Utc::now().format("%Y-%m-%d"), hash),
    );

    let url = if metadata.url.is_empty() {
        harvest_url.to_string()
    } else {
        metadata.url.clone()
    };
    Ok(GeneratedRecord { record, hash, url })
}
