use crate::config::JournalParams;
use crate::error::{HarvestError, Result};
use crate::pipeline::processing::authors::{post_process_author_name, AuthorityClient};
use crate::pipeline::processing::language;
use crate::pipeline::processing::metadata::{MetadataRecord, SsgType, SuperiorType};
use crate::pipeline::utils::roman_to_decimal;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static PAGE_RANGE_MATCHER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+)-(.+)$").unwrap());
static PAGE_RANGE_DIGIT_MATCHER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)-(\d+)$").unwrap());
static PAGE_ROMAN_NUMERAL_MATCHER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^M{0,4}(CM|CD|D?C{0,3})(XC|XL|L?X{0,3})(IX|IV|V?I{0,3})$").unwrap()
});
static YEAR_MATCHER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4})\b").unwrap());

/// Fallback parse formats tried after the configured ones.
const FALLBACK_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%d/%m/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
];

/// Normalizes a publication date to `YYYY-MM-DD`. The journal's configured
/// formats are tried first, then the fallback set, then RFC 3339/2822 and
/// partial (month/year-only) forms.
pub fn normalize_date(raw: &str, formats: &[String]) -> Result<String> {
    let raw = raw.trim();
    for format in formats
        .iter()
        .map(String::as_str)
        .chain(FALLBACK_DATE_FORMATS.iter().copied())
    {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Ok(date.format("%Y-%m-%d").to_string());
        }
    }
    if let Ok(date) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Ok(date.date_naive().format("%Y-%m-%d").to_string());
    }
    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(raw) {
        return Ok(date.date_naive().format("%Y-%m-%d").to_string());
    }
    // month/year-only dates are padded to the first day
    for (format, suffix) in [("%Y-%m %d", " 1"), ("%B %Y %d", " 1"), ("%Y %m %d", " 1 1")] {
        if let Ok(date) = NaiveDate::parse_from_str(&format!("{raw}{suffix}"), format) {
            return Ok(date.format("%Y-%m-%d").to_string());
        }
    }
    Err(HarvestError::BadDateFormat(raw.to_string()))
}

/// First four-digit number found in a normalized or raw date string.
pub fn extract_year(date: &str) -> Option<String> {
    YEAR_MATCHER
        .captures(date)
        .map(|captures| captures[1].to_string())
}

fn convert_page_endpoint(endpoint: &str) -> String {
    if !endpoint.is_empty() && PAGE_ROMAN_NUMERAL_MATCHER.is_match(endpoint) {
        if let Some(decimal) = roman_to_decimal(endpoint) {
            return decimal.to_string();
        }
    }
    endpoint.to_string()
}

/// Converts Roman-numeral page ranges to decimal and collapses ranges with
/// equal endpoints to a single page number.
pub fn normalize_pages(pages: &str) -> String {
    let mut normalized = pages.to_string();
    let uppercased = pages.to_uppercase();
    if let Some(captures) = PAGE_RANGE_MATCHER.captures(&uppercased) {
        let converted = format!(
            "{}-{}",
            convert_page_endpoint(&captures[1]),
            convert_page_endpoint(&captures[2])
        );
        if converted != uppercased {
            debug!(from = pages, to = %converted, "converted roman numeral page range");
            normalized = converted;
        }
    }
    if let Some(captures) = PAGE_RANGE_DIGIT_MATCHER.captures(&normalized) {
        if captures[1] == captures[2] {
            normalized = captures[1].to_string();
        }
    }
    normalized
}

/// Resolves the canonical ISSN and superior catalog id: online wins over
/// print wins over whatever the source reported. A chosen ISSN without its
/// catalog id is a fatal per-item configuration error.
fn resolve_superior(record: &mut MetadataRecord, journal: &JournalParams) -> Result<()> {
    if !journal.issn_online.is_empty() {
        if journal.ppn_online.is_empty() {
            return Err(HarvestError::Config(format!(
                "cannot use online ISSN \"{}\" because no online PPN is given",
                journal.issn_online
            )));
        }
        record.issn = journal.issn_online.clone();
        record.superior_ppn = journal.ppn_online.clone();
        record.superior_type = SuperiorType::Online;
        Ok(())
    } else if !journal.issn_print.is_empty() {
        if journal.ppn_print.is_empty() {
            return Err(HarvestError::Config(format!(
                "cannot use print ISSN \"{}\" because no print PPN is given",
                journal.issn_print
            )));
        }
        record.issn = journal.issn_print.clone();
        record.superior_ppn = journal.ppn_print.clone();
        record.superior_type = SuperiorType::Print;
        Ok(())
    } else {
        Err(HarvestError::Config(format!(
            "ISSN and PPN could not be chosen! ISSN online: \"{}\", ISSN print: \"{}\", ISSN from source: \"{}\"",
            journal.issn_online, journal.issn_print, record.issn
        )))
    }
}

fn resolve_language(record: &mut MetadataRecord, journal: &JournalParams) {
    let params = &journal.language;

    let autodetect = params.force_automatic_detection
        || record.language.is_empty()
        || !language::is_plausible_language_code(&record.language);

    if !autodetect {
        record.language = language::to_bibliographic_code(&record.language);
        return;
    }

    if params.expected_languages.is_empty() {
        return;
    }
    if params.expected_languages.len() == 1 {
        record.language = params.expected_languages.iter().next().unwrap().clone();
        debug!(language = %record.language, "language set to the single expected language");
        return;
    }

    const MINIMUM_TOKEN_COUNT: usize = 5;
    let text = match params.source_text_fields.as_str() {
        "abstract" => record.abstract_note.clone(),
        "title+abstract" => format!("{} {}", record.title, record.abstract_note),
        // default: the title, widened by the abstract when too short
        _ => {
            if record.title.split_whitespace().count() < MINIMUM_TOKEN_COUNT {
                format!("{} {}", record.title, record.abstract_note)
            } else {
                record.title.clone()
            }
        }
    };

    if let Some(detected) = language::classify(&text, &params.expected_languages) {
        debug!(language = %detected, "automatically detected language");
        record.language = detected;
    }
}

fn tag_reviews(record: &mut MetadataRecord, journal: &JournalParams) {
    let Some(matcher) = &journal.review_regex else {
        return;
    };
    let matched = matcher.is_match(&record.title)
        || matcher.is_match(&record.short_title)
        || record.keywords.iter().any(|k| matcher.is_match(k));
    if matched {
        debug!("title, short title or keyword matched the review pattern");
        record.item_type = "review".to_string();
    }
}

/// Applies the full augmentation sequence to a freshly extracted record.
/// The order matters: later steps depend on earlier ones.
pub async fn augment_metadata_record(
    record: &mut MetadataRecord,
    journal: &JournalParams,
    authority: Option<&AuthorityClient>,
) -> Result<()> {
    if !record.date.is_empty() {
        record.date = normalize_date(&record.date, &journal.date_formats)?;
    }

    record.issue = record.issue.trim_start_matches('0').to_string();
    record.volume = record.volume.trim_start_matches('0').to_string();
    record.pages = normalize_pages(&record.pages);

    // the configured journal name is authoritative for the superior title
    record.publication_title = journal.name.clone();

    resolve_superior(record, journal)?;

    for creator in &mut record.creators {
        post_process_author_name(creator);
        if creator.last_name.is_empty() {
            continue;
        }
        if let Some(authority) = authority {
            let mut combined = creator.last_name.clone();
            if !creator.first_name.is_empty() {
                combined.push_str(", ");
                combined.push_str(&creator.first_name);
            }
            let ids = authority.lookup(&combined).await;
            creator.ppn = ids.ppn.unwrap_or_default();
            creator.gnd_number = ids.gnd.unwrap_or_default();
        }
    }

    resolve_language(record, journal);

    record.license = journal.license.clone();
    record.ssg = SsgType::from_config_value(&journal.ssgn);

    tag_reviews(record, journal);

    Ok(())
}

const ONLINE_FIRST_ITEM_TYPES: &[&str] = &["journalArticle", "magazineArticle", "review"];

/// Online-first articles have neither issue nor volume yet. They are
/// excluded unless a DOI already identifies them, or unconditionally when
/// the journal is configured that way.
pub fn is_online_first_exclusion(record: &MetadataRecord, skip_unconditionally: bool) -> bool {
    if !ONLINE_FIRST_ITEM_TYPES.contains(&record.item_type.as_str()) {
        return false;
    }
    if record.issue.is_empty() && record.volume.is_empty() {
        if skip_unconditionally {
            return true;
        }
        return record.doi.is_empty();
    }
    false
}

/// Early-view articles carry a "not applicable" sentinel in issue or volume.
pub fn is_early_view_exclusion(record: &MetadataRecord) -> bool {
    if !ONLINE_FIRST_ITEM_TYPES.contains(&record.item_type.as_str()) {
        return false;
    }
    record.issue == "n/a" || record.volume == "n/a"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LanguageParams;

    fn journal() -> JournalParams {
        JournalParams {
            name: "Journal of Examples".to_string(),
            zeder_id: 42,
            group: "Divinity".to_string(),
            entry_point_url: "https://example.org".to_string(),
            harvester_type: crate::config::HarvesterType::Direct,
            delivery_mode: crate::config::DeliveryMode::None,
            ppn_online: "012345678".to_string(),
            ppn_print: String::new(),
            issn_online: "1234-5678".to_string(),
            issn_print: String::new(),
            ssgn: "FG_1".to_string(),
            license: String::new(),
            date_formats: vec!["%d.%m.%Y".to_string(), "%Y-%m-%d".to_string()],
            review_regex: Some(Regex::new("(?i)^review").unwrap()),
            language: LanguageParams::parse("eng"),
            crawl: Default::default(),
            field_rules: Default::default(),
            record_rules: Default::default(),
        }
    }

    fn article() -> MetadataRecord {
        MetadataRecord {
            item_type: "journalArticle".to_string(),
            title: "A study of something quite specific".to_string(),
            date: "24.12.2019".to_string(),
            volume: "12".to_string(),
            issue: "3".to_string(),
            pages: "5-25".to_string(),
            url: "https://example.org/articles/1".to_string(),
            ..MetadataRecord::default()
        }
    }

    #[tokio::test]
    async fn full_augmentation_resolves_date_superior_and_language() {
        let journal = journal();
        let mut record = article();
        augment_metadata_record(&mut record, &journal, None)
            .await
            .unwrap();

        assert_eq!(record.date, "2019-12-24");
        assert_eq!(record.issn, "1234-5678");
        assert_eq!(record.superior_ppn, "012345678");
        assert_eq!(record.superior_type, SuperiorType::Online);
        assert_eq!(record.publication_title, "Journal of Examples");
        assert_eq!(record.language, "eng");
        assert_eq!(record.ssg, SsgType::Fg1);
    }

    #[tokio::test]
    async fn missing_ppn_for_chosen_issn_is_a_config_error() {
        let mut journal = journal();
        journal.ppn_online.clear();
        let mut record = article();
        let err = augment_metadata_record(&mut record, &journal, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigError);
    }

    #[tokio::test]
    async fn unparseable_dates_are_reported_not_ignored() {
        let journal = journal();
        let mut record = article();
        record.date = "Michaelmas term".to_string();
        let err = augment_metadata_record(&mut record, &journal, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::BadDateFormat(_)));
    }

    #[tokio::test]
    async fn review_regex_reclassifies_the_item_type() {
        let journal = journal();
        let mut record = article();
        record.title = "Review of an important monograph".to_string();
        augment_metadata_record(&mut record, &journal, None)
            .await
            .unwrap();
        assert_eq!(record.item_type, "review");
    }

    #[test]
    fn date_fallbacks_cover_partial_dates() {
        let formats = vec![];
        assert_eq!(normalize_date("2020-05-06", &formats).unwrap(), "2020-05-06");
        assert_eq!(normalize_date("May 6, 2020", &formats).unwrap(), "2020-05-06");
        assert_eq!(normalize_date("2020-05", &formats).unwrap(), "2020-05-01");
        assert_eq!(normalize_date("2020", &formats).unwrap(), "2020-01-01");
        assert!(normalize_date("not a date", &formats).is_err());
    }

    #[test]
    fn page_ranges_normalize_roman_numerals_and_collapse() {
        assert_eq!(normalize_pages("xii-xv"), "12-15");
        assert_eq!(normalize_pages("IV-IX"), "4-9");
        assert_eq!(normalize_pages("7-7"), "7");
        assert_eq!(normalize_pages("12-34"), "12-34");
        assert_eq!(normalize_pages("e101"), "e101");
    }

    #[test]
    fn online_first_and_early_view_predicates() {
        let mut record = article();
        record.issue.clear();
        record.volume.clear();
        record.doi.clear();
        assert!(is_online_first_exclusion(&record, false));

        record.doi = "10.1/x".to_string();
        assert!(!is_online_first_exclusion(&record, false));
        // unconditional skip ignores the DOI
        assert!(is_online_first_exclusion(&record, true));

        let mut record = article();
        record.issue = "n/a".to_string();
        assert!(is_early_view_exclusion(&record));
        let mut record = article();
        record.item_type = "blogPost".to_string();
        record.issue = "n/a".to_string();
        assert!(!is_early_view_exclusion(&record));
    }

    #[test]
    fn year_extraction() {
        assert_eq!(extract_year("2019-12-24"), Some("2019".to_string()));
        assert_eq!(extract_year("ca. 1999"), Some("1999".to_string()));
        assert_eq!(extract_year("n.d."), None);
    }
}
