use crate::error::{HarvestError, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// URL discovery strategy for one journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvesterType {
    Direct,
    Rss,
    Crawl,
}

impl HarvesterType {
    pub fn from_config_value(value: &str) -> Result<Self> {
        match value {
            "DIRECT" => Ok(HarvesterType::Direct),
            "RSS" => Ok(HarvesterType::Rss),
            "CRAWL" => Ok(HarvesterType::Crawl),
            other => Err(HarvestError::Config(format!(
                "invalid zotero_type '{other}' (expected RSS, CRAWL or DIRECT)"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HarvesterType::Direct => "DIRECT",
            HarvesterType::Rss => "RSS",
            HarvesterType::Crawl => "CRAWL",
        }
    }
}

/// Delivery mode under which harvested records are tracked and emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    None,
    Test,
    Live,
}

impl DeliveryMode {
    pub fn from_config_value(value: &str) -> Result<Self> {
        match value {
            "NONE" => Ok(DeliveryMode::None),
            "TEST" => Ok(DeliveryMode::Test),
            "LIVE" => Ok(DeliveryMode::Live),
            other => Err(HarvestError::Config(format!(
                "invalid zotero_delivery_mode '{other}' (expected NONE, TEST or LIVE)"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::None => "NONE",
            DeliveryMode::Test => "TEST",
            DeliveryMode::Live => "LIVE",
        }
    }
}

/// Process-wide settings, loaded once per run from the top level of the
/// config file.
#[derive(Debug)]
pub struct GlobalParams {
    pub translation_server_url: String,
    pub download_timeout: Duration,
    pub crawl_timeout: Duration,
    pub default_download_delay: Duration,
    pub max_download_delay: Duration,
    pub rss_harvest_interval: Duration,
    pub common_date_format: String,
    pub skip_online_first_unconditionally: bool,
    pub supported_url_regex: Option<Regex>,
}

/// One delivery group; immutable after load.
#[derive(Debug, Clone)]
pub struct GroupParams {
    pub name: String,
    pub user_agent: String,
    pub isil: String,
    pub author_swb_lookup_url: String,
    pub author_lobid_lookup_query_params: String,
}

/// Language resolution settings parsed from `zotero_expected_languages`.
/// Syntax: `[*][source_field:]lang1,lang2,...` where a leading `*` forces
/// automatic detection and the optional selector names the text fed to it.
#[derive(Debug, Clone, Default)]
pub struct LanguageParams {
    pub force_automatic_detection: bool,
    pub source_text_fields: String,
    pub expected_languages: BTreeSet<String>,
}

impl LanguageParams {
    pub fn parse(raw: &str) -> Self {
        let mut params = LanguageParams::default();
        let mut rest = raw.trim();
        if let Some(stripped) = rest.strip_prefix('*') {
            params.force_automatic_detection = true;
            rest = stripped;
        }
        if let Some((fields, languages)) = rest.split_once(':') {
            params.source_text_fields = fields.to_string();
            rest = languages;
        }
        params.expected_languages = rest
            .split(',')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        params
    }
}

#[derive(Debug, Default)]
pub struct CrawlParams {
    pub max_crawl_depth: u32,
    pub extraction_regex: Option<Regex>,
    pub crawl_url_regex: Option<Regex>,
}

/// Rules applied to the raw metadata JSON before conversion.
#[derive(Debug, Default)]
pub struct FieldRules {
    pub overrides: BTreeMap<String, String>,
    pub suppressions: BTreeMap<String, Regex>,
    pub exclusions: BTreeMap<String, Regex>,
}

/// Rules applied to the generated bibliographic record.
#[derive(Debug, Default)]
pub struct RecordRules {
    pub fields_to_add: Vec<String>,
    pub fields_to_remove: BTreeMap<String, Regex>,
    pub exclusion_filters: BTreeMap<String, Regex>,
}

/// Per-journal harvesting parameters; immutable after load, shared read-only
/// by all harvest operations of a run.
#[derive(Debug)]
pub struct JournalParams {
    pub name: String,
    pub zeder_id: u32,
    pub group: String,
    pub entry_point_url: String,
    pub harvester_type: HarvesterType,
    pub delivery_mode: DeliveryMode,
    pub ppn_online: String,
    pub ppn_print: String,
    pub issn_online: String,
    pub issn_print: String,
    pub ssgn: String,
    pub license: String,
    pub date_formats: Vec<String>,
    pub review_regex: Option<Regex>,
    pub language: LanguageParams,
    pub crawl: CrawlParams,
    pub field_rules: FieldRules,
    pub record_rules: RecordRules,
}

/// Journals and groups are shared read-only with concurrently executing
/// conversion tasklets, hence the `Arc` wrappers.
#[derive(Debug)]
pub struct HarvesterConfig {
    pub global: GlobalParams,
    pub groups: BTreeMap<String, Arc<GroupParams>>,
    pub journals: Vec<Arc<JournalParams>>,
}

const PREFIX_OVERRIDE_JSON_FIELD: &str = "override_json_field_";
const PREFIX_SUPPRESS_JSON_FIELD: &str = "suppress_json_field_";
const PREFIX_EXCLUDE_JSON_FIELD: &str = "exclude_if_json_field_";
const PREFIX_ADD_MARC_FIELD: &str = "add_marc_field_";
const PREFIX_REMOVE_MARC_FIELD: &str = "remove_marc_field_";
const PREFIX_EXCLUDE_MARC_FIELD: &str = "exclude_if_marc_field_";

const TAG_LENGTH: usize = 3;

fn get_str(table: &toml::Table, key: &str) -> Option<String> {
    table.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn get_str_or(table: &toml::Table, key: &str, default: &str) -> String {
    get_str(table, key).unwrap_or_else(|| default.to_string())
}

fn require_str(table: &toml::Table, section: &str, key: &str) -> Result<String> {
    get_str(table, key)
        .ok_or_else(|| HarvestError::Config(format!("[{section}] is missing required key '{key}'")))
}

fn get_u64_or(table: &toml::Table, key: &str, default: u64) -> u64 {
    table
        .get(key)
        .and_then(|v| v.as_integer())
        .map(|v| v.max(0) as u64)
        .unwrap_or(default)
}

fn get_bool_or(table: &toml::Table, key: &str, default: bool) -> bool {
    table.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

fn compile_regex(section: &str, key: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        HarvestError::Config(format!("[{section}] bad regex for '{key}': {e}"))
    })
}

impl GlobalParams {
    fn from_table(table: &toml::Table) -> Result<Self> {
        let supported_url_regex = match table.get("supported_url_regex") {
            None => None,
            Some(value) => {
                let patterns: Vec<String> = match value {
                    toml::Value::String(s) => vec![s.clone()],
                    toml::Value::Array(items) => items
                        .iter()
                        .filter_map(|v| v.as_str())
                        .map(str::to_string)
                        .collect(),
                    _ => {
                        return Err(HarvestError::Config(
                            "supported_url_regex must be a string or an array of strings".into(),
                        ))
                    }
                };
                let combined = patterns
                    .iter()
                    .map(|p| format!("(?:{p})"))
                    .collect::<Vec<_>>()
                    .join("|");
                Some(compile_regex("", "supported_url_regex", &combined)?)
            }
        };

        Ok(GlobalParams {
            translation_server_url: require_str(table, "", "zts_server_url")?,
            download_timeout: Duration::from_secs(get_u64_or(table, "timeout_download_request", 10)),
            crawl_timeout: Duration::from_secs(get_u64_or(table, "timeout_crawl_operation", 60)),
            default_download_delay: Duration::from_millis(get_u64_or(
                table,
                "default_download_delay_time",
                200,
            )),
            max_download_delay: Duration::from_millis(get_u64_or(
                table,
                "max_download_delay_time",
                5000,
            )),
            rss_harvest_interval: Duration::from_secs(
                get_u64_or(table, "journal_rss_harvest_interval", 0) * 60,
            ),
            common_date_format: get_str_or(table, "common_strptime_format", ""),
            skip_online_first_unconditionally: get_bool_or(
                table,
                "skip_online_first_articles_unconditionally",
                false,
            ),
            supported_url_regex,
        })
    }
}

impl GroupParams {
    fn from_table(name: &str, table: &toml::Table) -> Result<Self> {
        Ok(GroupParams {
            name: name.to_string(),
            user_agent: require_str(table, name, "user_agent")?,
            isil: require_str(table, name, "isil")?,
            author_swb_lookup_url: get_str_or(table, "author_swb_lookup_url", ""),
            author_lobid_lookup_query_params: get_str_or(
                table,
                "author_lobid_lookup_query_params",
                "",
            ),
        })
    }
}

impl JournalParams {
    fn from_table(name: &str, table: &toml::Table, global: &GlobalParams) -> Result<Self> {
        let harvester_type =
            HarvesterType::from_config_value(&require_str(table, name, "zotero_type")?)?;
        let delivery_mode =
            DeliveryMode::from_config_value(&get_str_or(table, "zotero_delivery_mode", "NONE"))?;

        // The journal's own formats take precedence, the global format is the
        // final fallback.
        let mut date_formats: Vec<String> = get_str_or(table, "zotero_strptime_format", "")
            .split('|')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        if !global.common_date_format.is_empty() {
            date_formats.push(global.common_date_format.clone());
        }

        let review_regex = match get_str(table, "zotero_review_regex") {
            Some(pattern) if !pattern.is_empty() => {
                Some(compile_regex(name, "zotero_review_regex", &pattern)?)
            }
            _ => None,
        };

        let language =
            LanguageParams::parse(&get_str_or(table, "zotero_expected_languages", ""));

        let mut crawl = CrawlParams {
            max_crawl_depth: get_u64_or(table, "zotero_max_crawl_depth", 1) as u32,
            ..CrawlParams::default()
        };
        if let Some(pattern) = get_str(table, "zotero_extraction_regex") {
            if !pattern.is_empty() {
                crawl.extraction_regex = Some(compile_regex(name, "zotero_extraction_regex", &pattern)?);
            }
        }
        if let Some(pattern) = get_str(table, "zotero_crawl_url_regex") {
            if !pattern.is_empty() {
                crawl.crawl_url_regex = Some(compile_regex(name, "zotero_crawl_url_regex", &pattern)?);
            }
        }

        let mut field_rules = FieldRules::default();
        let mut record_rules = RecordRules::default();
        for (key, value) in table {
            let value_str = value.as_str().unwrap_or_default();
            if let Some(field) = key.strip_prefix(PREFIX_OVERRIDE_JSON_FIELD) {
                field_rules
                    .overrides
                    .insert(field.to_string(), value_str.to_string());
            } else if let Some(field) = key.strip_prefix(PREFIX_SUPPRESS_JSON_FIELD) {
                field_rules
                    .suppressions
                    .insert(field.to_string(), compile_regex(name, key, value_str)?);
            } else if let Some(field) = key.strip_prefix(PREFIX_EXCLUDE_JSON_FIELD) {
                field_rules
                    .exclusions
                    .insert(field.to_string(), compile_regex(name, key, value_str)?);
            } else if key.starts_with(PREFIX_ADD_MARC_FIELD) {
                record_rules.fields_to_add.push(value_str.to_string());
            } else if let Some(field) = key.strip_prefix(PREFIX_REMOVE_MARC_FIELD) {
                if field.len() != TAG_LENGTH + 1 {
                    return Err(HarvestError::Config(format!(
                        "[{name}] invalid removal filter '{field}'! expected format: <tag><subfield_code>"
                    )));
                }
                record_rules
                    .fields_to_remove
                    .insert(field.to_string(), compile_regex(name, key, value_str)?);
            } else if let Some(field) = key.strip_prefix(PREFIX_EXCLUDE_MARC_FIELD) {
                if field.len() != TAG_LENGTH && field.len() != TAG_LENGTH + 1 {
                    return Err(HarvestError::Config(format!(
                        "[{name}] invalid exclusion filter '{field}'! expected format: <tag> or <tag><subfield_code>"
                    )));
                }
                record_rules
                    .exclusion_filters
                    .insert(field.to_string(), compile_regex(name, key, value_str)?);
            }
        }

        Ok(JournalParams {
            name: name.to_string(),
            zeder_id: get_u64_or(table, "zeder_id", 0) as u32,
            group: require_str(table, name, "zotero_group")?,
            entry_point_url: require_str(table, name, "zotero_url")?,
            harvester_type,
            delivery_mode,
            ppn_online: get_str_or(table, "online_ppn", ""),
            ppn_print: get_str_or(table, "print_ppn", ""),
            issn_online: get_str_or(table, "online_issn", ""),
            issn_print: get_str_or(table, "print_issn", ""),
            ssgn: get_str_or(table, "ssgn", ""),
            license: get_str_or(table, "license", ""),
            date_formats,
            review_regex,
            language,
            crawl,
            field_rules,
            record_rules,
        })
    }
}

impl HarvesterConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            HarvestError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let root: toml::Table = toml::from_str(content)?;
        let global = GlobalParams::from_table(&root)?;

        let group_names: BTreeSet<String> = get_str_or(&root, "groups", "")
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect();
        if group_names.is_empty() {
            return Err(HarvestError::Config("no groups declared".into()));
        }

        let mut groups = BTreeMap::new();
        let mut journals = Vec::new();
        for (section, value) in &root {
            let Some(table) = value.as_table() else {
                continue;
            };
            if group_names.contains(section) {
                groups.insert(
                    section.clone(),
                    Arc::new(GroupParams::from_table(section, table)?),
                );
            } else {
                journals.push(Arc::new(JournalParams::from_table(section, table, &global)?));
            }
        }

        for name in &group_names {
            if !groups.contains_key(name) {
                return Err(HarvestError::Config(format!(
                    "declared group '{name}' has no section"
                )));
            }
        }
        for journal in &journals {
            if !groups.contains_key(&journal.group) {
                return Err(HarvestError::Config(format!(
                    "journal '{}' references unknown group '{}'",
                    journal.name, journal.group
                )));
            }
        }

        Ok(HarvesterConfig {
            global,
            groups,
            journals,
        })
    }

    pub fn group_for(&self, journal: &JournalParams) -> &Arc<GroupParams> {
        // Validated at load time, so the lookup cannot fail.
        &self.groups[&journal.group]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
zts_server_url = "http://localhost:1969"
groups = "Divinity"
common_strptime_format = "%Y-%m-%d"
timeout_download_request = 20
default_download_delay_time = 250
supported_url_regex = ["https?://journals\\.example\\.org/.*", "https?://example\\.edu/.*"]

[Divinity]
user_agent = "harvester/0.1"
isil = "DE-21"
author_swb_lookup_url = "https://swb.example.org/lookup?TRM0="

["Journal of Examples"]
zeder_id = 42
zotero_group = "Divinity"
zotero_url = "https://journals.example.org/joe/feed.rss"
zotero_type = "RSS"
zotero_delivery_mode = "TEST"
online_issn = "1234-5678"
online_ppn = "012345678"
zotero_review_regex = "(?i)^review"
zotero_expected_languages = "*title+abstract:eng,ger"
zotero_strptime_format = "%d.%m.%Y|%Y/%m/%d"
override_json_field_language = "eng"
suppress_json_field_abstractNote = "^\\s*$"
exclude_if_json_field_title = "(?i)table of contents"
add_marc_field_084 = "084  a%ssgn%"
remove_marc_field_520a = "^redacted$"
exclude_if_marc_field_245a = "(?i)editorial"
"#;

    #[test]
    fn parses_global_group_and_journal_sections() {
        let config = HarvesterConfig::parse(CONFIG).unwrap();
        assert_eq!(config.global.translation_server_url, "http://localhost:1969");
        assert_eq!(config.global.download_timeout, Duration::from_secs(20));
        assert_eq!(config.global.default_download_delay, Duration::from_millis(250));
        assert!(config
            .global
            .supported_url_regex
            .as_ref()
            .unwrap()
            .is_match("https://journals.example.org/joe/article/1"));

        assert_eq!(config.groups["Divinity"].isil, "DE-21");

        let journal = &config.journals[0];
        assert_eq!(journal.name, "Journal of Examples");
        assert_eq!(journal.zeder_id, 42);
        assert_eq!(journal.harvester_type, HarvesterType::Rss);
        assert_eq!(journal.delivery_mode, DeliveryMode::Test);
        assert_eq!(config.group_for(journal).name, "Divinity");
        // journal formats first, global fallback last
        assert_eq!(journal.date_formats, vec!["%d.%m.%Y", "%Y/%m/%d", "%Y-%m-%d"]);
    }

    #[test]
    fn parses_repeatable_rule_keys() {
        let config = HarvesterConfig::parse(CONFIG).unwrap();
        let journal = &config.journals[0];
        assert_eq!(journal.field_rules.overrides["language"], "eng");
        assert!(journal.field_rules.suppressions.contains_key("abstractNote"));
        assert!(journal.field_rules.exclusions.contains_key("title"));
        assert_eq!(journal.record_rules.fields_to_add, vec!["084  a%ssgn%"]);
        assert!(journal.record_rules.fields_to_remove.contains_key("520a"));
        assert!(journal.record_rules.exclusion_filters.contains_key("245a"));
    }

    #[test]
    fn expected_languages_syntax() {
        let params = LanguageParams::parse("*title+abstract:eng,ger");
        assert!(params.force_automatic_detection);
        assert_eq!(params.source_text_fields, "title+abstract");
        assert_eq!(params.expected_languages.len(), 2);

        let params = LanguageParams::parse("fre");
        assert!(!params.force_automatic_detection);
        assert!(params.source_text_fields.is_empty());
        assert!(params.expected_languages.contains("fre"));
    }

    #[test]
    fn rejects_malformed_filters_and_unknown_groups() {
        let bad_filter = CONFIG.replace("remove_marc_field_520a", "remove_marc_field_520");
        assert!(HarvesterConfig::parse(&bad_filter).is_err());

        let bad_group = CONFIG.replace("zotero_group = \"Divinity\"", "zotero_group = \"Nope\"");
        assert!(HarvesterConfig::parse(&bad_group).is_err());

        let bad_type = CONFIG.replace("zotero_type = \"RSS\"", "zotero_type = \"FTP\"");
        assert!(HarvesterConfig::parse(&bad_type).is_err());
    }
}
