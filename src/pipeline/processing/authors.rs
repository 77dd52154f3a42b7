use crate::config::GroupParams;
use crate::error::Result;
use crate::pipeline::processing::metadata::Creator;
use crate::pipeline::utils::collapse_whitespace;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Academic and clerical titles that are split off into the creator's
/// title field.
const VALID_TITLES: &[&str] = &["jr", "sr", "sj", "s.j", "fr", "hr", "dr", "prof", "em"];

/// Ordinal affixes kept separate from the last name.
const VALID_AFFIXES: &[&str] = &["i", "ii", "iii", "iv", "v"];

/// Tokens that are never part of a personal name; publishers leak these
/// into author fields.
static BLACKLISTED_TOKEN_MATCHER: Lazy<Regex> = Lazy::new(|| {
    let tokens = [
        "anonymous",
        "anonym",
        "et al",
        "unknown",
        "others",
        "verfasser",
        "various authors",
    ];
    let pattern = format!(
        r"(?i)\b(?:{})\b",
        tokens
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|")
    );
    Regex::new(&pattern).unwrap()
});

/// Splits a combined name at the last space: everything before it is the
/// first name, the final token the last name.
pub fn split_into_first_and_last(author: &str) -> (String, String) {
    let normalized = collapse_whitespace(author);
    match normalized.rsplit_once(' ') {
        Some((first, last)) => (first.to_string(), last.to_string()),
        None => (normalized, String::new()),
    }
}

fn is_title_token(token: &str) -> bool {
    let token = token.strip_suffix('.').unwrap_or(token);
    VALID_TITLES.contains(&token.to_lowercase().as_str())
}

fn is_affix_token(token: &str) -> bool {
    VALID_AFFIXES.contains(&token.to_lowercase().as_str())
}

fn strip_blacklisted_tokens(name: &str) -> String {
    collapse_whitespace(&BLACKLISTED_TOKEN_MATCHER.replace_all(name, ""))
}

/// Separates title and affix tokens out of the split name parts, strips
/// blacklisted tokens and re-splits the name when one part ends up empty.
pub fn post_process_author_name(creator: &mut Creator) {
    let mut first_name = String::new();
    let mut title = String::new();
    for token in creator.first_name.split_whitespace() {
        if is_title_token(token) {
            title.push_str(token);
            title.push(' ');
        } else {
            first_name.push_str(token);
            first_name.push(' ');
        }
    }

    let mut last_name = String::new();
    let mut affix = String::new();
    for token in creator.last_name.split_whitespace() {
        if is_title_token(token) {
            title.push_str(token);
            title.push(' ');
        } else if is_affix_token(token) {
            affix.push_str(token);
            affix.push(' ');
        } else {
            last_name.push_str(token);
            last_name.push(' ');
        }
    }

    let first_name = strip_blacklisted_tokens(&first_name);
    let last_name = strip_blacklisted_tokens(&last_name);
    creator.title = collapse_whitespace(&title);
    creator.affix = collapse_whitespace(&affix);

    // reparse when either part of the name came out empty
    if first_name.is_empty() {
        let (first, last) = split_into_first_and_last(&last_name);
        creator.first_name = first;
        creator.last_name = last;
    } else if last_name.is_empty() {
        let (first, last) = split_into_first_and_last(&first_name);
        creator.first_name = first;
        creator.last_name = last;
    } else {
        creator.first_name = first_name;
        creator.last_name = last_name;
    }

    debug!(
        first = %creator.first_name,
        last = %creator.last_name,
        title = %creator.title,
        affix = %creator.affix,
        "post-processed author name"
    );
}

#[derive(Debug, Clone, Default)]
pub struct AuthorityIds {
    pub ppn: Option<String>,
    pub gnd: Option<String>,
}

static SWB_PPN_MATCHER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<SMALL>PPN</SMALL>.*?<div><SMALL>([0-9X]+)").unwrap());

fn url_encode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

/// Resolves author names against the union catalog (PPN) with a fallback to
/// the identity-linking service (GND number). Lookups are best-effort: they
/// are retried once, memoized, and never fail the calling pipeline.
pub struct AuthorityClient {
    client: reqwest::Client,
    swb_lookup_url: String,
    lobid_query_params: String,
    cache: Mutex<HashMap<String, AuthorityIds>>,
}

const LOBID_SEARCH_URL: &str = "https://lobid.org/gnd/search";

impl AuthorityClient {
    pub fn new(group: &GroupParams) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(group.user_agent.clone())
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(AuthorityClient {
            client,
            swb_lookup_url: group.author_swb_lookup_url.clone(),
            lobid_query_params: group.author_lobid_lookup_query_params.clone(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Looks up "Last, First" and returns whatever identifiers could be
    /// resolved.
    pub async fn lookup(&self, name: &str) -> AuthorityIds {
        if let Some(cached) = self.cache.lock().await.get(name) {
            return cached.clone();
        }

        let mut ids = AuthorityIds::default();
        if !self.swb_lookup_url.is_empty() {
            ids.ppn = self.with_retry(|| self.swb_lookup(name)).await;
        }
        if ids.ppn.is_none() {
            ids.gnd = self.with_retry(|| self.lobid_lookup(name)).await;
        }

        self.cache.lock().await.insert(name.to_string(), ids.clone());
        ids
    }

    async fn with_retry<'a, F, Fut>(&'a self, request: F) -> Option<String>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<Option<String>>> + 'a,
    {
        for attempt in 0..2 {
            match request().await {
                Ok(found) => return found,
                Err(e) if attempt == 0 => {
                    debug!(error = %e, "authority lookup failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                }
                Err(e) => {
                    warn!(error = %e, "authority lookup failed");
                    return None;
                }
            }
        }
        None
    }

    async fn swb_lookup(&self, name: &str) -> Result<Option<String>> {
        let url = format!("{}{}", self.swb_lookup_url, url_encode(name));
        let body = self.client.get(url).send().await?.text().await?;
        Ok(SWB_PPN_MATCHER
            .captures(&body)
            .map(|captures| captures[1].to_string()))
    }

    async fn lobid_lookup(&self, name: &str) -> Result<Option<String>> {
        let mut url = format!(
            "{LOBID_SEARCH_URL}?q={}&format=json&size=1",
            url_encode(name)
        );
        if !self.lobid_query_params.is_empty() {
            url.push('&');
            url.push_str(&self.lobid_query_params);
        }
        let body: Value = self.client.get(url).send().await?.json().await?;
        Ok(body
            .get("member")
            .and_then(Value::as_array)
            .and_then(|members| members.first())
            .and_then(|member| member.get("gndIdentifier"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creator(first: &str, last: &str) -> Creator {
        Creator {
            first_name: first.to_string(),
            last_name: last.to_string(),
            ..Creator::default()
        }
    }

    #[test]
    fn splits_combined_names_at_the_last_space() {
        assert_eq!(
            split_into_first_and_last("Johann Sebastian Bach"),
            ("Johann Sebastian".to_string(), "Bach".to_string())
        );
        assert_eq!(
            split_into_first_and_last("Mononym"),
            ("Mononym".to_string(), String::new())
        );
    }

    #[test]
    fn title_and_affix_tokens_are_separated() {
        let mut c = creator("Dr. Anna", "Schmidt");
        post_process_author_name(&mut c);
        assert_eq!(c.first_name, "Anna");
        assert_eq!(c.last_name, "Schmidt");
        assert_eq!(c.title, "Dr.");

        let mut c = creator("John", "Smith III");
        post_process_author_name(&mut c);
        assert_eq!(c.last_name, "Smith");
        assert_eq!(c.affix, "III");
    }

    #[test]
    fn empty_first_name_triggers_a_reparse() {
        let mut c = creator("", "Anna Katharina Schmidt");
        post_process_author_name(&mut c);
        assert_eq!(c.first_name, "Anna Katharina");
        assert_eq!(c.last_name, "Schmidt");
    }

    #[test]
    fn blacklisted_tokens_are_removed() {
        let mut c = creator("Anonymous", "Schmidt");
        post_process_author_name(&mut c);
        // the cleaned name is reparsed; "Anonymous" must be gone entirely
        assert!(!format!("{} {}", c.first_name, c.last_name).contains("Anonymous"));
        assert!(c.first_name == "Schmidt" || c.last_name == "Schmidt");
    }

    #[test]
    fn url_encoding_covers_reserved_characters() {
        assert_eq!(url_encode("Schmidt, Anna"), "Schmidt%2C%20Anna");
        assert_eq!(url_encode("safe-chars_1.0~x"), "safe-chars_1.0~x");
    }
}
