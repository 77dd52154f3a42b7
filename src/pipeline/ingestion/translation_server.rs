use crate::error::{HarvestError, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Raw response from the metadata-extraction service's `/web` endpoint.
/// The status code carries semantics beyond success/failure, so it is
/// passed through to the caller for classification.
#[derive(Debug, Clone)]
pub struct WebResponse {
    pub code: u16,
    pub body: String,
}

impl WebResponse {
    /// 300 means "multiple candidates": the body enumerates child URLs and
    /// must be resolved recursively.
    pub fn is_multiple_matches(&self) -> bool {
        self.code == 300
    }

    /// 500 (translator-internal error) and 501 (no translator for the page)
    /// are item-level failures: logged, never retried automatically.
    pub fn is_item_failure(&self) -> bool {
        self.code == 500 || self.code == 501
    }
}

/// Narrow contract against the external metadata-extraction service.
/// Tests substitute a scripted implementation.
#[async_trait]
pub trait TranslationApi: Send + Sync {
    /// Submit a bare URL for extraction.
    async fn web(&self, url: &str) -> Result<WebResponse>;

    /// Resubmit a "multiple candidates" payload to the same endpoint.
    async fn web_resolve(&self, payload: &str) -> Result<WebResponse>;

    /// Convert a JSON array of items into the named export format.
    async fn export(&self, format: &str, json: &str) -> Result<String>;

    /// Convert a foreign bibliographic document into item JSON.
    async fn import(&self, content: &str) -> Result<String>;
}

/// `reqwest`-backed client for a translation server instance.
pub struct TranslationServer {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
    conversion_timeout: Duration,
}

// Server-side format conversion is slower than page extraction and gets its
// own budget.
const DEFAULT_CONVERSION_TIMEOUT: Duration = Duration::from_secs(60);

impl TranslationServer {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .build()?;
        Ok(TranslationServer {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout,
            conversion_timeout: DEFAULT_CONVERSION_TIMEOUT,
        })
    }

    async fn post_web(&self, body: String, content_type: &'static str) -> Result<WebResponse> {
        let response = self
            .client
            .post(format!("{}/web", self.base_url))
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .timeout(self.timeout)
            .body(body)
            .send()
            .await?;
        let code = response.status().as_u16();
        let body = response.text().await?;
        classify(code, body)
    }
}

/// 4xx/5xx/9xx responses other than the item-level codes are transport
/// failures; 200 and 300 pass through for the dispatcher to interpret.
fn classify(code: u16, body: String) -> Result<WebResponse> {
    match code {
        200 | 300 | 500 | 501 => Ok(WebResponse { code, body }),
        _ => Err(HarvestError::TranslationServer {
            code,
            message: truncate_for_log(&body),
        }),
    }
}

fn truncate_for_log(body: &str) -> String {
    const MAX: usize = 256;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    }
}

#[async_trait]
impl TranslationApi for TranslationServer {
    async fn web(&self, url: &str) -> Result<WebResponse> {
        self.post_web(url.to_string(), "text/plain").await
    }

    async fn web_resolve(&self, payload: &str) -> Result<WebResponse> {
        self.post_web(payload.to_string(), "application/json").await
    }

    async fn export(&self, format: &str, json: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/export", self.base_url))
            .query(&[("format", format)])
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .timeout(self.conversion_timeout)
            .body(json.to_string())
            .send()
            .await?;
        let code = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&code) {
            return Err(HarvestError::TranslationServer {
                code,
                message: truncate_for_log(&body),
            });
        }
        Ok(body)
    }

    async fn import(&self, content: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/import", self.base_url))
            .timeout(self.conversion_timeout)
            .body(content.to_string())
            .send()
            .await?;
        let code = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&code) {
            return Err(HarvestError::TranslationServer {
                code,
                message: truncate_for_log(&body),
            });
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_codes_classify_by_contract() {
        let ok = classify(200, "[]".into()).unwrap();
        assert!(!ok.is_multiple_matches() && !ok.is_item_failure());

        let multi = classify(300, "{}".into()).unwrap();
        assert!(multi.is_multiple_matches());

        assert!(classify(500, "translator died".into()).unwrap().is_item_failure());
        assert!(classify(501, "no translator".into()).unwrap().is_item_failure());

        assert!(classify(404, "not found".into()).is_err());
    }

    #[test]
    fn long_bodies_are_truncated_in_errors() {
        let body = "x".repeat(1000);
        match classify(403, body) {
            Err(HarvestError::TranslationServer { code, message }) => {
                assert_eq!(code, 403);
                assert!(message.len() < 300);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
