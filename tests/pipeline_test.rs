use async_trait::async_trait;
use biblio_harvester::config::HarvesterConfig;
use biblio_harvester::error::{ErrorKind, HarvestError, Result};
use biblio_harvester::pipeline::delivery::DeliveryTracker;
use biblio_harvester::pipeline::ingestion::harvester::{HarvestRun, HarvestTotals};
use biblio_harvester::pipeline::ingestion::translation_server::{TranslationApi, WebResponse};
use biblio_harvester::pipeline::processing::scheduler::ConversionManager;
use biblio_harvester::pipeline::sink::{OutputFormat, OutputSink};
use biblio_harvester::report::ErrorLogger;
use std::collections::HashMap;

const CONFIG: &str = r#"
zts_server_url = "http://localhost:1969"
groups = "Divinity"
common_strptime_format = "%Y-%m-%d"

[Divinity]
user_agent = "harvester-tests/0.1"
isil = "DE-21"

["Journal of Examples"]
zeder_id = 42
zotero_group = "Divinity"
zotero_url = "https://example.org/articles/1"
zotero_type = "DIRECT"
zotero_delivery_mode = "TEST"
online_issn = "1234-5678"
online_ppn = "012345678"
zotero_expected_languages = "eng"
"#;

/// Scripted translation service: URL -> (status code, body).
struct StubApi {
    responses: HashMap<String, (u16, String)>,
}

impl StubApi {
    fn new(responses: &[(&str, u16, String)]) -> Self {
        StubApi {
            responses: responses
                .iter()
                .map(|(url, code, body)| (url.to_string(), (*code, body.clone())))
                .collect(),
        }
    }
}

#[async_trait]
impl TranslationApi for StubApi {
    async fn web(&self, url: &str) -> Result<WebResponse> {
        match self.responses.get(url) {
            Some((code, body)) => Ok(WebResponse {
                code: *code,
                body: body.clone(),
            }),
            None => Err(HarvestError::TranslationServer {
                code: 404,
                message: format!("no scripted response for {url}"),
            }),
        }
    }

    async fn web_resolve(&self, _payload: &str) -> Result<WebResponse> {
        Err(HarvestError::TranslationServer {
            code: 500,
            message: "web_resolve not scripted".to_string(),
        })
    }

    async fn export(&self, _format: &str, json: &str) -> Result<String> {
        Ok(json.to_string())
    }

    async fn import(&self, _content: &str) -> Result<String> {
        Err(HarvestError::TranslationServer {
            code: 500,
            message: "import not scripted".to_string(),
        })
    }
}

fn article_json(title: &str, url: &str) -> String {
    serde_json::json!([{
        "itemType": "journalArticle",
        "title": title,
        "creators": [
            {"firstName": "Anna", "lastName": "Schmidt", "creatorType": "author"}
        ],
        "date": "2019-12-24",
        "volume": "12",
        "issue": "3",
        "pages": "5-25",
        "url": url,
        "tags": [{"tag": "exegesis"}],
    }])
    .to_string()
}

struct TestHarness {
    config: HarvesterConfig,
    tracker: DeliveryTracker,
    manager: ConversionManager,
    api: StubApi,
}

impl TestHarness {
    fn new(api: StubApi) -> Self {
        TestHarness {
            config: HarvesterConfig::parse(CONFIG).unwrap(),
            tracker: DeliveryTracker::open_in_memory().unwrap(),
            manager: ConversionManager::new(4),
            api,
        }
    }

    async fn run_once(&self, logger: &mut ErrorLogger) -> (HarvestTotals, usize) {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = OutputSink::new(OutputFormat::MarcXml, dir.path().join("records.xml"));
        let totals = {
            let mut run = HarvestRun::new(
                &self.config.global,
                &self.api,
                &self.tracker,
                &self.manager,
                &mut sink,
                logger,
                None,
            );
            let journal = &self.config.journals[0];
            let group = self.config.group_for(journal);
            run.harvest_journal(journal, group).await.unwrap();
            run.totals.clone()
        };
        let output = sink.finish(&self.api).await.unwrap();
        let written_records = std::fs::read_to_string(output)
            .unwrap()
            .matches("<record>")
            .count();
        (totals, written_records)
    }
}

#[tokio::test]
async fn direct_harvest_generates_and_tracks_records() {
    let url = "https://example.org/articles/1";
    let api = StubApi::new(&[(url, 200, article_json("A study of examples", url))]);
    let harness = TestHarness::new(api);
    let mut logger = ErrorLogger::new();

    let (totals, written) = harness.run_once(&mut logger).await;
    assert_eq!(totals.harvested_urls, 1);
    assert_eq!(totals.generated_records, 1);
    assert_eq!(totals.written_records, 1);
    assert_eq!(totals.previously_delivered, 0);
    assert_eq!(written, 1);
    assert!(!logger.has_errors());

    // A second run with unchanged content yields an identical hash, so the
    // tracking store reports it as previously delivered and nothing is
    // re-emitted.
    let (totals, written) = harness.run_once(&mut logger).await;
    assert_eq!(totals.generated_records, 1);
    assert_eq!(totals.previously_delivered, 1);
    assert_eq!(totals.written_records, 0);
    assert_eq!(written, 0);

    harness.manager.shutdown().await;
}

#[tokio::test]
async fn multiple_matches_resolve_to_their_children() {
    let parent = "https://example.org/articles/1";
    let child_a = "https://example.org/articles/1a";
    let child_b = "https://example.org/articles/1b";
    let multi_body = format!(r#"{{"{child_a}": "First", "{child_b}": "Second"}}"#);

    let api = StubApi::new(&[
        (parent, 300, multi_body),
        (child_a, 200, article_json("First article", child_a)),
        (child_b, 200, article_json("Second article", child_b)),
    ]);
    let harness = TestHarness::new(api);
    let mut logger = ErrorLogger::new();

    let (totals, written) = harness.run_once(&mut logger).await;
    assert_eq!(totals.harvested_urls, 3);
    assert_eq!(totals.generated_records, 2);
    assert_eq!(totals.previously_delivered, 0);
    assert_eq!(written, 2);
    assert!(!logger.has_errors());

    harness.manager.shutdown().await;
}

#[tokio::test]
async fn empty_responses_and_translator_failures_are_logged_not_fatal() {
    let url = "https://example.org/articles/1";
    let api = StubApi::new(&[(url, 200, "[]".to_string())]);
    let harness = TestHarness::new(api);
    let mut logger = ErrorLogger::new();

    let (totals, written) = harness.run_once(&mut logger).await;
    assert_eq!(totals.generated_records, 0);
    assert_eq!(written, 0);
    assert!(logger.has_errors());
    assert_eq!(
        logger.error_counts_by_kind()[&ErrorKind::ZtsEmptyResponse],
        1
    );

    harness.manager.shutdown().await;
}

#[tokio::test]
async fn translator_internal_errors_are_item_level() {
    let url = "https://example.org/articles/1";
    let api = StubApi::new(&[(url, 500, "translator blew up".to_string())]);
    let harness = TestHarness::new(api);
    let mut logger = ErrorLogger::new();

    let (totals, _) = harness.run_once(&mut logger).await;
    assert_eq!(totals.generated_records, 0);
    assert_eq!(
        logger.error_counts_by_kind()[&ErrorKind::ZtsConversionFailed],
        1
    );

    harness.manager.shutdown().await;
}

#[tokio::test]
async fn raw_json_output_bypasses_conversion_and_tracking() {
    let url = "https://example.org/articles/1";
    let api = StubApi::new(&[(url, 200, article_json("A study of examples", url))]);
    let harness = TestHarness::new(api);
    let mut logger = ErrorLogger::new();

    let dir = tempfile::tempdir().unwrap();
    let mut sink = OutputSink::new(OutputFormat::Json, dir.path().join("records.json"));
    {
        let mut run = HarvestRun::new(
            &harness.config.global,
            &harness.api,
            &harness.tracker,
            &harness.manager,
            &mut sink,
            &mut logger,
            None,
        );
        let journal = &harness.config.journals[0];
        let group = harness.config.group_for(journal);
        run.harvest_journal(journal, group).await.unwrap();
        assert_eq!(run.totals.written_records, 1);
    }
    let output = sink.finish(&harness.api).await.unwrap();
    let body: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output).unwrap()).unwrap();
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["title"], "A study of examples");

    harness.manager.shutdown().await;
}
