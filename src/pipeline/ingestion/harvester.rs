use crate::config::{GlobalParams, GroupParams, HarvesterType, JournalParams};
use crate::error::{ErrorKind, HarvestError, Result};
use crate::pipeline::delivery::DeliveryTracker;
use crate::pipeline::ingestion::crawler::{PageSource, SimpleSiteCrawler, SiteDesc};
use crate::pipeline::ingestion::feed::parse_feed;
use crate::pipeline::ingestion::rate_limiter::MinIntervalTimer;
use crate::pipeline::ingestion::translation_server::TranslationApi;
use crate::pipeline::processing::authors::AuthorityClient;
use crate::pipeline::processing::metadata::{apply_field_rules, fold_notes_into_items};
use crate::pipeline::processing::scheduler::{convert_payload, ConversionManager};
use crate::pipeline::progress::ProgressFile;
use crate::pipeline::sink::OutputSink;
use crate::report::ErrorLogger;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};

/// Aggregate counts reported at the end of a run. Skips are deliberate
/// outcomes and counted separately from errors.
#[derive(Debug, Default, Clone)]
pub struct HarvestTotals {
    pub harvested_urls: usize,
    pub generated_records: usize,
    pub written_records: usize,
    pub previously_delivered: usize,
    pub skipped_exclusion: usize,
    pub skipped_online_first: usize,
    pub skipped_early_view: usize,
}

/// Owns all shared mutable state of one harvesting run: the per-run
/// already-harvested URL set, the counters, the inter-request timer and the
/// per-group authority-lookup caches. Nothing here is process-global.
pub struct HarvestRun<'a> {
    global: &'a GlobalParams,
    api: &'a dyn TranslationApi,
    tracker: &'a DeliveryTracker,
    manager: &'a ConversionManager,
    sink: &'a mut OutputSink,
    error_logger: &'a mut ErrorLogger,
    progress: Option<&'a ProgressFile>,
    timer: MinIntervalTimer,
    already_harvested: HashSet<String>,
    authorities: HashMap<String, Arc<AuthorityClient>>,
    pub totals: HarvestTotals,
}

impl<'a> HarvestRun<'a> {
    pub fn new(
        global: &'a GlobalParams,
        api: &'a dyn TranslationApi,
        tracker: &'a DeliveryTracker,
        manager: &'a ConversionManager,
        sink: &'a mut OutputSink,
        error_logger: &'a mut ErrorLogger,
        progress: Option<&'a ProgressFile>,
    ) -> Self {
        HarvestRun {
            global,
            api,
            tracker,
            manager,
            sink,
            error_logger,
            progress,
            // the configured default delay, capped by the allowed maximum
            timer: MinIntervalTimer::new(
                global.default_download_delay.min(global.max_download_delay),
            ),
            already_harvested: HashSet::new(),
            authorities: HashMap::new(),
            totals: HarvestTotals::default(),
        }
    }

    /// Dispatches one journal according to its configured discovery
    /// strategy.
    pub async fn harvest_journal(
        &mut self,
        journal: &Arc<JournalParams>,
        group: &Arc<GroupParams>,
    ) -> Result<()> {
        info!(journal = %journal.name, strategy = journal.harvester_type.as_str(), "harvesting journal");
        match journal.harvester_type {
            HarvesterType::Direct => {
                let url = journal.entry_point_url.clone();
                self.harvest_url(journal, group, url).await;
            }
            HarvesterType::Rss => self.harvest_feed(journal, group).await,
            HarvesterType::Crawl => {
                let site = SiteDesc {
                    start_url: journal.entry_point_url.clone(),
                    max_crawl_depth: journal.crawl.max_crawl_depth,
                    url_filter: journal.crawl.crawl_url_regex.clone(),
                };
                match SimpleSiteCrawler::new(
                    site,
                    &group.user_agent,
                    self.global.crawl_timeout,
                    self.global.default_download_delay,
                ) {
                    Ok(mut crawler) => self.harvest_crawl(journal, group, &mut crawler).await,
                    Err(e) => self.error_logger.auto_log(
                        &journal.name,
                        &journal.entry_point_url,
                        &e.to_string(),
                    ),
                }
            }
        }
        Ok(())
    }

    fn authority_for(&mut self, group: &Arc<GroupParams>) -> Option<Arc<AuthorityClient>> {
        if group.author_swb_lookup_url.is_empty() && group.author_lobid_lookup_query_params.is_empty()
        {
            return None;
        }
        if let Some(client) = self.authorities.get(&group.name) {
            return Some(Arc::clone(client));
        }
        match AuthorityClient::new(group) {
            Ok(client) => {
                let client = Arc::new(client);
                self.authorities
                    .insert(group.name.clone(), Arc::clone(&client));
                Some(client)
            }
            Err(e) => {
                self.error_logger
                    .auto_log(&group.name, "", &format!("authority client setup failed: {e}"));
                None
            }
        }
    }

    /// The single per-URL harvest operation all strategies funnel into.
    /// Recursion resolves "multiple matches" responses child by child, in
    /// enumeration order.
    pub fn harvest_url<'s>(
        &'s mut self,
        journal: &'s Arc<JournalParams>,
        group: &'s Arc<GroupParams>,
        url: String,
    ) -> Pin<Box<dyn Future<Output = ()> + 's>> {
        Box::pin(async move {
            if self.already_harvested.contains(&url) {
                debug!(%url, "skipping URL (already harvested this run)");
                return;
            }
            if let Some(extraction_regex) = &journal.crawl.extraction_regex {
                if !extraction_regex.is_match(&url) {
                    debug!(%url, "skipping URL (does not match extraction regex)");
                    return;
                }
            }
            self.already_harvested.insert(url.clone());

            info!(%url, "harvesting URL");

            self.timer.sleep_until_expired().await;
            let response = self.api.web(&url).await;
            self.timer.restart();

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    self.error_logger
                        .log(e.kind(), &journal.name, &url, &e.to_string());
                    return;
                }
            };

            if response.code == 500 {
                self.error_logger.log(
                    ErrorKind::ZtsConversionFailed,
                    &journal.name,
                    &url,
                    &response.body,
                );
                return;
            }
            if response.code == 501 {
                debug!(%url, "skipped (no translator for this page)");
                return;
            }

            if response.is_multiple_matches() {
                debug!(%url, "multiple articles found, harvesting children");
                match serde_json::from_str::<Value>(&response.body) {
                    Ok(Value::Object(children)) => {
                        for child_url in children.keys() {
                            self.harvest_url(journal, group, child_url.clone()).await;
                        }
                    }
                    Ok(_) | Err(_) => {
                        self.error_logger.log(
                            ErrorKind::DownloadMultipleFailed,
                            &journal.name,
                            &url,
                            "multiple-matches response body is not an object",
                        );
                    }
                }
                self.totals.harvested_urls += 1;
                return;
            }

            if self.sink.format().wants_raw_items() {
                self.process_raw_response(journal, &url, &response.body);
            } else {
                self.process_conversion(journal, group, &url, response.body).await;
            }
            self.totals.harvested_urls += 1;
        })
    }

    /// Raw output formats skip conversion and tracking; the note-folded
    /// items go straight to the sink.
    fn process_raw_response(&mut self, journal: &Arc<JournalParams>, url: &str, body: &str) {
        let parsed: std::result::Result<Value, _> = serde_json::from_str(body);
        let items = parsed
            .map_err(HarvestError::from)
            .and_then(|value| {
                value
                    .as_array()
                    .cloned()
                    .ok_or_else(|| HarvestError::Conversion("expected a JSON array of items".into()))
            })
            .and_then(fold_notes_into_items);
        match items {
            Ok(items) if items.is_empty() => {
                self.error_logger.log(
                    ErrorKind::ZtsEmptyResponse,
                    &journal.name,
                    url,
                    "no items in translation server response",
                );
            }
            Ok(mut items) => {
                for item in items.iter_mut() {
                    apply_field_rules(item, &journal.field_rules);
                }
                self.totals.generated_records += items.len();
                self.totals.written_records += items.len();
                self.sink.push_raw_items(&items);
            }
            Err(e) => {
                self.error_logger
                    .log(e.kind(), &journal.name, url, &e.to_string());
            }
        }
    }

    /// Full pipeline: hand the payload to the conversion scheduler, then
    /// let the tracking store decide which generated records are emitted.
    async fn process_conversion(
        &mut self,
        journal: &Arc<JournalParams>,
        group: &Arc<GroupParams>,
        url: &str,
        body: String,
    ) {
        let authority = self.authority_for(group);
        let future = self.manager.submit(convert_payload(
            body,
            Arc::clone(journal),
            Arc::clone(group),
            authority,
            url.to_string(),
            self.global.skip_online_first_unconditionally,
        ));

        let outcome = match future.wait().await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.error_logger
                    .log(e.kind(), &journal.name, url, &e.to_string());
                return;
            }
        };

        self.totals.skipped_exclusion += outcome.skipped_exclusion;
        self.totals.skipped_online_first += outcome.skipped_online_first;
        self.totals.skipped_early_view += outcome.skipped_early_view;
        for error in &outcome.item_errors {
            self.error_logger
                .log(error.kind(), &journal.name, url, &error.to_string());
        }

        let record_count = outcome.records.len();
        let mut previously_delivered = 0usize;
        for generated in outcome.records {
            let mode = journal.delivery_mode;
            match self
                .tracker
                .already_delivered(mode, &generated.url, &generated.hash)
            {
                Ok(true) => {
                    previously_delivered += 1;
                    info!(url = %generated.url, "skipping record - already delivered unchanged");
                }
                Ok(false) => {
                    if let Err(e) = self.tracker.record_delivery(
                        mode,
                        &generated.url,
                        &journal.name,
                        &generated.hash,
                        None,
                    ) {
                        self.error_logger
                            .log(e.kind(), &journal.name, url, &e.to_string());
                    }
                    self.sink.push_record(generated.record);
                    self.totals.written_records += 1;
                }
                Err(e) => {
                    self.error_logger
                        .log(e.kind(), &journal.name, url, &e.to_string());
                }
            }
        }
        self.totals.generated_records += record_count;
        self.totals.previously_delivered += previously_delivered;

        debug!(
            %url,
            records = record_count,
            new = record_count - previously_delivered,
            "harvested URL"
        );
    }

    /// Syndication strategy: unchanged feeds are skipped wholesale, items
    /// already seen for this feed are skipped individually, the rest are
    /// harvested in feed order.
    async fn harvest_feed(&mut self, journal: &Arc<JournalParams>, group: &Arc<GroupParams>) {
        let feed_url = journal.entry_point_url.clone();

        match self
            .tracker
            .feed_recently_harvested(&feed_url, self.global.rss_harvest_interval)
        {
            Ok(true) => {
                debug!(%feed_url, "skipping feed (inside harvest interval)");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                self.error_logger
                    .log(e.kind(), &journal.name, &feed_url, &e.to_string());
                return;
            }
        }

        let body = match self.fetch_feed_body(group, &feed_url).await {
            Ok(body) => body,
            Err(e) => {
                self.error_logger
                    .auto_log(&journal.name, &feed_url, &format!("feed download failed: {e}"));
                return;
            }
        };

        let feed = match parse_feed(&body) {
            Ok(feed) => feed,
            Err(e) => {
                self.error_logger
                    .auto_log(&journal.name, &feed_url, &e.to_string());
                return;
            }
        };

        let last_build_date = feed.last_build_date.map(|d| d.timestamp());
        match self.tracker.feed_unchanged(&feed_url, last_build_date) {
            Ok(true) => {
                debug!(%feed_url, "skipping feed (no new items since last build date)");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                self.error_logger
                    .log(e.kind(), &journal.name, &feed_url, &e.to_string());
                return;
            }
        }

        for item in &feed.items {
            match self.tracker.item_already_processed(&feed_url, &item.id) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    self.error_logger
                        .log(e.kind(), &journal.name, &feed_url, &e.to_string());
                    continue;
                }
            }

            self.harvest_url(journal, group, item.link.clone()).await;

            if let Err(e) = self.tracker.mark_item_processed(&feed_url, &item.id) {
                self.error_logger
                    .log(e.kind(), &journal.name, &feed_url, &e.to_string());
            }
        }

        if let Err(e) = self.tracker.touch_feed(&feed_url, last_build_date) {
            self.error_logger
                .log(e.kind(), &journal.name, &feed_url, &e.to_string());
        }
    }

    async fn fetch_feed_body(&self, group: &GroupParams, feed_url: &str) -> Result<String> {
        let client = reqwest::Client::builder()
            .user_agent(group.user_agent.clone())
            .timeout(self.global.download_timeout)
            .build()?;
        let response = client.get(feed_url).send().await?;
        Ok(response.error_for_status()?.text().await?)
    }

    /// Crawl strategy: pages come from the external crawler one at a time;
    /// each must additionally pass the global supported-URL pattern. The
    /// optional progress file is rewritten after every processed page.
    pub async fn harvest_crawl(
        &mut self,
        journal: &Arc<JournalParams>,
        group: &Arc<GroupParams>,
        source: &mut dyn PageSource,
    ) {
        let mut processed_url_count = 0usize;
        loop {
            let page = match source.next_page().await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e) => {
                    self.error_logger
                        .auto_log(&journal.name, &journal.entry_point_url, &e.to_string());
                    break;
                }
            };
            processed_url_count += 1;

            if let Some(supported) = &self.global.supported_url_regex {
                if !supported.is_match(&page.url) {
                    debug!(url = %page.url, "skipping unsupported URL");
                    continue;
                }
            }
            if page.error_message.is_empty() {
                self.harvest_url(journal, group, page.url.clone()).await;
            }
            if let Some(progress) = self.progress {
                if let Err(e) =
                    progress.update(processed_url_count, source.remaining_depth(), &page.url)
                {
                    self.error_logger
                        .auto_log(&journal.name, &page.url, &format!("progress write failed: {e}"));
                }
            }
        }
        info!(journal = %journal.name, processed = processed_url_count, "crawl finished");
    }
}
