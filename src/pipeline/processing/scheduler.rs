use crate::config::{GroupParams, JournalParams};
use crate::error::{HarvestError, Result};
use crate::pipeline::processing::augment::{
    augment_metadata_record, is_early_view_exclusion, is_online_first_exclusion,
};
use crate::pipeline::processing::authors::AuthorityClient;
use crate::pipeline::processing::generate::{
    generate_record, matches_record_exclusion_filters, GeneratedRecord,
};
use crate::pipeline::processing::metadata::{
    apply_field_rules, fold_notes_into_items, from_translator_json, matches_exclusion_filters,
};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Outcome of converting one harvested JSON payload.
#[derive(Debug, Default)]
pub struct ConversionOutcome {
    pub records: Vec<GeneratedRecord>,
    pub skipped_exclusion: usize,
    pub skipped_online_first: usize,
    pub skipped_early_view: usize,
    /// Per-item failures; the batch continues past them.
    pub item_errors: Vec<HarvestError>,
}

/// Converts the raw translator response for one URL into bibliographic
/// records: note folding, rule application, per-item augmentation,
/// generation and record-level exclusion. A single bad item never aborts
/// the batch.
pub async fn convert_payload(
    json_metadata: String,
    journal: Arc<JournalParams>,
    group: Arc<GroupParams>,
    authority: Option<Arc<AuthorityClient>>,
    harvest_url: String,
    skip_online_first_unconditionally: bool,
) -> Result<ConversionOutcome> {
    let parsed: serde_json::Value = serde_json::from_str(&json_metadata)?;
    let entries = parsed
        .as_array()
        .cloned()
        .ok_or_else(|| HarvestError::Conversion("expected a JSON array of items".into()))?;

    let items = fold_notes_into_items(entries)?;
    if items.is_empty() {
        return Err(HarvestError::EmptyResponse(harvest_url.clone()));
    }

    let mut outcome = ConversionOutcome::default();
    for mut item in items {
        apply_field_rules(&mut item, &journal.field_rules);

        if let Some(matched) = matches_exclusion_filters(&item, &journal.field_rules) {
            info!(url = %harvest_url, filter = %matched, "item matched exclusion filter");
            outcome.skipped_exclusion += 1;
            continue;
        }

        let mut metadata = from_translator_json(&item);
        if metadata.url.is_empty() {
            metadata.url = harvest_url.clone();
        }

        match convert_item(
            &mut metadata,
            &journal,
            &group,
            authority.as_deref(),
            &harvest_url,
            skip_online_first_unconditionally,
        )
        .await
        {
            Ok(ItemDisposition::Converted(generated)) => {
                if let Some(matched) = matches_record_exclusion_filters(&journal, &generated.record)
                {
                    info!(url = %harvest_url, filter = %matched, "record matched exclusion filter");
                    outcome.skipped_exclusion += 1;
                } else {
                    debug!(hash = %generated.hash, "generated record");
                    outcome.records.push(generated);
                }
            }
            Ok(ItemDisposition::OnlineFirst) => {
                debug!(url = %harvest_url, "skipping online-first article");
                outcome.skipped_online_first += 1;
            }
            Ok(ItemDisposition::EarlyView) => {
                debug!(url = %harvest_url, "skipping early-view article");
                outcome.skipped_early_view += 1;
            }
            Err(e) => {
                warn!(url = %harvest_url, error = %e, "couldn't convert record");
                outcome.item_errors.push(e);
            }
        }
    }

    Ok(outcome)
}

enum ItemDisposition {
    Converted(GeneratedRecord),
    OnlineFirst,
    EarlyView,
}

async fn convert_item(
    metadata: &mut crate::pipeline::processing::metadata::MetadataRecord,
    journal: &JournalParams,
    group: &GroupParams,
    authority: Option<&AuthorityClient>,
    harvest_url: &str,
    skip_online_first_unconditionally: bool,
) -> Result<ItemDisposition> {
    augment_metadata_record(metadata, journal, authority).await?;

    if is_online_first_exclusion(metadata, skip_online_first_unconditionally) {
        return Ok(ItemDisposition::OnlineFirst);
    }
    if is_early_view_exclusion(metadata) {
        return Ok(ItemDisposition::EarlyView);
    }

    let generated = generate_record(metadata, journal, group, harvest_url)?;
    Ok(ItemDisposition::Converted(generated))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskletState {
    Pending,
    Running,
    Complete,
}

type TaskletWork = Pin<Box<dyn Future<Output = Result<ConversionOutcome>> + Send + 'static>>;

struct QueuedTasklet {
    work: TaskletWork,
    sender: oneshot::Sender<Result<ConversionOutcome>>,
    state: Arc<Mutex<TaskletState>>,
}

/// Handle returned on submission; resolves once the tasklet completes.
pub struct ConversionFuture {
    receiver: oneshot::Receiver<Result<ConversionOutcome>>,
    state: Arc<Mutex<TaskletState>>,
}

impl ConversionFuture {
    pub async fn wait(self) -> Result<ConversionOutcome> {
        self.receiver
            .await
            .map_err(|_| HarvestError::Conversion("conversion tasklet was dropped".into()))?
    }

    pub fn state(&self) -> TaskletState {
        *self.state.lock().unwrap()
    }
}

struct ManagerInner {
    max_concurrent: usize,
    queue: Mutex<VecDeque<QueuedTasklet>>,
    active: Mutex<Vec<Arc<Mutex<TaskletState>>>>,
    running: AtomicUsize,
    stop: AtomicBool,
}

/// Bounded-concurrency conversion queue. A background loop promotes queued
/// tasklets in FIFO order while under the concurrency cap and reaps
/// completed ones; shutdown is cooperative via a stop flag observed by the
/// loop.
pub struct ConversionManager {
    inner: Arc<ManagerInner>,
    background: Option<tokio::task::JoinHandle<()>>,
}

const BACKGROUND_LOOP_INTERVAL: Duration = Duration::from_millis(16);

impl ConversionManager {
    pub fn new(max_concurrent: usize) -> Self {
        let inner = Arc::new(ManagerInner {
            max_concurrent: max_concurrent.max(1),
            queue: Mutex::new(VecDeque::new()),
            active: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
        });

        let loop_inner = Arc::clone(&inner);
        let background = tokio::spawn(async move {
            while !loop_inner.stop.load(Ordering::Acquire) {
                Self::process_queue(&loop_inner);
                Self::reap_completed(&loop_inner);
                tokio::time::sleep(BACKGROUND_LOOP_INTERVAL).await;
            }
        });

        ConversionManager {
            inner,
            background: Some(background),
        }
    }

    fn process_queue(inner: &Arc<ManagerInner>) {
        let mut queue = inner.queue.lock().unwrap();
        while inner.running.load(Ordering::Acquire) < inner.max_concurrent {
            let Some(tasklet) = queue.pop_front() else {
                break;
            };
            *tasklet.state.lock().unwrap() = TaskletState::Running;
            inner.running.fetch_add(1, Ordering::AcqRel);
            inner.active.lock().unwrap().push(Arc::clone(&tasklet.state));

            let task_inner = Arc::clone(inner);
            tokio::spawn(async move {
                let result = tasklet.work.await;
                *tasklet.state.lock().unwrap() = TaskletState::Complete;
                task_inner.running.fetch_sub(1, Ordering::AcqRel);
                // the caller may have dropped its future; that's fine
                let _ = tasklet.sender.send(result);
            });
        }
    }

    fn reap_completed(inner: &Arc<ManagerInner>) {
        inner
            .active
            .lock()
            .unwrap()
            .retain(|state| *state.lock().unwrap() != TaskletState::Complete);
    }

    /// Enqueues one conversion and immediately returns its future.
    pub fn submit<F>(&self, work: F) -> ConversionFuture
    where
        F: std::future::Future<Output = Result<ConversionOutcome>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let state = Arc::new(Mutex::new(TaskletState::Pending));
        self.inner.queue.lock().unwrap().push_back(QueuedTasklet {
            work: Box::pin(work),
            sender,
            state: Arc::clone(&state),
        });
        ConversionFuture { receiver, state }
    }

    /// Stops admitting new work and joins the background loop. In-flight
    /// tasklets are not cancelled.
    pub async fn shutdown(mut self) {
        self.inner.stop.store(true, Ordering::Release);
        if let Some(handle) = self.background.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ConversionManager {
    fn drop(&mut self) {
        self.inner.stop.store(true, Ordering::Release);
    }
}
