//! Job Controller
//!
//! Owns one scraping job: drives it through its lifecycle, fetches targets
//! under the shared admission limit, runs the template on every page and
//! accumulates results. Every state change goes through
//! [`JobState::transition`]; clients observe the job through a cloneable
//! [`JobHandle`].

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::template_extractor::{CompiledTemplate, PageExtraction};
use crate::domain::job::{
    InvalidTransition, JobEvent, JobId, JobOverrides, JobResults, JobState, JobStatus, JobTargets,
    RejectedRecord, UrlFailure,
};
use crate::domain::template::Template;
use crate::infrastructure::config::JobDefaults;
use crate::infrastructure::fetcher::{Document, FetchConfig, FetchError, Fetcher};
use crate::infrastructure::parsing::{ParseContext, ParsingError};
use crate::infrastructure::retry_manager::{RetryError, retry_with_backoff};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Invalid template: {0}")]
    InvalidTemplate(#[from] ParsingError),

    #[error("Fetching {url} failed after {attempts} attempts: {source}")]
    Fetch {
        url: String,
        attempts: u32,
        source: FetchError,
    },

    #[error("All {count} targets failed")]
    AllTargetsFailed { count: usize },

    #[error("Job {0} not found")]
    NotFound(JobId),
}

/// What to run: a template snapshot, its targets and per-job overrides
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub template: Template,
    pub targets: JobTargets,
    pub overrides: JobOverrides,
}

impl JobSpec {
    pub fn new(template: Template, targets: JobTargets) -> Self {
        Self {
            template,
            targets,
            overrides: JobOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: JobOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Completion notice for one target of a batch job
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEvent {
    pub job_id: JobId,
    /// Position of the target in the submitted list
    pub index: usize,
    pub url: String,
    pub records: usize,
    pub rejected: usize,
    pub error: Option<String>,
    /// Job progress after this target, percent
    pub progress: f64,
}

struct JobShared {
    status: JobStatus,
    results: JobResults,
}

impl JobShared {
    fn apply(&mut self, event: JobEvent) -> Result<JobState, InvalidTransition> {
        let next = self.status.status.transition(event)?;
        self.status.status = next;

        let now = chrono::Utc::now();
        if event == JobEvent::Start {
            self.status.started_at = Some(now);
        }
        if next.is_terminal() {
            self.status.finished_at = Some(now);
        }
        Ok(next)
    }
}

struct JobInner {
    id: JobId,
    shared: Mutex<JobShared>,
    state_tx: watch::Sender<JobState>,
    cancel: CancellationToken,
}

/// Cloneable view of a job for polling and control
#[derive(Clone)]
pub struct JobHandle {
    inner: Arc<JobInner>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle").field("id", &self.inner.id).finish()
    }
}

/// Non-owning reference to a job; does not keep its results alive
#[derive(Clone)]
pub struct WeakJobHandle {
    inner: Weak<JobInner>,
}

impl WeakJobHandle {
    pub fn upgrade(&self) -> Option<JobHandle> {
        self.inner.upgrade().map(|inner| JobHandle { inner })
    }
}

impl JobHandle {
    fn new(id: JobId, template_name: &str, targets_total: usize) -> Self {
        let (state_tx, _) = watch::channel(JobState::Created);
        Self {
            inner: Arc::new(JobInner {
                id,
                shared: Mutex::new(JobShared {
                    status: JobStatus::new(id, template_name, targets_total),
                    results: JobResults::default(),
                }),
                state_tx,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.inner.id
    }

    pub fn downgrade(&self) -> WeakJobHandle {
        WeakJobHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn state(&self) -> JobState {
        *self.inner.state_tx.borrow()
    }

    pub async fn status(&self) -> JobStatus {
        self.inner.shared.lock().await.status.clone()
    }

    /// Results so far; partial while running and after stop/cancel
    pub async fn results(&self) -> JobResults {
        self.inner.shared.lock().await.results.clone()
    }

    /// Stop a running job, keeping what it has collected
    pub async fn stop(&self) -> Result<JobState, JobError> {
        Ok(self.apply(JobEvent::Stop, None).await?)
    }

    pub async fn cancel(&self) -> Result<JobState, JobError> {
        Ok(self.apply(JobEvent::Cancel, None).await?)
    }

    /// Wait until the job reaches a terminal state
    pub async fn wait(&self) -> JobStatus {
        let mut rx = self.inner.state_tx.subscribe();
        // the sender lives as long as `self`, so this cannot close early
        let _ = rx.wait_for(|state| state.is_terminal()).await;
        self.status().await
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    async fn apply(
        &self,
        event: JobEvent,
        error: Option<String>,
    ) -> Result<JobState, InvalidTransition> {
        let next = {
            let mut shared = self.inner.shared.lock().await;
            let next = shared.apply(event)?;
            if error.is_some() {
                shared.status.error = error;
            }
            if next.is_terminal() {
                shared.status.refresh_progress();
            }
            next
        };

        if next.is_terminal() {
            self.inner.cancel.cancel();
            info!("Job {} is {}", self.inner.id, next);
        }
        self.inner.state_tx.send_replace(next);
        Ok(next)
    }
}

/// Result of running every page of one target
struct TargetOutcome {
    index: usize,
    url: String,
    records: usize,
    rejected: usize,
    /// Failure of the target's first page; later page failures only land
    /// in `failed_urls`
    failure: Option<(UrlFailure, FetchError)>,
}

/// Drives a single job to a terminal state
pub struct JobController {
    handle: JobHandle,
    spec: JobSpec,
    settings: JobDefaults,
    fetcher: Arc<dyn Fetcher>,
    permits: Arc<Semaphore>,
    job_permits: Option<Arc<Semaphore>>,
    events: Option<mpsc::UnboundedSender<BatchEvent>>,
    /// When the job last started a fetch; pacing of all its units goes through here
    last_fetch: Mutex<Option<Instant>>,
}

impl JobController {
    pub fn new(
        spec: JobSpec,
        defaults: &JobDefaults,
        fetcher: Arc<dyn Fetcher>,
        permits: Arc<Semaphore>,
    ) -> Self {
        let id = Uuid::new_v4();
        let handle = JobHandle::new(id, &spec.template.name, spec.targets.urls.len());
        let settings = defaults.with_overrides(&spec.overrides);
        let job_permits = spec
            .overrides
            .concurrency
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        Self {
            handle,
            spec,
            settings,
            fetcher,
            permits,
            job_permits,
            events: None,
            last_fetch: Mutex::new(None),
        }
    }

    /// Report batch targets in completion order on `events`
    pub fn with_events(mut self, events: mpsc::UnboundedSender<BatchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn handle(&self) -> JobHandle {
        self.handle.clone()
    }

    /// Run the job to a terminal state and return its final status
    pub async fn run(self) -> JobStatus {
        if let Err(e) = self.handle.apply(JobEvent::Start, None).await {
            warn!("Job {} not started: {}", self.handle.id(), e);
            return self.handle.status().await;
        }
        info!(
            "Job {} started: template '{}', {} targets{}",
            self.handle.id(),
            self.spec.template.name,
            self.spec.targets.urls.len(),
            if self.spec.targets.batch { " (batch)" } else { "" }
        );

        let template = match CompiledTemplate::compile(&self.spec.template) {
            Ok(template) => template,
            Err(e) => {
                self.fail(&JobError::from(e)).await;
                return self.handle.status().await;
            }
        };

        let outcomes = if self.spec.targets.batch {
            self.run_batch(&template).await
        } else {
            self.run_sequential(&template).await
        };

        if let Err(e) = self.conclude(&outcomes) {
            self.fail(&e).await;
        } else if self.handle.apply(JobEvent::Complete, None).await.is_err() {
            debug!("Job {} already finished before completion", self.handle.id());
        }

        self.handle.status().await
    }

    async fn run_sequential(&self, template: &CompiledTemplate) -> Vec<TargetOutcome> {
        let mut outcomes = Vec::with_capacity(self.spec.targets.urls.len());
        for (index, url) in self.spec.targets.urls.iter().enumerate() {
            if self.is_cancelled() {
                break;
            }
            let outcome = self.run_target(template, index, url).await;
            let fatal = outcome.failure.as_ref().is_some_and(|(_, e)| is_fatal(e));
            outcomes.push(outcome);
            if fatal {
                break;
            }
        }
        outcomes
    }

    async fn run_batch(&self, template: &CompiledTemplate) -> Vec<TargetOutcome> {
        let mut pending: FuturesUnordered<_> = self
            .spec
            .targets
            .urls
            .iter()
            .enumerate()
            .map(|(index, url)| self.run_target(template, index, url))
            .collect();

        let mut outcomes = Vec::with_capacity(pending.len());
        while let Some(outcome) = pending.next().await {
            let progress = self.handle.status().await.progress;
            if let Some(events) = &self.events {
                let event = BatchEvent {
                    job_id: self.handle.id(),
                    index: outcome.index,
                    url: outcome.url.clone(),
                    records: outcome.records,
                    rejected: outcome.rejected,
                    error: outcome.failure.as_ref().map(|(f, _)| f.error.clone()),
                    progress,
                };
                if events.send(event).is_err() {
                    debug!("Batch listener for job {} went away", self.handle.id());
                }
            }
            let fatal = outcome.failure.as_ref().is_some_and(|(_, e)| is_fatal(e));
            outcomes.push(outcome);
            if fatal {
                self.handle.cancellation().cancel();
                break;
            }
        }
        outcomes
    }

    /// Fetch and extract every page of one target, following pagination
    async fn run_target(
        &self,
        template: &CompiledTemplate,
        index: usize,
        url: &str,
    ) -> TargetOutcome {
        let mut outcome = TargetOutcome {
            index,
            url: url.to_string(),
            records: 0,
            rejected: 0,
            failure: None,
        };
        let max_pages = if template.paginates() {
            template
                .template()
                .pagination
                .max_pages
                .min(self.settings.max_pages)
                .max(1)
        } else {
            1
        };

        let mut visited = HashSet::new();
        let mut next = Some(url.to_string());
        let mut page_index = 0;

        while let Some(page_url) = next.take() {
            if page_index >= max_pages || self.is_cancelled() || !visited.insert(page_url.clone())
            {
                break;
            }

            let (document, permits, attempts) = match self.fetch_page(&page_url).await {
                Ok(fetched) => fetched,
                Err(RetryError::Cancelled { .. }) => break,
                Err(RetryError::Exhausted { error, attempts })
                | Err(RetryError::Permanent { error, attempts }) => {
                    warn!("Target {} failed at {}: {}", url, page_url, error);
                    let failure = UrlFailure {
                        url: page_url.clone(),
                        error: error.to_string(),
                        attempts,
                    };
                    self.record_failure(failure.clone()).await;
                    if page_index == 0 {
                        outcome.failure = Some((failure, error));
                    }
                    break;
                }
            };

            let ctx = ParseContext::new(&document.final_url).with_page_index(page_index);
            let page = template.extract_with(&document.html, &ctx);
            drop(permits);
            debug!(
                "Extracted page {} of {} after {} attempts",
                page_index + 1,
                url,
                attempts
            );

            next = page.next_page.clone();
            let accepted = page.is_accepted();
            if !self.record_page(page).await {
                break;
            }
            if accepted {
                outcome.records += 1;
            } else {
                outcome.rejected += 1;
            }
            page_index += 1;
        }

        self.finish_target(&outcome).await;
        outcome
    }

    /// One fetch unit with retries: pace, take the admission slots, fetch
    /// under the timeout. Slots are released before any backoff wait, and
    /// retries wait out the backoff only, not the pacing delay.
    async fn fetch_page(
        &self,
        url: &str,
    ) -> Result<(Document, Vec<OwnedSemaphorePermit>, u32), RetryError<FetchError>> {
        let cancel = self.handle.cancellation();
        let config = FetchConfig::from_settings(&self.spec.template.fetcher, self.settings.timeout());

        let result = retry_with_backoff(&self.settings.retry, cancel, |attempt| {
            let config = &config;
            async move {
                let permits = match self.admit(attempt == 1).await {
                    Ok(permits) => permits,
                    Err(e) => return Err(e),
                };
                debug!("Fetching {} (attempt {})", url, attempt);

                let fetch = tokio::time::timeout(config.timeout, self.fetcher.fetch(url, config));
                tokio::select! {
                    result = fetch => match result {
                        Ok(Ok(document)) => Ok((document, permits)),
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(FetchError::Timeout {
                            url: url.to_string(),
                            timeout_ms: config.timeout.as_millis() as u64,
                        }),
                    },
                    () = cancel.cancelled() => Err(cancelled(url)),
                }
            }
        })
        .await;

        // anything that ends after cancellation is a cancellation, not a failure
        if cancel.is_cancelled() {
            let attempts = result
                .as_ref()
                .map_or_else(RetryError::attempts, |(_, attempts)| *attempts);
            return Err(RetryError::Cancelled { attempts });
        }
        let ((document, permits), attempts) = result?;
        Ok((document, permits, attempts))
    }

    /// Admit one fetch of this job. With `paced`, waits until the sampled
    /// delay has passed since the job's previous fetch started; the wait
    /// holds no admission slot. Units of one job pass through one at a time,
    /// so batch fetches are spaced like sequential ones.
    async fn admit(&self, paced: bool) -> Result<Vec<OwnedSemaphorePermit>, FetchError> {
        let cancel = self.handle.cancellation();
        let mut last_fetch = self.last_fetch.lock().await;
        if let Some(previous) = (*last_fetch).filter(|_| paced) {
            let delay = self.settings.delay_range_ms.sample();
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(cancelled("")),
                    () = tokio::time::sleep_until(previous + delay) => {}
                }
            }
        }
        let permits = self.acquire().await?;
        if cancel.is_cancelled() {
            return Err(cancelled(""));
        }
        *last_fetch = Some(Instant::now());
        Ok(permits)
    }

    /// Take the per-job slot (if limited) and then a scheduler slot
    async fn acquire(&self) -> Result<Vec<OwnedSemaphorePermit>, FetchError> {
        let cancel = self.handle.cancellation();
        let mut permits = Vec::with_capacity(2);
        let semaphores = self.job_permits.iter().chain(std::iter::once(&self.permits));

        for semaphore in semaphores {
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit.map_err(|_| FetchError::Automation {
                    url: String::new(),
                    reason: "scheduler is shut down".into(),
                    recoverable: false,
                })?,
                () = cancel.cancelled() => return Err(cancelled("")),
            };
            permits.push(permit);
        }
        Ok(permits)
    }

    /// Store a page's outcome; false once the job is no longer running
    async fn record_page(&self, page: PageExtraction) -> bool {
        let mut shared = self.handle.inner.shared.lock().await;
        if shared.status.is_finished() {
            debug!("Discarding page {} for finished job", page.record.url);
            return false;
        }
        if shared.apply(JobEvent::Progress).is_err() {
            return false;
        }

        shared.status.pages_processed += 1;
        shared.results.step_failures.extend(page.step_failures);
        if page.violations.is_empty() {
            shared.status.items_scraped += 1;
            shared.results.records.push(page.record);
        } else {
            shared.status.records_rejected += 1;
            shared.results.rejected.push(RejectedRecord {
                record: page.record,
                violations: page.violations,
            });
        }
        true
    }

    async fn record_failure(&self, failure: UrlFailure) {
        let mut shared = self.handle.inner.shared.lock().await;
        if shared.status.is_finished() {
            return;
        }
        shared.status.failed_urls += 1;
        shared.results.failed_urls.push(failure);
    }

    async fn finish_target(&self, outcome: &TargetOutcome) {
        let mut shared = self.handle.inner.shared.lock().await;
        if shared.status.is_finished() {
            return;
        }
        shared.status.targets_done += 1;
        shared.status.refresh_progress();
        info!(
            "Target {}/{} done: {} ({} records, {} rejected)",
            shared.status.targets_done,
            shared.status.targets_total,
            outcome.url,
            outcome.records,
            outcome.rejected
        );
    }

    /// Decide whether the finished run is a failure
    fn conclude(&self, outcomes: &[TargetOutcome]) -> Result<(), JobError> {
        let failures: Vec<&(UrlFailure, FetchError)> =
            outcomes.iter().filter_map(|o| o.failure.as_ref()).collect();

        if let Some((failure, error)) = failures.iter().find(|(_, e)| is_fatal(e)) {
            return Err(JobError::Fetch {
                url: failure.url.clone(),
                attempts: failure.attempts,
                source: error.clone(),
            });
        }

        let total = self.spec.targets.urls.len();
        if total > 0 && failures.len() == total {
            if let [(failure, error)] = failures.as_slice() {
                return Err(JobError::Fetch {
                    url: failure.url.clone(),
                    attempts: failure.attempts,
                    source: error.clone(),
                });
            }
            return Err(JobError::AllTargetsFailed { count: total });
        }
        Ok(())
    }

    async fn fail(&self, e: &JobError) {
        error!("Job {} failed: {}", self.handle.id(), e);
        if self
            .handle
            .apply(JobEvent::Fail, Some(e.to_string()))
            .await
            .is_err()
        {
            debug!("Job {} already finished before failure", self.handle.id());
        }
    }

    fn is_cancelled(&self) -> bool {
        self.handle.cancellation().is_cancelled()
    }
}

/// Unrecoverable automation failures end the whole job
const fn is_fatal(error: &FetchError) -> bool {
    matches!(
        error,
        FetchError::Automation {
            recoverable: false,
            ..
        }
    )
}

fn cancelled(url: &str) -> FetchError {
    FetchError::Automation {
        url: url.to_string(),
        reason: "job cancelled".into(),
        recoverable: false,
    }
}
