//! Job Scheduler
//!
//! Admits jobs, bounds concurrent fetch-and-extract units across all of them
//! with one semaphore, and keeps a registry of jobs by id. The registry holds
//! weak references only: a job and its results live as long as a caller's
//! [`JobHandle`] or its running controller, and dead entries are pruned on
//! the next admission.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore, mpsc};
use tracing::info;

use super::job_controller::{
    BatchEvent, JobController, JobError, JobHandle, JobSpec, WeakJobHandle,
};
use crate::domain::job::{JobId, JobOverrides, JobState, JobStatus, JobTargets};
use crate::domain::template::Template;
use crate::infrastructure::config::{AppConfig, JobDefaults};
use crate::infrastructure::fetcher::Fetcher;

pub struct JobScheduler {
    permits: Arc<Semaphore>,
    max_units: usize,
    defaults: JobDefaults,
    fetcher: Arc<dyn Fetcher>,
    jobs: RwLock<HashMap<JobId, WeakJobHandle>>,
}

impl JobScheduler {
    pub fn new(config: &AppConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        Self::with_limit(
            config.scheduler.max_concurrent_units,
            config.job_defaults.clone(),
            fetcher,
        )
    }

    pub fn with_limit(max_units: usize, defaults: JobDefaults, fetcher: Arc<dyn Fetcher>) -> Self {
        let max_units = max_units.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_units)),
            max_units,
            defaults,
            fetcher,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub const fn max_units(&self) -> usize {
        self.max_units
    }

    /// Free admission slots right now
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Start a job in the background and return its handle
    pub async fn submit(&self, spec: JobSpec) -> JobHandle {
        let controller = self.controller(spec);
        self.launch(controller).await
    }

    /// Start a batch job; each finished target is reported on the returned
    /// channel in completion order
    pub async fn submit_batch<I, S>(
        &self,
        template: Template,
        urls: I,
        overrides: JobOverrides,
    ) -> (JobHandle, mpsc::UnboundedReceiver<BatchEvent>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let spec = JobSpec::new(template, JobTargets::batch(urls)).with_overrides(overrides);
        let controller = self.controller(spec).with_events(tx);
        (self.launch(controller).await, rx)
    }

    fn controller(&self, spec: JobSpec) -> JobController {
        JobController::new(
            spec,
            &self.defaults,
            self.fetcher.clone(),
            self.permits.clone(),
        )
    }

    async fn launch(&self, controller: JobController) -> JobHandle {
        let handle = controller.handle();
        {
            let mut jobs = self.jobs.write().await;
            jobs.retain(|_, job| job.upgrade().is_some());
            jobs.insert(handle.id(), handle.downgrade());
        }
        info!("Admitted job {}", handle.id());
        tokio::spawn(controller.run());
        handle
    }

    pub async fn job(&self, id: JobId) -> Option<JobHandle> {
        self.jobs.read().await.get(&id).and_then(WeakJobHandle::upgrade)
    }

    /// Ids of jobs still referenced by a caller or still running
    pub async fn job_ids(&self) -> Vec<JobId> {
        self.live_jobs().await.iter().map(JobHandle::id).collect()
    }

    async fn live_jobs(&self) -> Vec<JobHandle> {
        self.jobs
            .read()
            .await
            .values()
            .filter_map(WeakJobHandle::upgrade)
            .collect()
    }

    pub async fn status(&self, id: JobId) -> Result<JobStatus, JobError> {
        Ok(self.handle(id).await?.status().await)
    }

    pub async fn statuses(&self) -> Vec<JobStatus> {
        let handles = self.live_jobs().await;
        let mut statuses = Vec::with_capacity(handles.len());
        for handle in handles {
            statuses.push(handle.status().await);
        }
        statuses
    }

    pub async fn stop(&self, id: JobId) -> Result<JobState, JobError> {
        self.handle(id).await?.stop().await
    }

    pub async fn cancel(&self, id: JobId) -> Result<JobState, JobError> {
        self.handle(id).await?.cancel().await
    }

    /// Cancel every running job
    pub async fn shutdown(&self) {
        let handles = self.live_jobs().await;
        for handle in handles {
            if handle.state() == JobState::Running {
                let _ = handle.cancel().await;
            }
        }
    }

    /// Drop finished or released jobs from the registry, returning how many
    /// were removed
    pub async fn forget_finished(&self) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| job.upgrade().is_some_and(|handle| !handle.state().is_terminal()));
        before - jobs.len()
    }

    async fn handle(&self, id: JobId) -> Result<JobHandle, JobError> {
        self.job(id).await.ok_or(JobError::NotFound(id))
    }
}
