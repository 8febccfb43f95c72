//! Scraping job lifecycle
//!
//! `created → running → {completed | failed | stopped | cancelled}`.
//! [`JobState::transition`] is the only place a state changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;
use uuid::Uuid;

use super::diagnostics::{StepFailure, Violation};
use super::extraction::ExtractionRecord;

pub type JobId = Uuid;

/// Current state of a job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Running,
    Completed,
    Failed,
    Stopped,
    Cancelled,
}

/// Requested state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Start,
    Progress,
    Complete,
    Fail,
    Stop,
    Cancel,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid transition: cannot {event} a job that is {from}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub event: JobEvent,
}

impl JobState {
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Stopped | Self::Cancelled
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::Cancelled => "cancelled",
        }
    }

    /// Apply `event`; anything not in the lifecycle graph is rejected and
    /// leaves the caller's state untouched
    pub const fn transition(self, event: JobEvent) -> Result<Self, InvalidTransition> {
        match (self, event) {
            (Self::Created, JobEvent::Start) => Ok(Self::Running),
            (Self::Running, JobEvent::Progress) => Ok(Self::Running),
            (Self::Running, JobEvent::Complete) => Ok(Self::Completed),
            (Self::Running, JobEvent::Fail) => Ok(Self::Failed),
            (Self::Running, JobEvent::Stop) => Ok(Self::Stopped),
            (Self::Running, JobEvent::Cancel) => Ok(Self::Cancelled),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Self::Start => "start",
            Self::Progress => "report progress on",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Stop => "stop",
            Self::Cancel => "cancel",
        };
        f.write_str(verb)
    }
}

/// Inclusive delay range in milliseconds between successive fetches
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub const fn none() -> Self {
        Self::new(0, 0)
    }

    pub const fn is_valid(&self) -> bool {
        self.min_ms <= self.max_ms
    }

    pub fn as_range(&self) -> RangeInclusive<u64> {
        self.min_ms..=self.max_ms.max(self.min_ms)
    }

    /// Draw a delay uniformly from the range
    pub fn sample(&self) -> std::time::Duration {
        std::time::Duration::from_millis(fastrand::u64(self.as_range()))
    }
}

/// Per-job overrides of the configured defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobOverrides {
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub delay_range_ms: Option<DelayRange>,
    #[serde(default)]
    pub retry_attempts: Option<u32>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// What a job scrapes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobTargets {
    pub urls: Vec<String>,

    /// Batch targets run concurrently and report in completion order;
    /// otherwise targets run sequentially in declared order
    #[serde(default)]
    pub batch: bool,
}

impl JobTargets {
    pub fn single(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            batch: false,
        }
    }

    pub fn sequential<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            batch: false,
        }
    }

    pub fn batch<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            batch: true,
            ..Self::sequential(urls)
        }
    }
}

/// A record that failed validation, kept with its violations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RejectedRecord {
    pub record: ExtractionRecord,
    pub violations: Vec<Violation>,
}

/// A target URL whose fetch failed for good
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UrlFailure {
    pub url: String,
    pub error: String,
    pub attempts: u32,
}

/// Accumulated output of a job; partial results survive stop/cancel
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobResults {
    pub records: Vec<ExtractionRecord>,
    pub rejected: Vec<RejectedRecord>,
    pub step_failures: Vec<StepFailure>,
    pub failed_urls: Vec<UrlFailure>,
}

/// Polled status object for monitoring clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatus {
    pub job_id: JobId,
    pub template_name: String,
    pub status: JobState,
    /// Percent of targets processed, 0..=100
    pub progress: f64,
    pub items_scraped: u64,
    pub pages_processed: u64,
    pub records_rejected: u64,
    pub targets_total: u64,
    pub targets_done: u64,
    pub failed_urls: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobStatus {
    pub fn new(job_id: JobId, template_name: &str, targets_total: usize) -> Self {
        Self {
            job_id,
            template_name: template_name.to_string(),
            status: JobState::Created,
            progress: 0.0,
            items_scraped: 0,
            pages_processed: 0,
            records_rejected: 0,
            targets_total: targets_total as u64,
            targets_done: 0,
            failed_urls: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub const fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Recompute `progress` from target counters
    pub fn refresh_progress(&mut self) {
        self.progress = if self.targets_total == 0 {
            100.0
        } else {
            let ratio = self.targets_done as f64 / self.targets_total as f64;
            (ratio * 10_000.0).round() / 100.0
        };
    }
}
