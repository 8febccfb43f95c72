//! Application layer
//!
//! Runs templates against fetched documents and drives scraping jobs
//! through their lifecycle.

pub mod job_controller;
pub mod job_scheduler;
pub mod template_extractor;

pub use job_controller::{
    BatchEvent, JobController, JobError, JobHandle, JobSpec, WeakJobHandle,
};
pub use job_scheduler::JobScheduler;
pub use template_extractor::{CompiledTemplate, PageExtraction};
