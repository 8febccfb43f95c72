//! Scrapeflow - template-driven structured data extraction
//!
//! Declarative templates resolve field values through ordered selector
//! fallbacks, normalize them with a post-processing pipeline and validate
//! the resulting records. Work runs as cancellable, monitorable jobs under a
//! shared concurrency limit. An auto-detector suggests selectors while
//! templates are being authored.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{JobHandle, JobScheduler, JobSpec};
pub use domain::{JobState, JobStatus, Template};
