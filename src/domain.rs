//! Domain layer for template-driven extraction
//!
//! Plain data only: templates, extracted records, diagnostics, jobs and
//! auto-detect suggestions. Behaviour lives in `infrastructure` and
//! `application`.

pub mod diagnostics;
pub mod extraction;
pub mod job;
pub mod suggestion;
pub mod template;

pub use diagnostics::{StepFailure, ValidationReport, Violation, ViolationKind};
pub use extraction::{ExtractionRecord, FieldValue, Provenance, Resolution};
pub use job::{
    DelayRange, InvalidTransition, JobEvent, JobId, JobOverrides, JobResults, JobState, JobStatus,
    JobTargets, RejectedRecord, UrlFailure,
};
pub use suggestion::{AnalysisReport, DetectionSource, ElementMetadata, PageInfo, Suggestion};
pub use template::{
    AutomationMode, ExtractionMode, FetcherSettings, FieldSpec, FieldType, NumericRange,
    PaginationConfig, PostProcessStep, Template, Transform, ValidationRules,
};
