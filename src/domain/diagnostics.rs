//! Record-level diagnostics surfaced next to partial results

use serde::{Deserialize, Serialize};
use std::fmt;

use super::template::FieldType;

/// A post-processing step that could not apply; the field became a miss
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepFailure {
    pub field: String,
    pub step: String,
    pub reason: String,
}

impl StepFailure {
    pub fn new(field: &str, step: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            step: step.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on '{}': {}", self.step, self.field, self.reason)
    }
}

/// Kind of validation rule that was violated
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ViolationKind {
    MissingRequired,
    TypeMismatch { expected: FieldType },
    PatternMismatch { pattern: String },
    NotNumeric,
    OutOfRange { min: Option<f64>, max: Option<f64> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Violation {
    pub field: String,
    #[serde(flatten)]
    pub kind: ViolationKind,
}

impl Violation {
    pub fn new(field: &str, kind: ViolationKind) -> Self {
        Self {
            field: field.to_string(),
            kind,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::MissingRequired => write!(f, "required field '{}' is missing", self.field),
            ViolationKind::TypeMismatch { expected } => {
                write!(f, "field '{}' is not of type {expected:?}", self.field)
            }
            ViolationKind::PatternMismatch { pattern } => {
                write!(f, "field '{}' does not match /{pattern}/", self.field)
            }
            ViolationKind::NotNumeric => write!(f, "field '{}' is not numeric", self.field),
            ViolationKind::OutOfRange { min, max } => write!(
                f,
                "field '{}' is outside [{}, {}]",
                self.field,
                min.map_or_else(|| "-inf".to_string(), |v| v.to_string()),
                max.map_or_else(|| "+inf".to_string(), |v| v.to_string()),
            ),
        }
    }
}

/// Result of validating one record; accepted only with zero violations
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}
