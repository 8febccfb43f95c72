//! Record validation
//!
//! Checks run in a fixed order (required, type, pattern, range) and every
//! violation is collected; nothing short-circuits.

use regex::Regex;
use std::collections::BTreeMap;

use super::parsing::{ParsingError, ParsingResult};
use crate::domain::diagnostics::{ValidationReport, Violation, ViolationKind};
use crate::domain::extraction::{ExtractionRecord, FieldValue};
use crate::domain::template::{FieldType, ValidationRules};

/// Validation rules with regex patterns compiled up front
#[derive(Debug, Clone)]
pub struct ValidationEngine {
    rules: ValidationRules,
    patterns: BTreeMap<String, Regex>,
}

impl ValidationEngine {
    pub fn new(rules: &ValidationRules) -> ParsingResult<Self> {
        let patterns = rules
            .patterns
            .iter()
            .map(|(field, pattern)| {
                Regex::new(pattern)
                    .map(|regex| (field.clone(), regex))
                    .map_err(|e| ParsingError::invalid_pattern(field, pattern, e))
            })
            .collect::<ParsingResult<BTreeMap<_, _>>>()?;

        Ok(Self {
            rules: rules.clone(),
            patterns,
        })
    }

    pub fn validate(&self, record: &ExtractionRecord) -> ValidationReport {
        let mut errors = Vec::new();

        for field in &self.rules.required {
            if !record.is_present(field) {
                errors.push(Violation::new(field, ViolationKind::MissingRequired));
            }
        }

        for (field, expected) in &self.rules.types {
            if let Some(value) = record.get(field) {
                if !matches_type(value, *expected) {
                    errors.push(Violation::new(
                        field,
                        ViolationKind::TypeMismatch {
                            expected: *expected,
                        },
                    ));
                }
            }
        }

        for (field, regex) in &self.patterns {
            if let Some(value) = record.get(field) {
                if !matches_pattern(value, regex) {
                    errors.push(Violation::new(
                        field,
                        ViolationKind::PatternMismatch {
                            pattern: regex.as_str().to_string(),
                        },
                    ));
                }
            }
        }

        for (field, range) in &self.rules.ranges {
            let Some(value) = record.get(field) else {
                continue;
            };
            match value.as_f64() {
                Some(number) if range.contains(number) => {}
                Some(_) => errors.push(Violation::new(
                    field,
                    ViolationKind::OutOfRange {
                        min: range.min,
                        max: range.max,
                    },
                )),
                None => errors.push(Violation::new(field, ViolationKind::NotNumeric)),
            }
        }

        ValidationReport { errors }
    }
}

fn matches_type(value: &FieldValue, expected: FieldType) -> bool {
    match expected {
        FieldType::String => matches!(value, FieldValue::Text(_)),
        FieldType::Number => value.is_numeric(),
        FieldType::List => matches!(value, FieldValue::List(_)),
    }
}

/// Scalars are matched on their text form; lists need every item to match
fn matches_pattern(value: &FieldValue, regex: &Regex) -> bool {
    match value {
        FieldValue::List(items) => items.iter().all(|item| matches_pattern(item, regex)),
        scalar => regex.is_match(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::extraction::Provenance;
    use crate::domain::template::NumericRange;

    fn rules() -> ValidationRules {
        ValidationRules {
            required: vec!["title".into(), "price".into()],
            types: [
                ("price".to_string(), FieldType::Number),
                ("tags".to_string(), FieldType::List),
            ]
            .into(),
            patterns: [("sku".to_string(), r"^[A-Z]{3}-\d+$".to_string())].into(),
            ranges: [("price".to_string(), NumericRange::new(Some(0.0), Some(1000.0)))].into(),
        }
    }

    fn record(fields: &[(&str, FieldValue)]) -> ExtractionRecord {
        let mut record = ExtractionRecord::new("https://shop.test/p/1");
        for (name, value) in fields {
            record.insert(*name, value.clone(), Provenance::Primary);
        }
        record
    }

    #[test]
    fn valid_record_has_no_violations() {
        let engine = ValidationEngine::new(&rules()).unwrap();
        let report = engine.validate(&record(&[
            ("title", FieldValue::text("Widget")),
            ("price", FieldValue::Number(12.0)),
            ("tags", FieldValue::texts(["a"])),
            ("sku", FieldValue::text("ABC-12")),
        ]));
        assert!(report.is_ok(), "{:?}", report.errors);
    }

    #[test]
    fn missing_required_is_rejected_even_when_rest_is_valid() {
        let engine = ValidationEngine::new(&rules()).unwrap();
        let report = engine.validate(&record(&[("price", FieldValue::Number(12.0))]));
        assert!(!report.is_ok());
        assert_eq!(
            report.errors,
            vec![Violation::new("title", ViolationKind::MissingRequired)]
        );
    }

    #[test]
    fn blank_required_text_counts_as_missing() {
        let engine = ValidationEngine::new(&rules()).unwrap();
        let report = engine.validate(&record(&[
            ("title", FieldValue::text("   ")),
            ("price", FieldValue::Number(1.0)),
        ]));
        assert_eq!(report.errors[0].kind, ViolationKind::MissingRequired);
    }

    #[test]
    fn violations_accumulate_in_check_order() {
        let engine = ValidationEngine::new(&rules()).unwrap();
        let report = engine.validate(&record(&[
            ("price", FieldValue::Number(5000.0)),
            ("tags", FieldValue::text("not a list")),
            ("sku", FieldValue::text("abc")),
        ]));

        let kinds: Vec<_> = report.errors.iter().map(|v| v.kind.clone()).collect();
        assert_eq!(kinds.len(), 4);
        assert_eq!(kinds[0], ViolationKind::MissingRequired);
        assert_eq!(
            kinds[1],
            ViolationKind::TypeMismatch {
                expected: FieldType::List
            }
        );
        assert!(matches!(kinds[2], ViolationKind::PatternMismatch { .. }));
        assert!(matches!(kinds[3], ViolationKind::OutOfRange { .. }));
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let engine = ValidationEngine::new(&rules()).unwrap();
        for price in [0.0, 1000.0] {
            let report = engine.validate(&record(&[
                ("title", FieldValue::text("Widget")),
                ("price", FieldValue::Number(price)),
            ]));
            assert!(report.is_ok());
        }
        let report = engine.validate(&record(&[
            ("title", FieldValue::text("Widget")),
            ("price", FieldValue::Number(-0.01)),
        ]));
        assert!(!report.is_ok());
    }

    #[test]
    fn non_numeric_range_field_is_a_violation() {
        let mut rules = ValidationRules::default();
        rules.ranges.insert("rating".into(), NumericRange::new(Some(0.0), Some(5.0)));
        let engine = ValidationEngine::new(&rules).unwrap();
        let report = engine.validate(&record(&[("rating", FieldValue::text("great"))]));
        assert_eq!(report.errors[0].kind, ViolationKind::NotNumeric);
    }

    #[test]
    fn malformed_pattern_is_rejected_at_construction() {
        let mut rules = ValidationRules::default();
        rules.patterns.insert("sku".into(), "([".into());
        assert!(matches!(
            ValidationEngine::new(&rules),
            Err(ParsingError::InvalidPattern { .. })
        ));
    }
}
