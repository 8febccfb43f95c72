//! Post-processing pipeline
//!
//! Steps run strictly in declared order and each touches only its named
//! field. A step on an absent field is a no-op. A step that cannot apply
//! turns its field into a miss and is reported as a [`StepFailure`]; the
//! remaining steps keep running. List items a step cannot handle are dropped,
//! each reported as its own [`StepFailure`].

use tracing::{debug, warn};

use super::parsing::ParseContext;
use crate::domain::diagnostics::StepFailure;
use crate::domain::extraction::{ExtractionRecord, FieldValue};
use crate::domain::template::{PostProcessStep, Transform};

/// Normalized availability labels
pub mod availability {
    pub const IN_STOCK: &str = "in_stock";
    pub const OUT_OF_STOCK: &str = "out_of_stock";
    pub const UNKNOWN: &str = "unknown";

    /// Checked first; "unavailable" would otherwise hit "available"
    pub const OUT_OF_STOCK_KEYWORDS: &[&str] = &["out of stock", "unavailable", "sold out"];
    pub const IN_STOCK_KEYWORDS: &[&str] = &["in stock", "available", "ready"];
}

/// Apply `steps` to `record` in order, collecting failures
pub fn apply(
    record: &mut ExtractionRecord,
    steps: &[PostProcessStep],
    ctx: &ParseContext,
) -> Vec<StepFailure> {
    let mut failures = Vec::new();

    for step in steps {
        let Some(value) = record.clear(&step.field) else {
            debug!(
                "Skipping {} on absent field '{}'",
                step.transform.name(),
                step.field
            );
            continue;
        };

        match apply_transform(value, &step.transform, ctx) {
            Ok(Transformed { value, dropped }) => {
                for reason in dropped {
                    warn!(
                        "Post-processing {} dropped an item of '{}': {}",
                        step.transform.name(),
                        step.field,
                        reason
                    );
                    failures.push(StepFailure::new(
                        &step.field,
                        step.transform.name(),
                        format!("item dropped: {reason}"),
                    ));
                }
                record.values.insert(step.field.clone(), value);
            }
            Err(reason) => {
                warn!(
                    "Post-processing {} failed on '{}': {}",
                    step.transform.name(),
                    step.field,
                    reason
                );
                failures.push(StepFailure::new(&step.field, step.transform.name(), reason));
            }
        }
    }

    failures
}

/// A transformed value and the reasons for any list items it had to drop
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub value: FieldValue,
    pub dropped: Vec<String>,
}

/// Apply one transform to one value. Fails only when nothing of the value
/// survives; partially failed lists come back with their dropped items listed.
pub fn apply_transform(
    value: FieldValue,
    transform: &Transform,
    ctx: &ParseContext,
) -> Result<Transformed, String> {
    let mut dropped = Vec::new();
    let value = match transform {
        Transform::Strip => map_text(value, |text| text.trim().to_string()),
        Transform::Trim => map_text(value, |text| collapse_whitespace(&text)),
        Transform::Lowercase => map_text(value, |text| text.to_lowercase()),
        Transform::ExtractPrice => map_scalars(value, &mut dropped, &|item| match item {
            FieldValue::Text(text) => extract_price(&text)
                .map(FieldValue::Number)
                .ok_or_else(|| format!("no price in '{text}'")),
            numeric => Ok(numeric),
        })?,
        Transform::ExtractNumber => map_scalars(value, &mut dropped, &|item| match item {
            FieldValue::Text(text) => extract_number(&text)
                .map(FieldValue::Integer)
                .ok_or_else(|| format!("no number in '{text}'")),
            numeric => Ok(numeric),
        })?,
        Transform::NormalizeUrls => map_scalars(value, &mut dropped, &|item| match item {
            FieldValue::Text(text) => ctx
                .resolve(&text)
                .map(FieldValue::Text)
                .map_err(|e| e.to_string()),
            other => Err(format!("'{other}' is not a URL")),
        })?,
        Transform::NormalizeAvailability => map_scalars(value, &mut dropped, &|item| {
            Ok(FieldValue::text(normalize_availability(&item.to_string())))
        })?,
        Transform::Unique => match value {
            FieldValue::List(items) => FieldValue::List(dedupe(items)),
            scalar => scalar,
        },
        Transform::Limit { max_items } => match value {
            FieldValue::List(mut items) => {
                items.truncate(*max_items);
                FieldValue::List(items)
            }
            scalar => scalar,
        },
    };
    Ok(Transformed { value, dropped })
}

/// Parse the first numeric token as a price.
///
/// With both `,` and `.` present the rightmost one is the decimal separator.
/// A lone `,` is decimal only when at most two digits follow it.
pub fn extract_price(text: &str) -> Option<f64> {
    let token = first_numeric_token(text)?;
    normalize_separators(token).parse::<f64>().ok()
}

/// First run of ASCII digits as an integer
pub fn extract_number(text: &str) -> Option<i64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Map free text to `in_stock`, `out_of_stock` or `unknown`
pub fn normalize_availability(text: &str) -> &'static str {
    let lowered = text.to_lowercase();
    if availability::OUT_OF_STOCK_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
    {
        availability::OUT_OF_STOCK
    } else if availability::IN_STOCK_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
    {
        availability::IN_STOCK
    } else {
        availability::UNKNOWN
    }
}

fn first_numeric_token(text: &str) -> Option<&str> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let rest = text[start..].as_bytes();

    let mut end = 0;
    let mut i = 0;
    while i < rest.len() {
        let byte = rest[i];
        if byte.is_ascii_digit() {
            i += 1;
            end = i;
        } else if (byte == b'.' || byte == b',')
            && rest.get(i + 1).is_some_and(u8::is_ascii_digit)
        {
            i += 1;
        } else {
            break;
        }
    }

    Some(&text[start..start + end])
}

fn normalize_separators(token: &str) -> String {
    match (token.rfind(','), token.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => token.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => token.replace(',', ""),
        (Some(comma), None) => {
            let decimals = &token[comma + 1..];
            if decimals.len() <= 2 {
                format!("{}.{}", token[..comma].replace(',', ""), decimals)
            } else {
                token.replace(',', "")
            }
        }
        (None, Some(_)) if token.matches('.').count() > 1 => token.replace('.', ""),
        _ => token.to_string(),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn map_text(value: FieldValue, f: impl Fn(String) -> String + Copy) -> FieldValue {
    match value {
        FieldValue::Text(text) => FieldValue::Text(f(text)),
        FieldValue::List(items) => {
            FieldValue::List(items.into_iter().map(|item| map_text(item, f)).collect())
        }
        numeric => numeric,
    }
}

/// Apply `f` to a scalar, or to every list item. Failed items are dropped
/// and their reasons pushed to `dropped`; the list fails only when every
/// item failed.
fn map_scalars(
    value: FieldValue,
    dropped: &mut Vec<String>,
    f: &dyn Fn(FieldValue) -> Result<FieldValue, String>,
) -> Result<FieldValue, String> {
    match value {
        FieldValue::List(items) => {
            if items.is_empty() {
                return Ok(FieldValue::List(items));
            }
            let mut mapped = Vec::with_capacity(items.len());
            let mut reasons = Vec::new();
            for item in items {
                match map_scalars(item, dropped, f) {
                    Ok(value) => mapped.push(value),
                    Err(reason) => reasons.push(reason),
                }
            }
            if mapped.is_empty() {
                return Err(reasons.into_iter().next().unwrap_or_default());
            }
            dropped.extend(reasons);
            Ok(FieldValue::List(mapped))
        }
        scalar => f(scalar),
    }
}

fn dedupe(items: Vec<FieldValue>) -> Vec<FieldValue> {
    let mut unique: Vec<FieldValue> = Vec::with_capacity(items.len());
    for item in items {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::extraction::Provenance;
    use rstest::rstest;

    fn ctx() -> ParseContext {
        ParseContext::new("https://shop.test/catalog/item")
    }

    #[rstest]
    #[case("$1,234.56", Some(1234.56))]
    #[case("1.234,56", Some(1234.56))]
    #[case("€ 12,50", Some(12.5))]
    #[case("1,234", Some(1234.0))]
    #[case("Price: 1,234,567 KRW", Some(1_234_567.0))]
    #[case("1.234.567", Some(1_234_567.0))]
    #[case("$12.00", Some(12.0))]
    #[case("now 19.99.", Some(19.99))]
    #[case("abc", None)]
    #[case("", None)]
    fn extract_price_cases(#[case] input: &str, #[case] expected: Option<f64>) {
        assert_eq!(extract_price(input), expected);
    }

    #[rstest]
    #[case("Currently In Stock", "in_stock")]
    #[case("Available now", "in_stock")]
    #[case("Ready to ship", "in_stock")]
    #[case("Sold Out", "out_of_stock")]
    #[case("Temporarily unavailable", "out_of_stock")]
    #[case("OUT OF STOCK", "out_of_stock")]
    #[case("", "unknown")]
    #[case("Call us", "unknown")]
    fn availability_cases(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_availability(input), expected);
    }

    #[test]
    fn extract_number_takes_first_digit_run() {
        assert_eq!(extract_number("1,234 reviews"), Some(1));
        assert_eq!(extract_number("Reviews (42)"), Some(42));
        assert_eq!(extract_number("none"), None);
    }

    #[test]
    fn steps_run_in_declared_order() {
        let mut record = ExtractionRecord::new("https://shop.test/catalog/item");
        record.insert("name", FieldValue::text("  WIDGET   Pro "), Provenance::Primary);

        let steps = vec![
            PostProcessStep::new("name", Transform::Trim),
            PostProcessStep::new("name", Transform::Lowercase),
        ];
        assert!(apply(&mut record, &steps, &ctx()).is_empty());
        assert_eq!(record.get("name"), Some(&FieldValue::text("widget pro")));
    }

    #[test]
    fn absent_field_is_a_noop() {
        let mut record = ExtractionRecord::new("u");
        let steps = vec![PostProcessStep::new("missing", Transform::ExtractPrice)];
        assert!(apply(&mut record, &steps, &ctx()).is_empty());
        assert!(record.values.is_empty());
    }

    #[test]
    fn failed_step_turns_field_into_miss_without_aborting() {
        let mut record = ExtractionRecord::new("u");
        record.insert("price", FieldValue::text("call for price"), Provenance::Primary);
        record.insert("stock", FieldValue::text("Sold out"), Provenance::Primary);

        let steps = vec![
            PostProcessStep::new("price", Transform::ExtractPrice),
            PostProcessStep::new("stock", Transform::NormalizeAvailability),
        ];
        let failures = apply(&mut record, &steps, &ctx());

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].field, "price");
        assert_eq!(failures[0].step, "extract_price");
        assert!(record.get("price").is_none());
        assert_eq!(record.get("stock"), Some(&FieldValue::text("out_of_stock")));
    }

    #[test]
    fn list_transforms() {
        let mut record = ExtractionRecord::new("u");
        record.insert(
            "links",
            FieldValue::texts(["/a", "https://cdn.test/b", "/a", "/c"]),
            Provenance::Primary,
        );
        let steps = vec![
            PostProcessStep::new("links", Transform::Unique),
            PostProcessStep::new("links", Transform::NormalizeUrls),
            PostProcessStep::new("links", Transform::Limit { max_items: 2 }),
        ];
        assert!(apply(&mut record, &steps, &ctx()).is_empty());
        assert_eq!(
            record.get("links"),
            Some(&FieldValue::texts(["https://shop.test/a", "https://cdn.test/b"]))
        );
    }

    #[test]
    fn price_list_drops_unparseable_items() {
        let value = FieldValue::texts(["$5", "free", "$7.50"]);
        let processed = apply_transform(value, &Transform::ExtractPrice, &ctx()).unwrap();
        assert_eq!(
            processed.value,
            FieldValue::List(vec![FieldValue::Number(5.0), FieldValue::Number(7.5)])
        );
        assert_eq!(processed.dropped, vec!["no price in 'free'".to_string()]);
    }

    #[test]
    fn dropped_list_items_are_reported_as_step_failures() {
        let mut record = ExtractionRecord::new("u");
        record.insert(
            "prices",
            FieldValue::texts(["$5", "call us", "$7", "ask"]),
            Provenance::Primary,
        );
        let steps = vec![PostProcessStep::new("prices", Transform::ExtractPrice)];
        let failures = apply(&mut record, &steps, &ctx());

        assert_eq!(
            record.get("prices"),
            Some(&FieldValue::List(vec![FieldValue::Number(5.0), FieldValue::Number(7.0)]))
        );
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|f| f.field == "prices" && f.step == "extract_price"));
        assert!(failures[0].reason.contains("call us"));
        assert!(failures[1].reason.contains("ask"));
    }

    #[test]
    fn list_with_no_surviving_items_becomes_a_miss() {
        let mut record = ExtractionRecord::new("u");
        record.insert("prices", FieldValue::texts(["free", "n/a"]), Provenance::Primary);
        let steps = vec![PostProcessStep::new("prices", Transform::ExtractPrice)];
        let failures = apply(&mut record, &steps, &ctx());

        assert_eq!(failures.len(), 1);
        assert!(record.get("prices").is_none());
    }
}
