//! Extraction results and their provenance

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An extracted value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Number(f64),
    Text(String),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn texts<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(values.into_iter().map(|v| Self::Text(v.into())).collect())
    }

    /// Empty text (after trimming) and empty lists count as empty
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Integer(_) | Self::Number(_) => false,
        }
    }

    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Number(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Numeric view; text is parsed leniently after trimming
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Number(value) => Some(*value),
            Self::Text(text) => text.trim().parse().ok(),
            Self::List(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(text) => write!(f, "{text}"),
            Self::List(items) => {
                let joined: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", joined.join(", "))
            }
        }
    }
}

/// Which selector produced a value
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "source", content = "index")]
pub enum Provenance {
    Primary,
    /// Position in the fallback list
    Fallback(usize),
}

impl Provenance {
    /// `-1` for the primary selector, otherwise the fallback position
    pub fn index(self) -> isize {
        match self {
            Self::Primary => -1,
            Self::Fallback(index) => index as isize,
        }
    }

    pub const fn is_fallback(self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

/// Outcome of resolving a single field against a document
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found {
        value: FieldValue,
        provenance: Provenance,
        selector: String,
    },
    Miss,
}

impl Resolution {
    pub const fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }

    pub const fn provenance(&self) -> Option<Provenance> {
        match self {
            Self::Found { provenance, .. } => Some(*provenance),
            Self::Miss => None,
        }
    }

    pub const fn value(&self) -> Option<&FieldValue> {
        match self {
            Self::Found { value, .. } => Some(value),
            Self::Miss => None,
        }
    }
}

/// One extracted record: field name → value, with provenance per field
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractionRecord {
    /// Page the record was extracted from
    pub url: String,

    /// Present fields only; a missing key is a miss
    pub values: BTreeMap<String, FieldValue>,

    pub provenance: BTreeMap<String, Provenance>,
}

impl ExtractionRecord {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue, provenance: Provenance) {
        let field = field.into();
        self.provenance.insert(field.clone(), provenance);
        self.values.insert(field, value);
    }

    /// Turn a field into a miss, keeping its provenance for diagnostics
    pub fn clear(&mut self, field: &str) -> Option<FieldValue> {
        self.values.remove(field)
    }

    pub fn is_present(&self, field: &str) -> bool {
        self.values.get(field).is_some_and(|value| !value.is_empty())
    }

    /// Plain field → JSON value mapping for export surfaces
    pub fn to_json_map(&self) -> serde_json::Map<String, serde_json::Value> {
        self.values
            .iter()
            .filter_map(|(field, value)| {
                serde_json::to_value(value)
                    .ok()
                    .map(|json| (field.clone(), json))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provenance_index_marks_primary_as_minus_one() {
        assert_eq!(Provenance::Primary.index(), -1);
        assert_eq!(Provenance::Fallback(0).index(), 0);
        assert_eq!(Provenance::Fallback(3).index(), 3);
    }

    #[test]
    fn whitespace_text_is_empty() {
        assert!(FieldValue::text("  \n ").is_empty());
        assert!(FieldValue::List(vec![]).is_empty());
        assert!(!FieldValue::Integer(0).is_empty());
    }

    #[test]
    fn record_serializes_as_plain_mapping() {
        let mut record = ExtractionRecord::new("https://shop.test/p/1");
        record.insert("price", FieldValue::Number(12.5), Provenance::Fallback(0));
        record.insert("tags", FieldValue::texts(["a", "b"]), Provenance::Primary);

        let map = record.to_json_map();
        assert_eq!(map["price"], serde_json::json!(12.5));
        assert_eq!(map["tags"], serde_json::json!(["a", "b"]));

        record.clear("price");
        assert!(!record.is_present("price"));
        assert_eq!(record.provenance["price"], Provenance::Fallback(0));
    }
}
