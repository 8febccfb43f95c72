//! Declarative extraction templates
//!
//! A template describes how to pull one record out of a page: a set of
//! field specs (primary selector + ordered fallbacks), an ordered
//! post-processing pipeline and a validation rule set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a selector match is turned into a value
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Text of the first matched node with non-empty trimmed text
    #[default]
    Text,
    /// Ordered list of values from every matched node
    All,
    /// Named attribute of the first matched node carrying it
    Attribute,
}

/// Declarative description of how to extract one named field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldSpec {
    /// Field name; filled from the template map key when omitted
    #[serde(default)]
    pub name: String,

    /// Primary CSS selector
    pub selector: String,

    #[serde(default)]
    pub mode: ExtractionMode,

    /// Attribute read in `attribute` mode (and optionally in `all` mode)
    #[serde(default)]
    pub attribute: Option<String>,

    /// Tried in declared order when the primary selector misses
    #[serde(default)]
    pub fallback_selectors: Vec<String>,

    /// Whether the field participates in adaptive learning
    #[serde(default)]
    pub auto_save: bool,

    /// Transforms applied to this field before the template pipeline
    #[serde(default)]
    pub post_process: Vec<Transform>,
}

impl FieldSpec {
    /// Text-mode field with no fallbacks
    pub fn text(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: selector.into(),
            mode: ExtractionMode::Text,
            attribute: None,
            fallback_selectors: Vec::new(),
            auto_save: false,
            post_process: Vec::new(),
        }
    }

    /// List-mode field collecting every match
    pub fn all(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            mode: ExtractionMode::All,
            ..Self::text(name, selector)
        }
    }

    /// Attribute-mode field
    pub fn attribute(
        name: impl Into<String>,
        selector: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            mode: ExtractionMode::Attribute,
            attribute: Some(attribute.into()),
            ..Self::text(name, selector)
        }
    }

    pub fn with_fallbacks<I, S>(mut self, fallbacks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_selectors = fallbacks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_transforms(mut self, transforms: Vec<Transform>) -> Self {
        self.post_process = transforms;
        self
    }
}

/// A single named transform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transform {
    Strip,
    ExtractPrice,
    ExtractNumber,
    NormalizeUrls,
    NormalizeAvailability,
    Lowercase,
    /// Trim and collapse inner whitespace runs to one space
    Trim,
    Unique,
    Limit { max_items: usize },
}

impl Transform {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Strip => "strip",
            Self::ExtractPrice => "extract_price",
            Self::ExtractNumber => "extract_number",
            Self::NormalizeUrls => "normalize_urls",
            Self::NormalizeAvailability => "normalize_availability",
            Self::Lowercase => "lowercase",
            Self::Trim => "trim",
            Self::Unique => "unique",
            Self::Limit { .. } => "limit",
        }
    }
}

/// One pipeline step: `{type, field, ...params}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostProcessStep {
    pub field: String,
    #[serde(flatten)]
    pub transform: Transform,
}

impl PostProcessStep {
    pub fn new(field: impl Into<String>, transform: Transform) -> Self {
        Self {
            field: field.into(),
            transform,
        }
    }
}

/// Expected value shape for a field
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    List,
}

/// Inclusive numeric range; either bound may be open
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct NumericRange {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl NumericRange {
    pub const fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

/// Validation rule set applied to every processed record
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationRules {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub types: BTreeMap<String, FieldType>,
    #[serde(default)]
    pub patterns: BTreeMap<String, String>,
    #[serde(default)]
    pub ranges: BTreeMap<String, NumericRange>,
}

impl ValidationRules {
    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
            && self.types.is_empty()
            && self.patterns.is_empty()
            && self.ranges.is_empty()
    }
}

/// Pagination settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaginationConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Selector of the anchor pointing at the next page
    #[serde(default)]
    pub next_selector: Option<String>,

    /// Upper bound on pages visited per target, the first page included
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

const fn default_max_pages() -> u32 {
    crate::infrastructure::config::defaults::MAX_PAGES
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            next_selector: None,
            max_pages: default_max_pages(),
        }
    }
}

/// Browser automation profile requested from the fetcher
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AutomationMode {
    #[default]
    Standard,
    Stealth,
}

/// Fetcher configuration carried by a template; opaque beyond its type tag
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FetcherSettings {
    #[serde(default, rename = "type")]
    pub mode: AutomationMode,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default, flatten)]
    pub options: BTreeMap<String, serde_json::Value>,
}

/// Extraction template
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Template {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub fetcher: FetcherSettings,

    pub fields: BTreeMap<String, FieldSpec>,

    #[serde(default)]
    pub post_processing: Vec<PostProcessStep>,

    #[serde(default)]
    pub validation: ValidationRules,

    #[serde(default)]
    pub pagination: PaginationConfig,

    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_version() -> String {
    "1.0".to_string()
}

const fn default_active() -> bool {
    true
}

impl Template {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: default_version(),
            fetcher: FetcherSettings::default(),
            fields: BTreeMap::new(),
            post_processing: Vec::new(),
            validation: ValidationRules::default(),
            pagination: PaginationConfig::default(),
            is_active: true,
        }
    }

    /// Parse a template from JSON, filling field names from map keys
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let mut template: Self = serde_json::from_str(json)?;
        template.normalize_field_names();
        Ok(template)
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    pub fn with_step(mut self, step: PostProcessStep) -> Self {
        self.post_processing.push(step);
        self
    }

    pub fn with_validation(mut self, rules: ValidationRules) -> Self {
        self.validation = rules;
        self
    }

    pub fn with_pagination(mut self, pagination: PaginationConfig) -> Self {
        self.pagination = pagination;
        self
    }

    fn normalize_field_names(&mut self) {
        for (key, spec) in &mut self.fields {
            if spec.name.is_empty() {
                spec.name.clone_from(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_json_fills_names_and_defaults() {
        let json = r#"{
            "name": "products",
            "fields": {
                "price": {
                    "selector": ".price",
                    "fallback_selectors": [".cost"],
                    "post_process": [{"type": "extract_price"}]
                },
                "tags": {"selector": ".tag", "mode": "all"}
            },
            "post_processing": [
                {"type": "limit", "field": "tags", "max_items": 5}
            ],
            "validation": {
                "required": ["price"],
                "ranges": {"price": {"min": 0.0}}
            }
        }"#;

        let template = Template::from_json(json).unwrap();
        assert!(template.is_active);
        assert_eq!(template.version, "1.0");
        assert_eq!(template.fields["price"].name, "price");
        assert_eq!(template.fields["price"].fallback_selectors, vec![".cost"]);
        assert_eq!(template.fields["tags"].mode, ExtractionMode::All);
        assert_eq!(
            template.post_processing[0],
            PostProcessStep::new("tags", Transform::Limit { max_items: 5 })
        );
        assert_eq!(template.validation.ranges["price"].max, None);
        assert!(!template.pagination.enabled);
    }

    #[test]
    fn fetcher_settings_keep_unknown_options() {
        let json = r##"{"type": "stealth", "headers": {"X-Test": "1"}, "wait_for": "#main"}"##;
        let settings: FetcherSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.mode, AutomationMode::Stealth);
        assert_eq!(settings.headers["X-Test"], "1");
        assert_eq!(settings.options["wait_for"], "#main");
    }

    #[test]
    fn numeric_range_is_inclusive() {
        let range = NumericRange::new(Some(1.0), Some(5.0));
        assert!(range.contains(1.0));
        assert!(range.contains(5.0));
        assert!(!range.contains(5.01));
        assert!(NumericRange::default().contains(-1e9));
    }
}
