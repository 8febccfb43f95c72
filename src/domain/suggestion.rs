//! Auto-detected field suggestions used while authoring templates

use serde::{Deserialize, Serialize};

/// Which detection pass produced a suggestion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    Pattern,
    Heuristic,
}

/// Estimated placement of an element on the rendered page
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ElementPosition {
    /// Ordinal of the element in document order
    pub index: usize,
    /// Estimated distance from the top of the page in pixels
    pub top: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementMetadata {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub visible: bool,
    pub position: ElementPosition,
}

/// A confidence-scored candidate selector for a field type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    pub field_type: String,
    pub selector: String,
    /// In `[0, 1]`, two decimals
    pub confidence: f64,
    pub sample_text: String,
    pub element: ElementMetadata,
    pub source: DetectionSource,
}

/// Summary of the analysed page
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageInfo {
    pub url: String,
    pub title: Option<String>,
    pub total_elements: usize,
    pub link_count: usize,
    pub image_count: usize,
    pub form_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisReport {
    /// Sorted by confidence, highest first
    pub suggestions: Vec<Suggestion>,
    pub page_info: PageInfo,
}
