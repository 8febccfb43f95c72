//! Heuristic field auto-detection
//!
//! Used while authoring templates. A pattern pass runs the static
//! [`patterns::DEFAULT_PATTERNS`] table against the document, a heuristic
//! pass sniffs generic text elements, and the merged suggestions are ranked
//! by confidence. The core only sees markup, so visibility comes from
//! attributes and inline styles and vertical position is estimated from
//! document order.

pub mod patterns;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::parsing::{ParsingError, ParsingResult, element_text};
use crate::domain::suggestion::{
    AnalysisReport, DetectionSource, ElementMetadata, ElementPosition, PageInfo, Suggestion,
};
pub use patterns::{DEFAULT_PATTERNS, FieldPattern, LengthBonus};

pub const MAX_SUGGESTIONS: usize = 20;
pub const MATCHES_PER_SELECTOR: usize = 3;
pub const HEURISTIC_CONFIDENCE: f64 = 0.6;
pub const NAME_MATCH_BONUS: f64 = 0.10;
pub const ABOVE_FOLD_BONUS: f64 = 0.05;
pub const ABOVE_FOLD_PX: f64 = 800.0;
/// Estimated rendered height of one element in document order
pub const ROW_HEIGHT_PX: f64 = 20.0;
pub const SAMPLE_TEXT_CHARS: usize = 100;

const HEURISTIC_SELECTOR: &str = "p, span, li, td";
const HEURISTIC_TEXT_CHARS: std::ops::RangeInclusive<usize> = 10..=200;
const NON_RENDERED_TAGS: &[&str] = &["script", "style", "template", "noscript", "head", "meta"];
const GENERIC_CLASSES: &[&str] = &[
    "active", "selected", "hidden", "visible", "clearfix", "container", "wrapper", "content",
    "inner", "outer", "left", "right", "first", "last", "item", "text", "block",
];

/// Ordinal of an element in document order
type OrdinalFn<'a> = dyn Fn(&ElementRef<'_>) -> usize + 'a;

pub struct AutoDetector {
    patterns: Vec<FieldPattern>,
    sniffers: ContentSniffers,
    page_selectors: PageSelectors,
}

struct ContentSniffers {
    currency: Regex,
    date: Regex,
    digits: Regex,
    rating: Regex,
}

struct PageSelectors {
    heuristic: Selector,
    title: Selector,
    links: Selector,
    images: Selector,
    forms: Selector,
}

impl AutoDetector {
    pub fn new() -> ParsingResult<Self> {
        Self::with_patterns(DEFAULT_PATTERNS.to_vec())
    }

    pub fn with_patterns(patterns: Vec<FieldPattern>) -> ParsingResult<Self> {
        Ok(Self {
            patterns,
            sniffers: ContentSniffers::compile()?,
            page_selectors: PageSelectors::compile()?,
        })
    }

    /// Analyse a document and return ranked suggestions plus page info
    pub fn analyze(&self, html: &str, url: &str) -> AnalysisReport {
        let document = Html::parse_document(html);

        let ordinals: HashMap<_, usize> = document
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .enumerate()
            .map(|(index, element)| (element.id(), index))
            .collect();
        let ordinal_of: &OrdinalFn<'_> =
            &|element| ordinals.get(&element.id()).copied().unwrap_or(0);

        let mut suggestions = self.pattern_pass(&document, ordinal_of);
        suggestions.extend(self.heuristic_pass(&document, ordinal_of));
        let suggestions = rank(suggestions);

        debug!("Auto-detected {} suggestions for {}", suggestions.len(), url);

        AnalysisReport {
            suggestions,
            page_info: self.page_info(&document, url, ordinals.len()),
        }
    }

    fn pattern_pass(&self, document: &Html, ordinal_of: &OrdinalFn<'_>) -> Vec<Suggestion> {
        let mut suggestions = Vec::new();

        for pattern in &self.patterns {
            for source in pattern.selectors {
                let selector = match Selector::parse(source) {
                    Ok(selector) => selector,
                    Err(e) => {
                        warn!(
                            "Skipping {} pattern selector '{}': {}",
                            pattern.field_type, source, e
                        );
                        continue;
                    }
                };

                for element in document.select(&selector).take(MATCHES_PER_SELECTOR) {
                    let text = match pattern.attribute {
                        Some(attribute) => element
                            .value()
                            .attr(attribute)
                            .map(|value| value.trim().to_string())
                            .unwrap_or_default(),
                        None => element_text(&element),
                    };
                    if text.is_empty() {
                        continue;
                    }

                    let metadata = element_metadata(&element, ordinal_of(&element));
                    let confidence = score(pattern, source, &metadata, &text);
                    suggestions.push(Suggestion {
                        field_type: pattern.field_type.to_string(),
                        selector: optimize_selector(document, &element, source),
                        confidence,
                        sample_text: sample(&text),
                        element: metadata,
                        source: DetectionSource::Pattern,
                    });
                }
            }
        }

        suggestions
    }

    fn heuristic_pass(&self, document: &Html, ordinal_of: &OrdinalFn<'_>) -> Vec<Suggestion> {
        document
            .select(&self.page_selectors.heuristic)
            .filter_map(|element| {
                let text = element_text(&element);
                if !HEURISTIC_TEXT_CHARS.contains(&text.chars().count()) {
                    return None;
                }
                let metadata = element_metadata(&element, ordinal_of(&element));
                if !metadata.visible {
                    return None;
                }
                let tag = element.value().name();
                Some(Suggestion {
                    field_type: self.sniffers.classify(&text).to_string(),
                    selector: optimize_selector(document, &element, tag),
                    confidence: HEURISTIC_CONFIDENCE,
                    sample_text: sample(&text),
                    element: metadata,
                    source: DetectionSource::Heuristic,
                })
            })
            .collect()
    }

    fn page_info(&self, document: &Html, url: &str, total_elements: usize) -> PageInfo {
        let selectors = &self.page_selectors;
        PageInfo {
            url: url.to_string(),
            title: document
                .select(&selectors.title)
                .map(|element| element_text(&element))
                .find(|title| !title.is_empty()),
            total_elements,
            link_count: document.select(&selectors.links).count(),
            image_count: document.select(&selectors.images).count(),
            form_count: document.select(&selectors.forms).count(),
        }
    }
}

impl ContentSniffers {
    fn compile() -> ParsingResult<Self> {
        let compile = |name: &str, pattern: &str| {
            Regex::new(pattern).map_err(|e| ParsingError::invalid_pattern(name, pattern, e))
        };
        Ok(Self {
            currency: compile("currency", r"[$€£¥₩]|\b(?:USD|EUR|GBP|JPY|KRW)\b")?,
            date: compile(
                "date",
                r"(?i)\b(?:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:tember)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\b|\b(?:1[89]|20)\d{2}\b",
            )?,
            digits: compile("number", r"^[\d\s.,]+$")?,
            rating: compile("rating", r"(?i)\b(?:rating|rated|score|stars?|reviews?)\b")?,
        })
    }

    /// Lightweight content classification, first match wins
    fn classify(&self, text: &str) -> &'static str {
        if self.currency.is_match(text) {
            "price"
        } else if self.date.is_match(text) {
            "date"
        } else if self.digits.is_match(text) {
            "number"
        } else if self.rating.is_match(text) {
            "rating"
        } else {
            "text"
        }
    }
}

impl PageSelectors {
    fn compile() -> ParsingResult<Self> {
        let compile = |name: &str, source: &str| {
            Selector::parse(source).map_err(|e| ParsingError::invalid_selector(name, source, e))
        };
        Ok(Self {
            heuristic: compile("heuristic", HEURISTIC_SELECTOR)?,
            title: compile("page_title", "title")?,
            links: compile("links", "a[href]")?,
            images: compile("images", "img")?,
            forms: compile("forms", "form")?,
        })
    }
}

/// Pattern-pass confidence. Bonuses are added, the sum is clamped and
/// rounded; an invisible element then gets at most half of that score.
fn score(pattern: &FieldPattern, selector: &str, element: &ElementMetadata, text: &str) -> f64 {
    let mut score = pattern.base_confidence;

    let names_field = pattern.mentions_field(selector)
        || element.id.as_deref().is_some_and(|id| pattern.mentions_field(id))
        || element.classes.iter().any(|class| pattern.mentions_field(class));
    if names_field {
        score += NAME_MATCH_BONUS;
    }
    if element.position.top < ABOVE_FOLD_PX {
        score += ABOVE_FOLD_BONUS;
    }
    if let Some(bonus) = pattern.length_bonus {
        if bonus.applies(text.chars().count()) {
            score += bonus.bonus;
        }
    }

    let visible_score = round2(score.clamp(0.0, 1.0));
    if element.visible {
        visible_score
    } else {
        (visible_score * 0.5 * 100.0).floor() / 100.0
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Keep the best score per (field type, selector), then sort and cut
fn rank(suggestions: Vec<Suggestion>) -> Vec<Suggestion> {
    let mut best: Vec<Suggestion> = Vec::with_capacity(suggestions.len());
    let mut seen: HashMap<(String, String), usize> = HashMap::new();

    for suggestion in suggestions {
        let key = (suggestion.field_type.clone(), suggestion.selector.clone());
        match seen.get(&key) {
            Some(&slot) if best[slot].confidence >= suggestion.confidence => {}
            Some(&slot) => best[slot] = suggestion,
            None => {
                seen.insert(key, best.len());
                best.push(suggestion);
            }
        }
    }

    best.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    best.truncate(MAX_SUGGESTIONS);
    best
}

fn element_metadata(element: &ElementRef<'_>, ordinal: usize) -> ElementMetadata {
    let value = element.value();
    ElementMetadata {
        tag: value.name().to_string(),
        id: value.id().map(str::to_string),
        classes: value.classes().map(str::to_string).collect(),
        visible: is_visible(element),
        position: ElementPosition {
            index: ordinal,
            top: ordinal as f64 * ROW_HEIGHT_PX,
        },
    }
}

fn is_visible(element: &ElementRef<'_>) -> bool {
    let value = element.value();
    if value.name() == "input" && value.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("hidden")) {
        return false;
    }
    std::iter::once(*element)
        .chain(element.ancestors().filter_map(ElementRef::wrap))
        .all(|node| !hides(&node))
}

fn hides(element: &ElementRef<'_>) -> bool {
    let value = element.value();
    NON_RENDERED_TAGS.contains(&value.name())
        || value.attr("hidden").is_some()
        || value
            .attr("aria-hidden")
            .is_some_and(|a| a.eq_ignore_ascii_case("true"))
        || value.attr("style").is_some_and(style_hides)
}

fn style_hides(style: &str) -> bool {
    let compact: String = style
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    compact.contains("display:none") || compact.contains("visibility:hidden")
}

/// Prefer a unique `#id`, then the first specific class, then `fallback`
fn optimize_selector(document: &Html, element: &ElementRef<'_>, fallback: &str) -> String {
    let value = element.value();

    if let Some(id) = value.id().filter(|id| !id.is_empty()) {
        let candidate = format!("#{id}");
        if Selector::parse(&candidate).is_ok_and(|s| document.select(&s).take(2).count() == 1) {
            return candidate;
        }
    }

    value
        .classes()
        .filter(|class| is_specific_class(class))
        .map(|class| format!(".{class}"))
        .find(|candidate| Selector::parse(candidate).is_ok())
        .unwrap_or_else(|| fallback.to_string())
}

fn is_specific_class(class: &str) -> bool {
    class.len() >= 4
        && !class.chars().all(|c| c.is_ascii_digit())
        && !GENERIC_CLASSES.contains(&class.to_ascii_lowercase().as_str())
}

fn sample(text: &str) -> String {
    text.chars().take(SAMPLE_TEXT_CHARS).collect()
}
