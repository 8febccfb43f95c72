//! Selector resolution with ordered fallbacks
//!
//! The primary selector is tried first; fallbacks follow in declared order
//! and the first usable match wins. Exhausting every candidate is a miss,
//! which is a valid per-field outcome rather than an error.

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::{ParsingError, ParsingResult};
use crate::domain::extraction::{FieldValue, Provenance, Resolution};
use crate::domain::template::{ExtractionMode, FieldSpec};

/// A selector string together with its compiled form
#[derive(Debug, Clone)]
pub struct CompiledSelector {
    pub source: String,
    selector: Selector,
}

impl CompiledSelector {
    pub fn parse(field: &str, source: &str) -> ParsingResult<Self> {
        let selector = Selector::parse(source)
            .map_err(|e| ParsingError::invalid_selector(field, source, e))?;
        Ok(Self {
            source: source.to_string(),
            selector,
        })
    }

    pub const fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn select<'a>(&'a self, html: &'a Html) -> impl Iterator<Item = ElementRef<'a>> + 'a {
        html.select(&self.selector)
    }
}

/// Field spec with every candidate selector compiled
#[derive(Debug, Clone)]
pub struct CompiledField {
    pub spec: FieldSpec,
    primary: CompiledSelector,
    fallbacks: Vec<CompiledSelector>,
}

impl CompiledField {
    /// Compile primary and fallback selectors; any malformed one fails the field
    pub fn compile(spec: &FieldSpec) -> ParsingResult<Self> {
        if spec.mode == ExtractionMode::Attribute
            && spec.attribute.as_deref().is_none_or(str::is_empty)
        {
            return Err(ParsingError::MissingAttribute {
                field: spec.name.clone(),
            });
        }

        let primary = CompiledSelector::parse(&spec.name, &spec.selector)?;
        let fallbacks = spec
            .fallback_selectors
            .iter()
            .map(|source| CompiledSelector::parse(&spec.name, source))
            .collect::<ParsingResult<Vec<_>>>()?;

        Ok(Self {
            spec: spec.clone(),
            primary,
            fallbacks,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Candidates in resolution order
    pub fn candidates(&self) -> impl Iterator<Item = (Provenance, &CompiledSelector)> {
        std::iter::once((Provenance::Primary, &self.primary)).chain(
            self.fallbacks
                .iter()
                .enumerate()
                .map(|(index, selector)| (Provenance::Fallback(index), selector)),
        )
    }
}

/// Resolves compiled fields against a parsed document
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectorResolver;

impl SelectorResolver {
    pub fn resolve(html: &Html, field: &CompiledField) -> Resolution {
        Self::resolve_counting(html, field).0
    }

    /// Resolve and report how many candidates were tried
    pub fn resolve_counting(html: &Html, field: &CompiledField) -> (Resolution, usize) {
        let mut attempts = 0;
        for (provenance, candidate) in field.candidates() {
            attempts += 1;
            if let Some(value) = Self::try_candidate(html, candidate, &field.spec) {
                debug!(
                    "Resolved '{}' using {:?} selector '{}'",
                    field.name(),
                    provenance,
                    candidate.source
                );
                return (
                    Resolution::Found {
                        value,
                        provenance,
                        selector: candidate.source.clone(),
                    },
                    attempts,
                );
            }
        }

        debug!("Field '{}' missed after {} selectors", field.name(), attempts);
        (Resolution::Miss, attempts)
    }

    fn try_candidate(
        html: &Html,
        candidate: &CompiledSelector,
        spec: &FieldSpec,
    ) -> Option<FieldValue> {
        let attribute = spec.attribute.as_deref().filter(|a| !a.is_empty());
        match spec.mode {
            ExtractionMode::Text => candidate
                .select(html)
                .find_map(|element| non_empty(element_text(&element)))
                .map(FieldValue::Text),
            ExtractionMode::Attribute => {
                let attribute = attribute?;
                candidate
                    .select(html)
                    .find_map(|element| non_empty(element.value().attr(attribute)?.trim().to_string()))
                    .map(FieldValue::Text)
            }
            ExtractionMode::All => {
                let values: Vec<FieldValue> = candidate
                    .select(html)
                    .filter_map(|element| match attribute {
                        Some(name) => non_empty(element.value().attr(name)?.trim().to_string()),
                        None => non_empty(element_text(&element)),
                    })
                    .map(FieldValue::Text)
                    .collect();
                (!values.is_empty()).then_some(FieldValue::List(values))
            }
        }
    }
}

/// Concatenated, trimmed text content of an element
pub fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}
