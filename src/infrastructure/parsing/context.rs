//! Context carried through extraction of a single page

use url::Url;

use super::error::{ParsingError, ParsingResult};

/// Context information for parsing operations
#[derive(Debug, Clone)]
pub struct ParseContext {
    /// Page being parsed; relative links resolve against it
    pub page_url: String,

    /// Parsed form of `page_url`, absent when the URL is not absolute
    pub base_url: Option<Url>,

    /// Zero-based page number within the current target's pagination
    pub page_index: u32,
}

impl ParseContext {
    pub fn new(page_url: impl Into<String>) -> Self {
        let page_url = page_url.into();
        let base_url = Url::parse(&page_url).ok();
        Self {
            page_url,
            base_url,
            page_index: 0,
        }
    }

    pub const fn with_page_index(mut self, page_index: u32) -> Self {
        self.page_index = page_index;
        self
    }

    /// Resolve `href` against the page URL; absolute URLs pass through
    pub fn resolve(&self, href: &str) -> ParsingResult<String> {
        let href = href.trim();
        if href.is_empty() {
            return Err(ParsingError::unresolvable_url(href, "empty link"));
        }
        if Url::parse(href).is_ok() {
            return Ok(href.to_string());
        }
        let base = self.base_url.as_ref().ok_or_else(|| {
            ParsingError::unresolvable_url(href, format!("no absolute base in '{}'", self.page_url))
        })?;
        base.join(href)
            .map(|joined| joined.to_string())
            .map_err(|e| ParsingError::unresolvable_url(href, e))
    }
}
