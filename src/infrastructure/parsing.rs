//! HTML parsing infrastructure
//!
//! Selector compilation and fallback resolution over `scraper` documents.

pub mod context;
pub mod error;
pub mod selector_resolver;

pub use context::ParseContext;
pub use error::{ParsingError, ParsingResult};
pub use selector_resolver::{CompiledField, CompiledSelector, SelectorResolver, element_text};
