//! Infrastructure layer: HTML parsing, extraction pipeline, fetching,
//! configuration and logging

pub mod auto_detector;
pub mod config;
pub mod fetcher;
pub mod logging;
pub mod parsing;
pub mod parsing_error;
pub mod post_processing;
pub mod retry_manager;
pub mod validation;

pub use auto_detector::AutoDetector;
pub use config::{AppConfig, ConfigError, ConfigManager, HttpClientConfig, JobDefaults};
pub use fetcher::{Document, FetchConfig, FetchError, Fetcher, HttpFetcher};
pub use logging::init_logging_with_config;
pub use parsing::{CompiledField, ParseContext, ParsingError, ParsingResult, SelectorResolver};
pub use retry_manager::{RetryError, RetryPolicy, retry_with_backoff};
pub use validation::ValidationEngine;
