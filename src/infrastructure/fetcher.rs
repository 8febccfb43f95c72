//! Document fetching capability
//!
//! The core only depends on the [`Fetcher`] trait and the error
//! classification in [`FetchError`]. [`HttpFetcher`] is the reqwest-backed
//! implementation used by the binary; tests substitute scripted fetchers.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, ClientBuilder, redirect};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::config::HttpClientConfig;
use crate::domain::template::{AutomationMode, FetcherSettings};

/// A fetched page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// URL that was requested
    pub url: String,
    /// URL after redirects; relative links resolve against this
    pub final_url: String,
    pub status: u16,
    pub html: String,
}

impl Document {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            final_url: url.clone(),
            url,
            status: 200,
            html: html.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Connection to {url} failed: {reason}")]
    Connection { url: String, reason: String },

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Automation failed for {url}: {reason}")]
    Automation {
        url: String,
        reason: String,
        recoverable: bool,
    },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl FetchError {
    /// Whether the retry policy applies
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connection { .. } => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            Self::Automation { recoverable, .. } => *recoverable,
            Self::InvalidUrl { .. } => false,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Timeout { url, .. }
            | Self::Connection { url, .. }
            | Self::HttpStatus { url, .. }
            | Self::Automation { url, .. }
            | Self::InvalidUrl { url, .. } => url,
        }
    }
}

/// Per-call fetch options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub headers: BTreeMap<String, String>,
    pub mode: AutomationMode,
}

impl FetchConfig {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            headers: BTreeMap::new(),
            mode: AutomationMode::Standard,
        }
    }

    /// Combine a template's fetcher block with the job timeout
    pub fn from_settings(settings: &FetcherSettings, timeout: Duration) -> Self {
        Self {
            timeout,
            headers: settings.headers.clone(),
            mode: settings.mode,
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, config: &FetchConfig) -> Result<Document, FetchError>;
}

/// reqwest-backed fetcher with `standard` and `stealth` header profiles
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: HttpClientConfig,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let client = ClientBuilder::new()
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .redirect(redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| FetchError::Connection {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { client, config })
    }

    fn headers_for(&self, url: &str, config: &FetchConfig) -> Result<HeaderMap, FetchError> {
        let mut headers = HeaderMap::new();

        let user_agent = match config.mode {
            AutomationMode::Standard => &self.config.user_agent,
            AutomationMode::Stealth => &self.config.stealth_user_agent,
        };
        headers.insert(USER_AGENT, header_value(url, user_agent)?);

        if config.mode == AutomationMode::Stealth {
            headers.insert(
                ACCEPT,
                HeaderValue::from_static(
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                ),
            );
            headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
            headers.insert(
                HeaderName::from_static("upgrade-insecure-requests"),
                HeaderValue::from_static("1"),
            );
            headers.insert(
                HeaderName::from_static("sec-fetch-mode"),
                HeaderValue::from_static("navigate"),
            );
        }

        for (name, value) in &config.headers {
            match HeaderName::from_bytes(name.as_bytes()) {
                Ok(name) => {
                    headers.insert(name, header_value(url, value)?);
                }
                Err(e) => warn!("Ignoring invalid header name '{}': {}", name, e),
            }
        }

        Ok(headers)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, config: &FetchConfig) -> Result<Document, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        debug!("GET {} ({:?} profile)", url, config.mode);
        let response = self
            .client
            .get(parsed)
            .headers(self.headers_for(url, config)?)
            .timeout(config.timeout)
            .send()
            .await
            .map_err(|e| classify(url, config.timeout, &e))?;

        let status = response.status();
        let final_url = response.url().to_string();
        if status.is_client_error() || status.is_server_error() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let html = response
            .text()
            .await
            .map_err(|e| classify(url, config.timeout, &e))?;

        debug!("Fetched {} bytes from {}", html.len(), final_url);
        Ok(Document {
            url: url.to_string(),
            final_url,
            status: status.as_u16(),
            html,
        })
    }
}

fn classify(url: &str, timeout: Duration, error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if let Some(status) = error.status() {
        FetchError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        }
    } else {
        FetchError::Connection {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}

fn header_value(url: &str, value: &str) -> Result<HeaderValue, FetchError> {
    HeaderValue::from_str(value).map_err(|e| FetchError::Automation {
        url: url.to_string(),
        reason: format!("invalid header value '{value}': {e}"),
        recoverable: false,
    })
}
