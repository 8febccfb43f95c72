//! Configuration infrastructure
//!
//! Settings are layered: built-in defaults, then the JSON config file, then
//! `SCRAPEFLOW__SECTION__KEY` environment variables. Every section carries
//! serde defaults so partial files load.

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

use super::retry_manager::RetryPolicy;
use crate::domain::job::{DelayRange, JobOverrides};
use crate::domain::template::AutomationMode;

const APP_DIR: &str = "scrapeflow";
const CONFIG_FILE: &str = "scrapeflow_config.json";
const ENV_PREFIX: &str = "SCRAPEFLOW";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub job_defaults: JobDefaults,
    pub fetcher: HttpClientConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Fetch-and-extract units allowed in flight across all jobs
    pub max_concurrent_units: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_units: defaults::MAX_CONCURRENT_UNITS,
        }
    }
}

/// Per-job settings a job may override
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDefaults {
    pub delay_range_ms: DelayRange,
    pub timeout_seconds: u64,
    pub retry: RetryPolicy,
    /// Ceiling on pages followed per target, whatever the template asks for
    pub max_pages: u32,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            delay_range_ms: DelayRange::new(defaults::DELAY_MIN_MS, defaults::DELAY_MAX_MS),
            timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            retry: RetryPolicy::default(),
            max_pages: defaults::MAX_PAGES,
        }
    }
}

impl JobDefaults {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Apply a job's overrides on top of these defaults. Values `validate`
    /// would reject are clamped: zero timeout and attempts become 1, an
    /// inverted delay range is reordered.
    pub fn with_overrides(&self, overrides: &JobOverrides) -> Self {
        let mut merged = self.clone();
        if let Some(delay) = overrides.delay_range_ms {
            if !delay.is_valid() {
                warn!("Reordering inverted delay override {}..{}", delay.min_ms, delay.max_ms);
            }
            merged.delay_range_ms =
                DelayRange::new(delay.min_ms.min(delay.max_ms), delay.max_ms.max(delay.min_ms));
        }
        if let Some(timeout) = overrides.timeout_seconds {
            if timeout == 0 {
                warn!("Timeout override of 0s raised to 1s");
            }
            merged.timeout_seconds = timeout.max(1);
        }
        if let Some(attempts) = overrides.retry_attempts {
            if attempts == 0 {
                warn!("Retry override of 0 attempts raised to 1");
            }
            merged.retry.max_attempts = attempts.max(1);
        }
        merged
    }
}

/// HTTP fetcher profile settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    pub user_agent: String,
    /// Browser-like user agent for the `stealth` profile
    pub stealth_user_agent: String,
    pub max_redirects: usize,
    pub default_mode: AutomationMode,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::USER_AGENT.to_string(),
            stealth_user_agent: defaults::STEALTH_USER_AGENT.to_string(),
            max_redirects: defaults::MAX_REDIRECTS,
            default_mode: AutomationMode::Standard,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "error", "warn", "info", "debug" or "trace"
    pub level: String,
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    /// Defaults to `<data dir>/scrapeflow/logs`
    pub log_dir: Option<PathBuf>,
    /// "daily" or "never"
    pub rolling: String,
    /// Log files kept on start-up cleanup
    pub max_files: u32,
    pub auto_cleanup_logs: bool,
    /// Per-target level overrides, e.g. "reqwest" → "warn"
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: None,
            rolling: "daily".to_string(),
            max_files: 7,
            auto_cleanup_logs: true,
            module_filters: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Reject settings the scheduler or job controller cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |message: String| Err(ConfigError::Validation { message });

        if self.scheduler.max_concurrent_units == 0 {
            return fail("scheduler.max_concurrent_units must be at least 1".into());
        }
        let delay = self.job_defaults.delay_range_ms;
        if !delay.is_valid() {
            return fail(format!(
                "job_defaults.delay_range_ms is inverted: {} > {}",
                delay.min_ms, delay.max_ms
            ));
        }
        if self.job_defaults.retry.max_attempts == 0 {
            return fail("job_defaults.retry.max_attempts must be at least 1".into());
        }
        if self.job_defaults.timeout_seconds == 0 {
            return fail("job_defaults.timeout_seconds must be at least 1".into());
        }
        if self.job_defaults.retry.backoff_multiplier < 1.0 {
            return fail("job_defaults.retry.backoff_multiplier must be >= 1.0".into());
        }
        Ok(())
    }
}

/// Configuration file management
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join(APP_DIR);
        Ok(config_dir)
    }

    pub fn get_app_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to get user data directory")?
            .join(APP_DIR);
        Ok(data_dir)
    }

    pub fn new() -> Result<Self> {
        Ok(Self::with_path(Self::get_config_dir()?.join(CONFIG_FILE)))
    }

    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load defaults → file → environment. A missing file is created with
    /// the defaults first.
    pub async fn load_config(&self) -> Result<AppConfig> {
        if !fs::try_exists(&self.config_path).await.unwrap_or(false) {
            info!(
                "Configuration file not found, creating default: {:?}",
                self.config_path
            );
            self.save_config(&AppConfig::default()).await?;
        }

        let config = Self::layered(&self.config_path)
            .with_context(|| format!("Failed to load {:?}", self.config_path))?;
        config.validate()?;

        info!("Loaded configuration from: {:?}", self.config_path);
        Ok(config)
    }

    fn layered(path: &Path) -> Result<AppConfig, ConfigError> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(dir) = self.config_path.parent() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create config directory: {:?}", dir))?;
        }

        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;
        fs::write(&self.config_path, content)
            .await
            .context("Failed to write configuration file")?;

        info!("Configuration saved to: {:?}", self.config_path);
        Ok(())
    }

    pub async fn reset_to_defaults(&self) -> Result<AppConfig> {
        let config = AppConfig::default();
        self.save_config(&config).await?;
        info!("Configuration reset to defaults");
        Ok(config)
    }
}

/// Default values
pub mod defaults {
    /// Pages followed per target when a template enables pagination
    pub const MAX_PAGES: u32 = 10;

    pub const MAX_CONCURRENT_UNITS: usize = 3;

    pub const DELAY_MIN_MS: u64 = 500;
    pub const DELAY_MAX_MS: u64 = 1500;

    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;

    pub const RETRY_MAX_ATTEMPTS: u32 = 3;
    pub const RETRY_BASE_DELAY_MS: u64 = 1000;
    pub const RETRY_MAX_DELAY_MS: u64 = 30_000;
    pub const RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const RETRY_JITTER_MS: u64 = 0;

    pub const MAX_REDIRECTS: usize = 10;
    pub const USER_AGENT: &str = concat!("scrapeflow/", env!("CARGO_PKG_VERSION"));
    pub const STEALTH_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
}
