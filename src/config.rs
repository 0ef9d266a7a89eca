//! Configuration management for the crashlane flush service.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use crashlane_delivery::{ClientConfig, Configuration, Notifier, PoolConfig};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "crashlane.toml";
const ENV_PREFIX: &str = "CRASHLANE_";

/// Service settings with defaults, file, and environment overrides.
///
/// Settings are loaded in priority order:
/// 1. Environment variables prefixed with `CRASHLANE_` (highest priority)
/// 2. Configuration file (`crashlane.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Only the API key has no usable default.
///
/// # Example
///
/// ```no_run
/// use crashlane::Settings;
///
/// let settings = Settings::load().expect("failed to load settings");
/// println!("flushing {}", settings.retry_directory.display());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Collector
    /// API key events are reported under unless they carry their own.
    ///
    /// Environment variable: `CRASHLANE_API_KEY`
    #[serde(default)]
    pub api_key: String,
    /// Collector URL events are uploaded to.
    ///
    /// Environment variable: `CRASHLANE_ENDPOINT`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Request timeout in seconds.
    ///
    /// Environment variable: `CRASHLANE_TIMEOUT_SECONDS`
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    // Storage
    /// Directory retryable payloads are persisted into and flushed from.
    ///
    /// Environment variable: `CRASHLANE_RETRY_DIRECTORY`
    #[serde(default = "default_retry_directory")]
    pub retry_directory: PathBuf,

    // Policy
    /// Whether events are sent at all.
    ///
    /// Environment variable: `CRASHLANE_SEND_REPORTS`
    #[serde(default = "default_send_reports")]
    pub send_reports: bool,
    /// Release stage of the reporting application.
    ///
    /// Environment variable: `CRASHLANE_RELEASE_STAGE`
    #[serde(default)]
    pub release_stage: Option<String>,
    /// Release stages events are sent from. All stages when unset.
    ///
    /// Environment variable: `CRASHLANE_ENABLED_RELEASE_STAGES`
    #[serde(default)]
    pub enabled_release_stages: Option<Vec<String>>,
    /// Error classes that are dropped instead of sent.
    ///
    /// Environment variable: `CRASHLANE_DISCARD_CLASSES`
    #[serde(default)]
    pub discard_classes: Vec<String>,

    // Pool
    /// Maximum number of concurrent uploads.
    ///
    /// Environment variable: `CRASHLANE_MAX_CONCURRENT`
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Seconds outstanding uploads get to finish after a shutdown signal.
    ///
    /// Environment variable: `CRASHLANE_SHUTDOWN_TIMEOUT_SECONDS`
    #[serde(default = "default_shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,

    // Logging
    /// Log filter used when `RUST_LOG` is not set.
    ///
    /// Environment variable: `CRASHLANE_LOG_FILTER`
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Emit logs as JSON lines.
    ///
    /// Environment variable: `CRASHLANE_LOG_JSON`
    #[serde(default)]
    pub log_json: bool,
}

impl Settings {
    /// Load settings from defaults, `crashlane.toml`, and `CRASHLANE_*`
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if a source cannot be parsed or the merged settings are
    /// invalid.
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    /// Layered configuration sources, lowest priority first.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Extracts and validates settings from `figment`.
    ///
    /// # Errors
    ///
    /// Returns error if extraction or validation fails.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let settings: Self = figment.extract().context("failed to load settings")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings values.
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            anyhow::bail!("api_key must be set (CRASHLANE_API_KEY)");
        }

        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            anyhow::bail!("endpoint must be an http or https URL");
        }

        if self.retry_directory.as_os_str().is_empty() {
            anyhow::bail!("retry_directory must not be empty");
        }

        if self.timeout_seconds == 0 {
            anyhow::bail!("timeout_seconds must be greater than 0");
        }

        if self.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be greater than 0");
        }

        Ok(())
    }

    /// Convert to the delivery configuration snapshot.
    ///
    /// # Errors
    ///
    /// Returns error if the delivery crate rejects the values.
    pub fn to_configuration(&self) -> Result<Configuration> {
        let mut builder =
            Configuration::builder(&self.api_key, &self.endpoint, &self.retry_directory)
                .send_reports(self.send_reports);

        if let Some(stage) = &self.release_stage {
            builder = builder.release_stage(stage);
        }
        if let Some(stages) = &self.enabled_release_stages {
            builder = builder.enabled_release_stages(stages);
        }
        for class in &self.discard_classes {
            builder = builder.discard_class(class);
        }

        builder.build().context("invalid delivery configuration")
    }

    /// Convert to client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig { timeout: Duration::from_secs(self.timeout_seconds), ..Default::default() }
    }

    /// Convert to pool configuration.
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_concurrent: self.max_concurrent,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_seconds),
        }
    }

    /// Notifier identity of this binary.
    pub fn notifier(&self) -> Notifier {
        Notifier::default()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_endpoint(),
            timeout_seconds: default_timeout_seconds(),
            retry_directory: default_retry_directory(),
            send_reports: default_send_reports(),
            release_stage: None,
            enabled_release_stages: None,
            discard_classes: Vec::new(),
            max_concurrent: default_max_concurrent(),
            shutdown_timeout_seconds: default_shutdown_timeout_seconds(),
            log_filter: default_log_filter(),
            log_json: false,
        }
    }
}

fn default_endpoint() -> String {
    "https://notify.crashlane.dev".to_string()
}

fn default_timeout_seconds() -> u64 {
    crashlane_delivery::DEFAULT_TIMEOUT_SECONDS
}

fn default_retry_directory() -> PathBuf {
    PathBuf::from("crashlane-events")
}

fn default_send_reports() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    crashlane_delivery::DEFAULT_MAX_CONCURRENT
}

fn default_shutdown_timeout_seconds() -> u64 {
    30
}

fn default_log_filter() -> String {
    "info,crashlane=debug".to_string()
}
