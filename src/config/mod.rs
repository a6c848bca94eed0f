//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

use std::time::Duration;

use serde::Deserialize;

use crate::notify::MessagingConfig;
use crate::scheduler::SchedulerConfig;
use crate::storage::StorageConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "CALENDAR_CONFIG";

/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "CALENDAR";

/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "CALENDAR_LOG";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration.
    pub log: LogConfig,
    /// Event storage configuration.
    pub storage: StorageConfig,
    /// Notification queue configuration.
    pub messaging: MessagingConfig,
    /// Scheduler timing.
    pub scheduler: SchedulerSettings,
    /// Sender settings.
    pub sender: SenderSettings,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when `CALENDAR_LOG` is unset.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Scheduler timing, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub notify_interval_secs: u64,
    pub purge_interval_secs: u64,
    pub purge_older_than_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        let defaults = SchedulerConfig::default();
        Self {
            notify_interval_secs: defaults.notify_interval.as_secs(),
            purge_interval_secs: defaults.purge_interval.as_secs(),
            purge_older_than_secs: defaults.purge_older_than.as_secs(),
        }
    }
}

impl SchedulerSettings {
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            notify_interval: Duration::from_secs(self.notify_interval_secs),
            purge_interval: Duration::from_secs(self.purge_interval_secs),
            purge_older_than: Duration::from_secs(self.purge_older_than_secs),
        }
    }
}

/// Sender settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SenderSettings {
    /// How long to wait for the consume loop to exit on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for SenderSettings {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 10,
        }
    }
}

impl SenderSettings {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config: Config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the services cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.notify_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.notify_interval_secs must be positive".to_string(),
            ));
        }
        if self.scheduler.purge_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.purge_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
