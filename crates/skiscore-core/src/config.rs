use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, ConfigError};

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    pub config_dir: PathBuf,

    /// Directory holding the session database
    pub data_dir: PathBuf,

    /// GPS tracking settings
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Session history storage settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// GPS tracking cadence and buffering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Snapshot broadcast cadence while tracking
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,

    /// Desired interval between location fixes
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,

    /// Fastest interval the location source may deliver at
    #[serde(default = "default_min_update_interval_ms")]
    pub min_update_interval_ms: u64,

    /// Longest the source may batch fixes before delivering
    #[serde(default = "default_max_update_delay_ms")]
    pub max_update_delay_ms: u64,

    /// Request the most accurate positioning mode
    #[serde(default = "default_high_accuracy")]
    pub high_accuracy: bool,

    /// Capacity of the fix channel between source and engine
    #[serde(default = "default_fix_buffer")]
    pub fix_buffer: usize,
}

fn default_snapshot_interval_ms() -> u64 {
    1000
}

fn default_update_interval_ms() -> u64 {
    3000
}

fn default_min_update_interval_ms() -> u64 {
    2000
}

fn default_max_update_delay_ms() -> u64 {
    5000
}

fn default_high_accuracy() -> bool {
    true
}

fn default_fix_buffer() -> usize {
    64
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_ms: default_snapshot_interval_ms(),
            update_interval_ms: default_update_interval_ms(),
            min_update_interval_ms: default_min_update_interval_ms(),
            max_update_delay_ms: default_max_update_delay_ms(),
            high_accuracy: default_high_accuracy(),
            fix_buffer: default_fix_buffer(),
        }
    }
}

/// Session history storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file name, relative to `data_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Retries for an insert that hits a busy database
    #[serde(default = "default_insert_retries")]
    pub insert_retries: u32,

    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_database_file() -> String {
    "skiscore.db".to_string()
}

fn default_insert_retries() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    2000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: default_database_file(),
            insert_retries: default_insert_retries(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("skiscore");
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("skiscore");

        Self {
            config_dir,
            data_dir,
            tracking: TrackingConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit path, writing defaults there if missing
    pub fn load_from(config_path: &Path) -> Result<Self, AppError> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(config_path)?;

        toml::from_str(&contents).map_err(|e| {
            ConfigError::ParseError(format!("{}: {}", config_path.display(), e)).into()
        })
    }

    /// Load and validate configuration.
    ///
    /// Without an explicit path the default location is used and created on
    /// first run; an explicit path must already exist. Warnings are logged
    /// and returned alongside the config.
    pub fn load_validated(config_path: Option<&Path>) -> Result<(Self, ValidationResult), AppError> {
        let config = match config_path {
            Some(path) if !path.exists() => {
                return Err(ConfigError::NotFound(path.display().to_string()).into());
            }
            Some(path) => Self::load_from(path)?,
            None => Self::load_from(&Self::config_path()?)?,
        };

        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        let tracking = &self.tracking;

        if tracking.snapshot_interval_ms == 0 {
            result.add_error(
                "tracking.snapshot_interval_ms",
                "Snapshot interval must be greater than 0",
            );
        }

        if tracking.update_interval_ms == 0 {
            result.add_error(
                "tracking.update_interval_ms",
                "Location update interval must be greater than 0",
            );
        } else if tracking.update_interval_ms < 1000 {
            result.add_warning(
                "tracking.update_interval_ms",
                "Location updates faster than 1s drain the battery quickly",
            );
        }

        if tracking.min_update_interval_ms > tracking.update_interval_ms {
            result.add_error(
                "tracking.min_update_interval_ms",
                "Minimum update interval cannot exceed the update interval",
            );
        }

        if tracking.max_update_delay_ms < tracking.update_interval_ms {
            result.add_warning(
                "tracking.max_update_delay_ms",
                "Maximum update delay is shorter than the update interval",
            );
        }

        if tracking.fix_buffer == 0 {
            result.add_error("tracking.fix_buffer", "Fix buffer must hold at least one fix");
        }

        if self.storage.database_file.trim().is_empty() {
            result.add_error("storage.database_file", "Database file name is empty");
        }

        if self.storage.retry_initial_delay_ms > self.storage.retry_max_delay_ms {
            result.add_warning(
                "storage.retry_initial_delay_ms",
                "Initial retry delay exceeds the maximum; every retry will use the maximum",
            );
        }

        result
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Full path of the session database
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.database_file)
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("skiscore");

        Ok(config_dir.join("config.toml"))
    }
}
