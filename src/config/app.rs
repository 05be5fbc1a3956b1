//! Application configuration structures.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::output::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_PLUGIN_NAME};

use super::collector::CollectorsConfig;
use super::validation::{ConfigError, expand_env_vars, read_yaml};

fn default_plugin_name() -> String {
    DEFAULT_PLUGIN_NAME.to_string()
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

/// Output writer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Plugin name reported in chart definitions (default: "strobe").
    #[serde(default = "default_plugin_name")]
    pub plugin_name: String,

    /// Frames buffered ahead of the writer thread (default: 1024).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            plugin_name: default_plugin_name(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub output: OutputConfig,

    /// Jobs grouped by module.
    #[serde(default)]
    pub collectors: CollectorsConfig,

    /// Directory of additional job files. Supports `${VAR}` expansion.
    #[serde(default)]
    pub collector_path: Option<String>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = read_yaml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output.plugin_name.trim().is_empty()
            || self.output.plugin_name.chars().any(char::is_whitespace)
        {
            return Err(ConfigError::Invalid(format!(
                "output plugin_name must be a single word, got '{}'",
                self.output.plugin_name
            )));
        }

        if self.output.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "output channel_capacity must be positive".to_string(),
            ));
        }

        self.collectors.validate()
    }

    /// Load configuration including the `collector_path` directory.
    ///
    /// Jobs found there are appended to those of the main file and the
    /// result is validated as a whole, so a name clash between files fails.
    pub fn load_with_collector_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;

        if let Some(ref collector_dir) = config.collector_path {
            let additional = CollectorsConfig::load_from_dir(&expand_env_vars(collector_dir))?;
            tracing::info!(
                path = %collector_dir,
                jobs = additional.job_count(),
                "Loaded collector_path"
            );
            config.collectors = config.collectors.merge(additional);
        }

        config.validate()?;
        Ok(config)
    }
}
