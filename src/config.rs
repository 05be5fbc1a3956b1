//! Configuration module for the strobe binary.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Output settings (plugin name, channel capacity)
//! - Jobs grouped by collector module
//! - An optional directory of extra job files

mod app;
mod collector;
mod validation;

pub use app::{AppConfig, OutputConfig};
pub use collector::CollectorsConfig;
pub use validation::{ConfigError, expand_env_vars, parse_duration};
