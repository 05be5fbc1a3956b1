//! Configuration loading and validation helpers.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file or directory could not be read.
    #[error("failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file is not valid YAML for its schema.
    #[error("failed to parse '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Values parsed but are inconsistent or out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Read and deserialize one YAML file.
pub(crate) fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a human readable duration such as `30s`, `5m` or `1h30m`.
///
/// Used for CLI flags; YAML fields go through `humantime_serde`.
///
/// ```
/// use strobe::config::parse_duration;
///
/// assert_eq!(parse_duration("15m").unwrap().as_secs(), 900);
/// assert_eq!(parse_duration("1h30m").unwrap().as_secs(), 5400);
/// assert!(parse_duration("").is_err());
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    match s.trim() {
        "" => Err("duration string is empty".to_string()),
        trimmed => humantime::parse_duration(trimmed).map_err(|e| e.to_string()),
    }
}

fn env_reference() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").ok())
        .as_ref()
}

/// Expand `${VAR}` and `${VAR:-default}` references, typically in DSNs,
/// passwords and paths.
///
/// Unset variables without a default expand to the empty string.
pub fn expand_env_vars(input: &str) -> String {
    let Some(pattern) = env_reference() else {
        return input.to_string();
    };

    pattern
        .replace_all(input, |caps: &Captures| {
            std::env::var(&caps[1])
                .ok()
                .unwrap_or_else(|| caps.get(2).map_or("", |m| m.as_str()).to_string())
        })
        .into_owned()
}
