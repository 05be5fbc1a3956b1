//! `key=value;` connection strings.
//!
//! Format used by the DB2 CLI and IBM i Access ODBC drivers, e.g.
//! `HOSTNAME=db.local;PORT=50000;DATABASE=SAMPLE;UID=monitor;PWD=secret`.
//! Keys are case-insensitive; values keep inner spaces.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DsnError {
    #[error("malformed DSN segment '{0}', expected key=value")]
    Malformed(String),

    #[error("invalid port '{0}', expected 1-65535")]
    Port(String),
}

/// Parsed connection string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dsn {
    pairs: BTreeMap<String, String>,
}

impl Dsn {
    /// Value of `key` (case-insensitive).
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn hostname(&self) -> Option<&str> {
        self.get("hostname").or_else(|| self.get("system"))
    }

    pub fn port(&self) -> Option<u16> {
        self.get("port").and_then(|p| p.parse().ok())
    }

    pub fn database(&self) -> Option<&str> {
        self.get("database")
    }

    pub fn uid(&self) -> Option<&str> {
        self.get("uid")
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl FromStr for Dsn {
    type Err = DsnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut pairs = BTreeMap::new();

        for segment in s.split(';').map(str::trim).filter(|seg| !seg.is_empty()) {
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| DsnError::Malformed(segment.to_string()))?;
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                return Err(DsnError::Malformed(segment.to_string()));
            }
            let value = value.trim().to_string();

            if key == "port" {
                match value.parse::<u16>() {
                    Ok(p) if p > 0 => {}
                    _ => return Err(DsnError::Port(value)),
                }
            }
            pairs.insert(key, value);
        }

        Ok(Self { pairs })
    }
}

/// Renders the DSN with the password masked.
impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.pairs {
            if !first {
                f.write_str(";")?;
            }
            first = false;
            if key == "pwd" || key == "password" {
                write!(f, "{}=***", key.to_ascii_uppercase())?;
            } else {
                write!(f, "{}={}", key.to_ascii_uppercase(), value)?;
            }
        }
        Ok(())
    }
}
