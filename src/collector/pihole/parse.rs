//! Pi-hole v6 API bodies.

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

use crate::web::lenient_i64;

/// Query types charted individually; anything else is folded into `OTHER`.
pub const QUERY_TYPES: &[&str] = &[
    "A", "AAAA", "ANY", "SRV", "SOA", "PTR", "TXT", "NAPTR", "MX", "DS", "RRSIG", "DNSKEY", "NS",
    "SVCB", "HTTPS", "OTHER",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The body carries no usable session.
    #[error("no session token in auth response")]
    Missing,

    /// The server refused the password.
    #[error("login rejected: {0}")]
    Rejected(String),

    /// The body is not JSON, typically a proxy or captive page.
    #[error("auth response is not JSON: {0}")]
    Malformed(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SessionField {
    Token(String),
    Object {
        #[serde(default)]
        valid: bool,
        #[serde(default)]
        sid: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    session: Option<SessionField>,
}

/// Result of a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Session id for `X-FTL-SID`. `None` when the server has no password.
    pub sid: Option<String>,
}

/// Interpret a `POST /api/auth` body.
///
/// A bare string is the session id; an object follows the v6 shape
/// `{"valid": bool, "sid": ..., "message": ...}`.
///
/// # Errors
/// Returns [`SessionError::Missing`] when there is no usable token and
/// [`SessionError::Rejected`] when the server reports the login invalid.
/// A body that is not JSON is [`SessionError::Malformed`].
pub fn parse_session(body: &[u8]) -> Result<Session, SessionError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| SessionError::Malformed(e.to_string()))?;
    let response: AuthResponse =
        serde_json::from_value(value).map_err(|_| SessionError::Missing)?;

    match response.session.ok_or(SessionError::Missing)? {
        SessionField::Token(token) => {
            let token = token.trim();
            if token.is_empty() {
                return Err(SessionError::Missing);
            }
            Ok(Session {
                sid: Some(token.to_string()),
            })
        }
        SessionField::Object { valid: false, message, .. } => Err(SessionError::Rejected(
            message.unwrap_or_else(|| "password incorrect".to_string()),
        )),
        SessionField::Object { sid, .. } => Ok(Session {
            sid: sid.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        }),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryStats {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub total: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub blocked: Option<i64>,
    #[serde(default)]
    pub percent_blocked: Option<f64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub unique_domains: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub forwarded: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub cached: Option<i64>,
    #[serde(default)]
    pub types: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientStats {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub active: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub total: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GravityStats {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub domains_being_blocked: Option<i64>,
    /// Unix timestamp of the last gravity run.
    #[serde(default, deserialize_with = "lenient_i64")]
    pub last_update: Option<i64>,
}

/// `GET /api/stats/summary`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub queries: QueryStats,
    #[serde(default)]
    pub clients: ClientStats,
    #[serde(default)]
    pub gravity: GravityStats,
}

impl Summary {
    /// Query counts per charted type. Unknown types add to `OTHER`.
    pub fn query_types(&self) -> BTreeMap<&'static str, i64> {
        let mut counts = BTreeMap::new();
        for (name, value) in &self.queries.types {
            let Some(count) = value
                .as_i64()
                .or_else(|| value.as_f64().map(|f| f as i64))
            else {
                continue;
            };
            let key = QUERY_TYPES
                .iter()
                .find(|t| t.eq_ignore_ascii_case(name))
                .copied()
                .unwrap_or("OTHER");
            *counts.entry(key).or_default() += count;
        }
        counts
    }
}

/// What a password file holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordFile {
    /// A plain password, as in the v6 `cli_pw` file.
    Password(String),
    /// A v5 `setupVars.conf`. Its `WEBPASSWORD` is a double SHA-256 hash
    /// that `/api/auth` never accepts.
    LegacySetupVars,
    Empty,
}

/// Classify a password file body. The first non-blank line is the password.
pub fn password_file(content: &str) -> PasswordFile {
    let is_setup_vars = content
        .lines()
        .filter_map(|line| line.trim().split_once('='))
        .any(|(key, _)| key.trim() == "WEBPASSWORD");
    if is_setup_vars {
        return PasswordFile::LegacySetupVars;
    }
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map_or(PasswordFile::Empty, |line| PasswordFile::Password(line.to_string()))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token() {
        let s = parse_session(br#"{"session":"valid_session_token"}"#).unwrap();
        assert_eq!(s.sid.as_deref(), Some("valid_session_token"));

        let s = parse_session(
            br#"{"session":{"valid":true,"totp":false,"sid":"abc=","csrf":"x","validity":300}}"#,
        )
        .unwrap();
        assert_eq!(s.sid.as_deref(), Some("abc="));
    }

    #[test]
    fn test_session_without_password() {
        let s = parse_session(br#"{"session":{"valid":true,"sid":null,"validity":-1}}"#).unwrap();
        assert_eq!(s.sid, None);
    }

    #[test]
    fn test_session_missing() {
        assert_eq!(parse_session(br#"{"session":""}"#), Err(SessionError::Missing));
        assert_eq!(parse_session(br#"{"session":"  "}"#), Err(SessionError::Missing));
        assert_eq!(parse_session(b"{}"), Err(SessionError::Missing));
    }

    #[test]
    fn test_session_not_json() {
        let err = parse_session(b"<html><body>Gateway</body></html>").unwrap_err();
        assert!(matches!(err, SessionError::Malformed(_)));
        assert!(matches!(parse_session(b"{invalid json}"), Err(SessionError::Malformed(_))));
    }

    #[test]
    fn test_session_rejected() {
        let err = parse_session(
            br#"{"session":{"valid":false,"sid":null,"message":"password incorrect"}}"#,
        )
        .unwrap_err();
        assert_eq!(err, SessionError::Rejected("password incorrect".into()));
    }

    #[test]
    fn test_summary() {
        let summary: Summary = serde_json::from_str(fixtures::SUMMARY).unwrap();
        assert_eq!(summary.queries.total, Some(7497));
        assert_eq!(summary.queries.percent_blocked, Some(17.126850));
        assert_eq!(summary.clients.active, Some(12));
        assert_eq!(summary.gravity.domains_being_blocked, Some(121860));

        let types = summary.query_types();
        assert_eq!(types["A"], 3643);
        assert_eq!(types["HTTPS"], 400);
        assert_eq!(types["OTHER"], 3);
        assert_eq!(types["MX"], 0);
        assert!(!types.contains_key("SRV"));
    }

    #[test]
    fn test_summary_partial() {
        let summary: Summary = serde_json::from_str(r#"{"queries":{"total":"10"}}"#).unwrap();
        assert_eq!(summary.queries.total, Some(10));
        assert_eq!(summary.clients.total, None);
        assert!(summary.query_types().is_empty());
    }

    #[test]
    fn test_password_file() {
        assert_eq!(
            password_file("\n  Zm9vYmFyYmF6PQ==  \n"),
            PasswordFile::Password("Zm9vYmFyYmF6PQ==".into())
        );
        assert_eq!(password_file(" \n\n"), PasswordFile::Empty);

        let setup_vars = "\
PIHOLE_INTERFACE=eth0
WEBPASSWORD=5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8
QUERY_LOGGING=true
";
        assert_eq!(password_file(setup_vars), PasswordFile::LegacySetupVars);
    }
}
