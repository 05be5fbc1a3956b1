//! Repository endpoint response.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::web::lenient_i64;

/// Subset of `GET /v2/repositories/{namespace}/{name}`.
///
/// Every field is optional; the endpoint has dropped and renamed fields
/// across versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RepositoryInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub pull_count: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub star_count: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub status: Option<i64>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl RepositoryInfo {
    /// Seconds since `last_updated`, or `None` if absent or unparseable.
    /// Timestamps in the future count as zero.
    pub fn seconds_since_update(&self, now: DateTime<Utc>) -> Option<i64> {
        let raw = self.last_updated.as_deref()?.trim();
        let updated = DateTime::parse_from_rfc3339(raw).ok()?;
        Some((now - updated.with_timezone(&Utc)).num_seconds().max(0))
    }

    /// Whether the body carried any of the fields we chart.
    pub fn has_metrics(&self) -> bool {
        self.pull_count.is_some()
            || self.star_count.is_some()
            || self.status.is_some()
            || self.last_updated.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> RepositoryInfo {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_counts() {
        let info = decode(r#"{"pull_count": 1000, "rating": 5, "star_count": 100}"#);
        assert_eq!(info.pull_count, Some(1000));
        assert_eq!(info.star_count, Some(100));
        assert_eq!(info.status, None);
        assert!(info.has_metrics());
    }

    #[test]
    fn test_missing_and_null_fields() {
        let info = decode(r#"{"pull_count": null, "some_field": "value"}"#);
        assert_eq!(info, RepositoryInfo::default());
        assert!(!info.has_metrics());

        let info = decode(r#"{"pull_count": "5000", "star_count": -1}"#);
        assert_eq!(info.pull_count, Some(5000));
        assert_eq!(info.star_count, Some(-1));
    }

    #[test]
    fn test_seconds_since_update() {
        let now = DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let info = decode(r#"{"last_updated": "2024-01-15T11:59:00Z"}"#);
        assert_eq!(info.seconds_since_update(now), Some(60));

        let info = decode(r#"{"last_updated": "2024-01-16T00:00:00Z"}"#);
        assert_eq!(info.seconds_since_update(now), Some(0));

        let info = decode(r#"{"last_updated": "yesterday"}"#);
        assert_eq!(info.seconds_since_update(now), None);
    }
}
