//! `nsd-control stats_noreset` output.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NsdParseError {
    #[error("no valid statistics in {attempted} lines")]
    NoValidStats { attempted: usize },
}

/// Parse `key=value` lines. Values are kept as floats; `time.*` values
/// have a fractional part.
///
/// Malformed lines are skipped. Empty input yields an empty map.
pub fn parse_stats(data: &[u8]) -> Result<BTreeMap<String, f64>, NsdParseError> {
    let text = String::from_utf8_lossy(data);
    let mut stats = BTreeMap::new();
    let mut attempted = 0;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        attempted += 1;
        let Some((key, value)) = line.split_once('=') else {
            tracing::trace!(line, "Skipping line without '='");
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        match value.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => {
                stats.insert(key.to_string(), v);
            }
            _ => tracing::trace!(key, value, "Skipping non-numeric statistic"),
        }
    }

    if attempted > 0 && stats.is_empty() {
        return Err(NsdParseError::NoValidStats { attempted });
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stats() {
        let out = b"server0.queries=12\r\nnum.queries=12\ntime.boot=3520.250115\n\
                    num.type.A=10\nnum.type.AAAA=2\nzone.master=3\n";
        let stats = parse_stats(out).unwrap();
        assert_eq!(stats.len(), 6);
        assert_eq!(stats["num.queries"], 12.0);
        assert_eq!(stats["time.boot"], 3520.250115);
        assert_eq!(stats["zone.master"], 3.0);
    }

    #[test]
    fn test_parse_stats_skips_malformed() {
        let out = b"# comment\n\nnum.queries=5\nbogus line\n=7\nnum.tcp=abc\nnum.udp = 4 \n";
        let stats = parse_stats(out).unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats["num.udp"], 4.0);
    }

    #[test]
    fn test_parse_stats_errors() {
        assert!(parse_stats(b"").unwrap().is_empty());
        assert!(matches!(
            parse_stats(b"error: could not connect\nNaN\n"),
            Err(NsdParseError::NoValidStats { attempted: 2 })
        ));
    }
}
