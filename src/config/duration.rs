//! Duration parsing utilities.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parse a duration string like "1h", "30m", "300s", "300".
///
/// Supports:
/// - Plain numbers (interpreted as seconds): "300"
/// - Seconds suffix: "300s"
/// - Minutes suffix: "30m"
/// - Hours suffix: "1h", "24h"
///
/// Zero is rejected.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    let (num_str, unit_secs) = if let Some(num_str) = s.strip_suffix('h') {
        (num_str, 3600)
    } else if let Some(num_str) = s.strip_suffix('m') {
        (num_str, 60)
    } else if let Some(num_str) = s.strip_suffix('s') {
        (num_str, 1)
    } else {
        (s, 1)
    };

    let value: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration value: {s}"))?;
    if value == 0 {
        anyhow::bail!("Duration must be greater than zero: {s}");
    }
    let secs = value
        .checked_mul(unit_secs)
        .with_context(|| format!("Duration is too large: {s}"))?;
    Ok(Duration::from_secs(secs))
}

/// Render a duration in the largest whole unit.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs > 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// A duration written as a string in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConfigDuration(pub Duration);

impl TryFrom<String> for ConfigDuration {
    type Error = anyhow::Error;

    fn try_from(s: String) -> anyhow::Result<Self> {
        parse_duration(&s).map(ConfigDuration)
    }
}

impl From<ConfigDuration> for String {
    fn from(d: ConfigDuration) -> Self {
        format_duration(d.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("300").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("300s").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86400));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("0m").is_err());
        assert!(parse_duration("five").is_err());
        assert!(parse_duration("-5m").is_err());
    }

    #[test]
    fn test_oversized_duration_is_an_error() {
        let err = parse_duration("9999999999999999h").unwrap_err();
        assert!(err.to_string().contains("too large"));
        assert!(parse_duration("18446744073709551615s").is_ok());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(300)), "5m");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
    }
}
