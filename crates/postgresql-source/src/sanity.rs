//! Server settings that make long polls unsafe.

use std::time::Duration;

/// Parse a duration setting as printed by `SHOW`.
///
/// Returns `None` for settings that mean "no limit" (`0`, `-1`). Bare
/// numbers are milliseconds, the unit of both settings checked here.
pub fn parse_setting_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '-' || c == '.'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let number: f64 = number.parse().ok()?;
    if number <= 0.0 {
        return None;
    }
    let millis = match unit.trim() {
        "" | "ms" => number,
        "s" => number * 1_000.0,
        "min" => number * 60_000.0,
        "h" => number * 3_600_000.0,
        "d" => number * 86_400_000.0,
        "us" => number / 1_000.0,
        _ => return None,
    };
    Some(Duration::from_secs_f64(millis / 1_000.0))
}

/// Report `setting` if it would cancel a query before `poll_timeout`.
pub(crate) fn check_limit(setting: &str, raw: &str, poll_timeout: Duration) -> Option<String> {
    let limit = parse_setting_duration(raw)?;
    if limit < poll_timeout {
        Some(format!(
            "{setting} is {raw}, shorter than the poll timeout of {}s; \
             long polls will be cancelled by the server",
            poll_timeout.as_secs()
        ))
    } else {
        None
    }
}
