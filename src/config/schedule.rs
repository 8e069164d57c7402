//! Poll schedule strings.
//!
//! Two textual forms are accepted: a duration (`"5m"`, `"1h"`, `"24h"`,
//! `"300s"`, `"300"`) meaning "every N", or `"daily at HH:MMZ"` meaning
//! once a day at a UTC wall-clock time.

use chrono::{DateTime, Days, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::duration::{format_duration, parse_duration};

/// When a binding polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PollSchedule {
    /// Every fixed interval
    Interval(Duration),
    /// Once a day at the given UTC time
    Daily(NaiveTime),
}

impl Default for PollSchedule {
    fn default() -> Self {
        PollSchedule::Interval(Duration::from_secs(300))
    }
}

impl PollSchedule {
    /// First trigger strictly after `t`.
    ///
    /// For intervals this is `t + interval`; for daily schedules it is the
    /// next UTC occurrence of the configured time.
    pub fn next_after(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            PollSchedule::Interval(d) => chrono::Duration::from_std(*d)
                .ok()
                .and_then(|d| t.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            PollSchedule::Daily(at) => {
                let today = t.date_naive().and_time(*at).and_utc();
                if today > t {
                    today
                } else {
                    t.date_naive()
                        .checked_add_days(Days::new(1))
                        .map(|d| d.and_time(*at).and_utc())
                        .unwrap_or(DateTime::<Utc>::MAX_UTC)
                }
            }
        }
    }

    /// The interval, for interval schedules.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            PollSchedule::Interval(d) => Some(*d),
            PollSchedule::Daily(_) => None,
        }
    }
}

impl FromStr for PollSchedule {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        let lower = s.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("daily at ") {
            let Some(hhmm) = rest.trim().strip_suffix('z') else {
                anyhow::bail!("Daily schedule must be in UTC and end with 'Z': {s}");
            };
            let at = NaiveTime::parse_from_str(hhmm, "%H:%M")
                .map_err(|e| anyhow::anyhow!("Invalid daily schedule time '{hhmm}': {e}"))?;
            return Ok(PollSchedule::Daily(at));
        }
        Ok(PollSchedule::Interval(parse_duration(s)?))
    }
}

impl fmt::Display for PollSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollSchedule::Interval(d) => f.write_str(&format_duration(*d)),
            PollSchedule::Daily(at) => write!(f, "daily at {:02}:{:02}Z", at.hour(), at.minute()),
        }
    }
}

impl TryFrom<String> for PollSchedule {
    type Error = anyhow::Error;

    fn try_from(s: String) -> anyhow::Result<Self> {
        s.parse()
    }
}

impl From<PollSchedule> for String {
    fn from(p: PollSchedule) -> Self {
        p.to_string()
    }
}
