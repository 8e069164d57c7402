//! Value representations for rows read from a source.
//!
//! Source rows have an arbitrary, discovered shape. Each column value is a
//! [`Value`] tagged variant, which knows how to order itself against other
//! values (for cursors), how to render itself as JSON under a
//! [`TimezonePolicy`], and how to print itself as a SQL literal.

use base64::Engine;
use chrono::{
    DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, SecondsFormat, TimeZone,
    Utc,
};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;
use uuid::Uuid;

/// A single column value.
///
/// Values are persisted inside cursor checkpoints, so the serde form is
/// adjacently tagged and lossless:
///
/// ```json
/// { "type": "timestamp_tz", "value": "2024-01-02T00:00:00Z" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value
    Bool(bool),
    /// Any integer width, widened to 64 bits
    Int(i64),
    /// Any float width, widened to 64 bits
    Float(f64),
    /// Decimal kept as its exact textual form
    Decimal(String),
    /// Character data
    Text(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// UUID value
    Uuid(Uuid),
    /// Calendar date
    Date(NaiveDate),
    /// Time of day
    Time(NaiveTime),
    /// Timestamp without zone
    Timestamp(NaiveDateTime),
    /// Timestamp with zone, normalized to UTC
    TimestampTz(DateTime<Utc>),
    /// JSON document
    Json(serde_json::Value),
    /// Array of values
    Array(Vec<Value>),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamp_tz",
            Value::Json(_) => "json",
            Value::Array(_) => "array",
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Order two values of compatible kinds.
    ///
    /// Returns `None` when the kinds cannot be compared (for example a
    /// timestamp against text), which callers treat as a schema change.
    /// Integers, floats and decimals compare numerically with each other.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Decimal(a), Value::Decimal(b)) => {
                Some(Decimal::from_str(a).ok()?.cmp(&Decimal::from_str(b).ok()?))
            }
            (Value::Decimal(a), Value::Int(b)) => {
                Some(Decimal::from_str(a).ok()?.cmp(&Decimal::from(*b)))
            }
            (Value::Int(a), Value::Decimal(b)) => {
                Some(Decimal::from(*a).cmp(&Decimal::from_str(b).ok()?))
            }
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::TimestampTz(a), Value::TimestampTz(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Render this value as JSON following the type mapping table.
    pub fn to_json(&self, tz: &TimezonePolicy) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => match serde_json::Number::from_f64(*f) {
                Some(n) => serde_json::Value::Number(n),
                None if f.is_nan() => serde_json::Value::String("NaN".to_string()),
                None if *f > 0.0 => serde_json::Value::String("Infinity".to_string()),
                None => serde_json::Value::String("-Infinity".to_string()),
            },
            Value::Decimal(d) => serde_json::Value::String(d.clone()),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => {
                serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
            Value::Uuid(u) => serde_json::Value::String(u.to_string()),
            Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Value::Time(t) => serde_json::Value::String(t.format("%H:%M:%S%.f").to_string()),
            Value::Timestamp(ts) => serde_json::Value::String(rfc3339(&tz.to_utc(ts))),
            Value::TimestampTz(ts) => serde_json::Value::String(rfc3339(ts)),
            Value::Json(v) => v.clone(),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(|v| v.to_json(tz)).collect())
            }
        }
    }

    /// Render this value as a SQL literal, for logs and `render` output.
    ///
    /// Queries sent to a source always bind values as parameters; this
    /// form is for humans.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Decimal(d) => d.clone(),
            Value::Text(s) => quote_literal(s),
            Value::Bytes(b) => {
                let hex: String = b.iter().map(|byte| format!("{byte:02x}")).collect();
                format!("'\\x{hex}'")
            }
            Value::Uuid(u) => quote_literal(&u.to_string()),
            Value::Date(d) => quote_literal(&d.format("%Y-%m-%d").to_string()),
            Value::Time(t) => quote_literal(&t.format("%H:%M:%S%.f").to_string()),
            Value::Timestamp(ts) => quote_literal(&ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            Value::TimestampTz(ts) => quote_literal(&rfc3339(ts)),
            Value::Json(v) => quote_literal(&v.to_string()),
            Value::Array(items) => format!(
                "ARRAY[{}]",
                items
                    .iter()
                    .map(|v| v.to_sql_literal())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

/// Lexicographic comparison of two value tuples.
///
/// Returns `None` if the tuples differ in length or any compared pair is
/// of incomparable kinds.
pub fn compare_tuples(a: &[Value], b: &[Value]) -> Option<Ordering> {
    if a.len() != b.len() {
        return None;
    }
    for (x, y) in a.iter().zip(b.iter()) {
        match x.compare(y)? {
            Ordering::Equal => continue,
            other => return Some(other),
        }
    }
    Some(Ordering::Equal)
}

fn rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::TimestampTz(ts)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

// ============================================================================
// Timezone policy
// ============================================================================

/// How zone-less timestamps are interpreted before normalization to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimezonePolicy {
    source: Tz,
}

impl Default for TimezonePolicy {
    fn default() -> Self {
        Self { source: Tz::UTC }
    }
}

impl TimezonePolicy {
    /// Interpret naive timestamps in the given zone.
    pub fn new(source: Tz) -> Self {
        Self { source }
    }

    /// Parse an IANA zone name such as `UTC` or `America/New_York`.
    pub fn parse(name: &str) -> anyhow::Result<Self> {
        let source = Tz::from_str(name.trim())
            .map_err(|e| anyhow::anyhow!("Invalid timezone '{name}': {e}"))?;
        Ok(Self { source })
    }

    /// The zone naive timestamps are read in.
    pub fn source(&self) -> Tz {
        self.source
    }

    /// Convert a naive source timestamp to UTC.
    ///
    /// Ambiguous local times (DST fall-back) resolve to the earlier
    /// instant; non-existent local times (DST gap) use the zone's offset
    /// at that UTC instant.
    pub fn to_utc(&self, naive: &NaiveDateTime) -> DateTime<Utc> {
        match self.source.from_local_datetime(naive) {
            LocalResult::Single(ts) => ts.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => {
                let offset = self.source.offset_from_utc_datetime(naive).fix();
                let shifted = *naive - chrono::Duration::seconds(offset.local_minus_utc() as i64);
                Utc.from_utc_datetime(&shifted)
            }
        }
    }
}

// ============================================================================
// Rows
// ============================================================================

/// A source row: ordered column names with their values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column append.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    /// Append a column.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.columns.push((name.into(), value.into()));
    }

    /// Look up a column value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    /// Iterate columns in source order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Render the row as a JSON object following the type mapping table.
    pub fn to_json_map(&self, tz: &TimezonePolicy) -> serde_json::Map<String, serde_json::Value> {
        self.columns
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json(tz)))
            .collect()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}
