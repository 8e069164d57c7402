//! Column types and the source-to-JSON type mapping table.
//!
//! Every source connector maps its native column types onto [`ColumnType`].
//! The mapping from `ColumnType` to the JSON representation of emitted
//! documents is fixed and lives here, so all sources agree on how a
//! decimal or a timestamp looks downstream.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Source-agnostic column type.
///
/// # YAML Format
///
/// ```yaml
/// type: big_int
/// ---
/// type: array
/// element:
///   type: text
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnType {
    /// Boolean value
    Bool,
    /// 16-bit signed integer
    SmallInt,
    /// 32-bit signed integer
    Int,
    /// 64-bit signed integer
    BigInt,
    /// 32-bit floating point
    Float,
    /// 64-bit floating point
    Double,
    /// Arbitrary precision decimal
    Decimal,
    /// Character data of any length
    Text,
    /// Binary data
    Bytes,
    /// UUID
    Uuid,
    /// Calendar date
    Date,
    /// Time of day without zone
    Time,
    /// Timestamp without zone, interpreted under the capture's timezone policy
    Timestamp,
    /// Timestamp with zone
    TimestampTz,
    /// JSON document
    Json,
    /// Homogeneous array
    Array {
        /// Element type
        element: Box<ColumnType>,
    },
    /// A native type without a mapping; values are captured as text
    Unknown {
        /// Native type name as reported by the source
        name: String,
    },
}

impl ColumnType {
    /// Create an array type.
    pub fn array(element: ColumnType) -> Self {
        Self::Array {
            element: Box::new(element),
        }
    }

    /// Check if this is a numeric type.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::SmallInt
                | ColumnType::Int
                | ColumnType::BigInt
                | ColumnType::Float
                | ColumnType::Double
                | ColumnType::Decimal
        )
    }

    /// Check if this is a temporal type.
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            ColumnType::Date | ColumnType::Time | ColumnType::Timestamp | ColumnType::TimestampTz
        )
    }

    /// Whether values of this type have a total order usable as a cursor.
    pub fn is_orderable(&self) -> bool {
        self.is_numeric()
            || self.is_temporal()
            || matches!(self, ColumnType::Text | ColumnType::Uuid | ColumnType::Bool)
    }

    /// JSON schema fragment describing how values of this type are emitted.
    ///
    /// This is the type mapping table:
    ///
    /// | Column type | JSON |
    /// |---|---|
    /// | bool | boolean |
    /// | small_int, int, big_int | integer |
    /// | float, double | number (NaN and infinities as strings) |
    /// | decimal | string, format `number` |
    /// | text | string |
    /// | bytes | string, base64 content encoding |
    /// | uuid | string, format `uuid` |
    /// | date | string, format `date` |
    /// | time | string, format `time` |
    /// | timestamp, timestamp_tz | string, format `date-time` (RFC3339, UTC) |
    /// | json | any |
    /// | array | array of the element mapping |
    /// | unknown | string |
    pub fn json_schema(&self) -> serde_json::Value {
        match self {
            ColumnType::Bool => json!({ "type": "boolean" }),
            ColumnType::SmallInt | ColumnType::Int | ColumnType::BigInt => {
                json!({ "type": "integer" })
            }
            ColumnType::Float | ColumnType::Double => {
                json!({ "type": ["number", "string"], "format": "number" })
            }
            ColumnType::Decimal => json!({ "type": "string", "format": "number" }),
            ColumnType::Text => json!({ "type": "string" }),
            ColumnType::Bytes => json!({ "type": "string", "contentEncoding": "base64" }),
            ColumnType::Uuid => json!({ "type": "string", "format": "uuid" }),
            ColumnType::Date => json!({ "type": "string", "format": "date" }),
            ColumnType::Time => json!({ "type": "string", "format": "time" }),
            ColumnType::Timestamp | ColumnType::TimestampTz => {
                json!({ "type": "string", "format": "date-time" })
            }
            ColumnType::Json => json!({}),
            ColumnType::Array { element } => {
                json!({ "type": "array", "items": element.json_schema() })
            }
            ColumnType::Unknown { .. } => json!({ "type": "string" }),
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Bool => f.write_str("bool"),
            ColumnType::SmallInt => f.write_str("small_int"),
            ColumnType::Int => f.write_str("int"),
            ColumnType::BigInt => f.write_str("big_int"),
            ColumnType::Float => f.write_str("float"),
            ColumnType::Double => f.write_str("double"),
            ColumnType::Decimal => f.write_str("decimal"),
            ColumnType::Text => f.write_str("text"),
            ColumnType::Bytes => f.write_str("bytes"),
            ColumnType::Uuid => f.write_str("uuid"),
            ColumnType::Date => f.write_str("date"),
            ColumnType::Time => f.write_str("time"),
            ColumnType::Timestamp => f.write_str("timestamp"),
            ColumnType::TimestampTz => f.write_str("timestamp_tz"),
            ColumnType::Json => f.write_str("json"),
            ColumnType::Array { element } => write!(f, "array<{element}>"),
            ColumnType::Unknown { name } => write!(f, "unknown({name})"),
        }
    }
}
