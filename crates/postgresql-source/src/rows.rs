//! Reverse conversion: PostgreSQL row → engine [`Row`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use postgres_types::{FromSql, Kind, Type};
use rust_decimal::Decimal;
use std::error::Error;
use sync_core::{Row, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::text::{InetText, IntervalText, NumericText, RawValue, TimeTzText};

/// Errors that can occur converting a PostgreSQL value.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The driver failed to decode the value
    #[error("Failed to decode column '{column}': {source}")]
    Decode {
        column: String,
        #[source]
        source: tokio_postgres::Error,
    },
}

/// Text form of enum-typed columns.
struct EnumText(String);

impl<'a> FromSql<'a> for EnumText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(EnumText(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }
}

/// Convert a driver row into an engine row, preserving column order.
pub fn convert_row(row: &tokio_postgres::Row) -> Result<Row, ConversionError> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = convert_column(row, idx, column.name(), column.type_())?;
        out.push(column.name(), value);
    }
    Ok(out)
}

fn convert_column(
    row: &tokio_postgres::Row,
    idx: usize,
    name: &str,
    ty: &Type,
) -> Result<Value, ConversionError> {
    macro_rules! get {
        ($t:ty) => {
            row.try_get::<_, Option<$t>>(idx)
                .map_err(|source| ConversionError::Decode {
                    column: name.to_string(),
                    source,
                })?
        };
    }
    macro_rules! array {
        ($t:ty, $wrap:expr) => {
            match get!(Vec<Option<$t>>) {
                Some(items) => Value::Array(
                    items
                        .into_iter()
                        .map(|item| item.map($wrap).unwrap_or(Value::Null))
                        .collect(),
                ),
                None => Value::Null,
            }
        };
    }

    let value = match *ty {
        Type::BOOL => get!(bool).map(Value::Bool),
        Type::INT2 => get!(i16).map(|v| Value::Int(v.into())),
        Type::INT4 => get!(i32).map(|v| Value::Int(v.into())),
        Type::INT8 => get!(i64).map(Value::Int),
        Type::OID => get!(u32).map(|v| Value::Int(v.into())),
        Type::FLOAT4 => get!(f32).map(|v| Value::Float(v.into())),
        Type::FLOAT8 => get!(f64).map(Value::Float),
        Type::NUMERIC => match row.try_get::<_, Option<Decimal>>(idx) {
            Ok(d) => d.map(|d| Value::Decimal(d.to_string())),
            // NaN, infinities and more than 28 significant digits
            Err(_) => get!(NumericText).map(|n| Value::Decimal(n.0)),
        },
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => get!(String).map(Value::Text),
        Type::BYTEA => get!(Vec<u8>).map(Value::Bytes),
        Type::UUID => get!(Uuid).map(Value::Uuid),
        Type::DATE => get!(NaiveDate).map(Value::Date),
        Type::TIME => get!(NaiveTime).map(Value::Time),
        Type::TIMESTAMP => get!(NaiveDateTime).map(Value::Timestamp),
        Type::TIMESTAMPTZ => get!(DateTime<Utc>).map(Value::TimestampTz),
        Type::JSON | Type::JSONB => get!(serde_json::Value).map(Value::Json),
        Type::BOOL_ARRAY => Some(array!(bool, Value::Bool)),
        Type::INT4_ARRAY => Some(array!(i32, |v: i32| Value::Int(v.into()))),
        Type::INT8_ARRAY => Some(array!(i64, Value::Int)),
        Type::FLOAT8_ARRAY => Some(array!(f64, Value::Float)),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => Some(array!(String, Value::Text)),
        Type::UUID_ARRAY => Some(array!(Uuid, Value::Uuid)),
        Type::NUMERIC_ARRAY => Some(array!(NumericText, |n: NumericText| Value::Decimal(n.0))),
        Type::INTERVAL => get!(IntervalText).map(|i| Value::Text(i.0)),
        Type::INET | Type::CIDR => get!(InetText).map(|i| Value::Text(i.0)),
        Type::TIMETZ => get!(TimeTzText).map(|t| Value::Text(t.0)),
        _ if matches!(ty.kind(), Kind::Enum(_)) => get!(EnumText).map(|e| Value::Text(e.0)),
        _ => {
            tracing::debug!(
                "Column '{name}' has type '{}' with no typed decoder, keeping its wire form",
                ty.name()
            );
            get!(RawValue).map(RawValue::into_value)
        }
    };
    Ok(value.unwrap_or(Value::Null))
}
