//! Binding engine values as statement parameters.
//!
//! The target type is the one the server inferred for each placeholder,
//! so an integer cursor compared against a `numeric` column is sent as a
//! decimal, and a naive timestamp compared against `timestamptz` is sent
//! as UTC.

use bytes::BytesMut;
use chrono::{TimeZone, Utc};
use postgres_types::{to_sql_checked, IsNull, ToSql, Type};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::error::Error;
use std::str::FromStr;
use sync_core::Value;

/// Boxed statement parameter.
pub type SqlParam = Box<dyn ToSql + Sync + Send>;

/// A value could not be bound to the inferred parameter type.
#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("Cannot bind {kind} value to parameter of type {pg_type}")]
    Incompatible { kind: &'static str, pg_type: String },

    #[error("Value out of range for {pg_type}: {value}")]
    OutOfRange { pg_type: String, value: String },
}

fn incompatible(value: &Value, ty: &Type) -> ParamError {
    ParamError::Incompatible {
        kind: value.kind(),
        pg_type: ty.name().to_string(),
    }
}

fn out_of_range(value: impl ToString, ty: &Type) -> ParamError {
    ParamError::OutOfRange {
        pg_type: ty.name().to_string(),
        value: value.to_string(),
    }
}

/// Convert `value` into a parameter of PostgreSQL type `ty`.
pub fn to_sql_param(value: &Value, ty: &Type) -> Result<SqlParam, ParamError> {
    if value.is_null() {
        return Ok(Box::new(NullParam));
    }

    // Text-typed placeholders take the value's literal text.
    if matches!(*ty, Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME) {
        return Ok(Box::new(text_form(value)));
    }

    let param: SqlParam = match (value, ty) {
        (Value::Bool(b), &Type::BOOL) => Box::new(*b),

        (Value::Int(i), &Type::INT2) => {
            Box::new(i16::try_from(*i).map_err(|_| out_of_range(i, ty))?)
        }
        (Value::Int(i), &Type::INT4) => {
            Box::new(i32::try_from(*i).map_err(|_| out_of_range(i, ty))?)
        }
        (Value::Int(i), &Type::INT8) => Box::new(*i),
        (Value::Int(i), &Type::NUMERIC) => Box::new(Decimal::from(*i)),
        (Value::Int(i), &Type::FLOAT8) => Box::new(*i as f64),
        (Value::Int(i), &Type::FLOAT4) => Box::new(*i as f32),

        (Value::Float(f), &Type::FLOAT8) => Box::new(*f),
        (Value::Float(f), &Type::FLOAT4) => Box::new(*f as f32),
        (Value::Float(f), &Type::NUMERIC) => {
            Box::new(Decimal::from_f64(*f).ok_or_else(|| out_of_range(f, ty))?)
        }

        (Value::Decimal(s), &Type::NUMERIC) => {
            Box::new(Decimal::from_str(s).map_err(|_| out_of_range(s, ty))?)
        }
        (Value::Decimal(s), &Type::FLOAT8) => {
            Box::new(f64::from_str(s).map_err(|_| out_of_range(s, ty))?)
        }
        (Value::Decimal(s), &Type::INT8) => {
            Box::new(i64::from_str(s).map_err(|_| out_of_range(s, ty))?)
        }

        (Value::Uuid(u), &Type::UUID) => Box::new(*u),
        (Value::Bytes(b), &Type::BYTEA) => Box::new(b.clone()),
        (Value::Date(d), &Type::DATE) => Box::new(*d),
        (Value::Time(t), &Type::TIME) => Box::new(*t),

        (Value::Timestamp(ts), &Type::TIMESTAMP) => Box::new(*ts),
        (Value::Timestamp(ts), &Type::TIMESTAMPTZ) => Box::new(Utc.from_utc_datetime(ts)),
        (Value::TimestampTz(ts), &Type::TIMESTAMPTZ) => Box::new(*ts),
        (Value::TimestampTz(ts), &Type::TIMESTAMP) => Box::new(ts.naive_utc()),
        (Value::Date(d), &Type::TIMESTAMP) => Box::new(d.and_time(chrono::NaiveTime::MIN)),

        (Value::Json(j), &Type::JSON | &Type::JSONB) => Box::new(j.clone()),

        _ => return Err(incompatible(value, ty)),
    };
    Ok(param)
}

fn text_form(value: &Value) -> String {
    match value {
        Value::Text(s) | Value::Decimal(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Uuid(u) => u.to_string(),
        Value::Date(d) => d.to_string(),
        Value::Time(t) => t.to_string(),
        Value::Timestamp(ts) => ts.to_string(),
        Value::TimestampTz(ts) => ts.to_rfc3339(),
        Value::Json(j) => j.to_string(),
        other => other.to_sql_literal(),
    }
}

/// SQL NULL accepted for any parameter type.
#[derive(Debug)]
pub struct NullParam;

impl ToSql for NullParam {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_range_checked() {
        assert!(to_sql_param(&Value::Int(7), &Type::INT4).is_ok());
        let err = to_sql_param(&Value::Int(i64::MAX), &Type::INT4).err().unwrap();
        assert!(matches!(err, ParamError::OutOfRange { .. }));
    }

    #[test]
    fn test_incompatible_kind() {
        let err = to_sql_param(&Value::Bool(true), &Type::INT8).err().unwrap();
        assert_eq!(
            err.to_string(),
            "Cannot bind bool value to parameter of type int8"
        );
    }

    #[test]
    fn test_text_placeholder_accepts_any_scalar() {
        assert!(to_sql_param(&Value::Int(3), &Type::TEXT).is_ok());
        assert_eq!(text_form(&Value::Decimal("1.50".into())), "1.50");
    }

    #[test]
    fn test_null_binds_anywhere() {
        assert!(to_sql_param(&Value::Null, &Type::UUID).is_ok());
        assert!(NullParam::accepts(&Type::TIMESTAMPTZ));
    }
}
