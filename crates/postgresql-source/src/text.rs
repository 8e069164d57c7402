//! Text forms of PostgreSQL values that have no typed representation.
//!
//! Results arrive in the binary wire format. Each decoder here reads that
//! format and renders the value the way PostgreSQL's own output function
//! would print it.

use chrono::NaiveTime;
use postgres_types::{FromSql, Type};
use std::error::Error;
use std::net::{Ipv4Addr, Ipv6Addr};
use sync_core::Value;

type DecodeResult<T> = Result<T, Box<dyn Error + Sync + Send>>;

struct Reader<'a> {
    raw: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(raw: &'a [u8]) -> Self {
        Self { raw }
    }

    fn take<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        if self.raw.len() < N {
            return Err("value is truncated".into());
        }
        let (head, rest) = self.raw.split_at(N);
        self.raw = rest;
        Ok(head.try_into()?)
    }

    fn u8(&mut self) -> DecodeResult<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn i16(&mut self) -> DecodeResult<i16> {
        Ok(i16::from_be_bytes(self.take()?))
    }

    fn u16(&mut self) -> DecodeResult<u16> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    fn i32(&mut self) -> DecodeResult<i32> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    fn i64(&mut self) -> DecodeResult<i64> {
        Ok(i64::from_be_bytes(self.take()?))
    }

    fn rest(self) -> &'a [u8] {
        self.raw
    }
}

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Any NUMERIC, including NaN, the infinities and values wider than
/// `rust_decimal` can hold.
pub(crate) struct NumericText(pub String);

impl<'a> FromSql<'a> for NumericText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> DecodeResult<Self> {
        let mut r = Reader::new(raw);
        let ndigits = r.i16()?;
        let weight = r.i16()?;
        let sign = r.u16()?;
        let dscale = r.u16()?;
        let digits = (0..ndigits.max(0))
            .map(|_| r.i16())
            .collect::<DecodeResult<Vec<i16>>>()?;
        Ok(NumericText(format_numeric(&digits, weight, sign, dscale)?))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Render base-10000 digit groups. `weight` is the power of 10000 of the
/// first group and `dscale` the number of decimal places to print.
fn format_numeric(digits: &[i16], weight: i16, sign: u16, dscale: u16) -> DecodeResult<String> {
    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        NUMERIC_POS | NUMERIC_NEG => {}
        other => return Err(format!("invalid numeric sign {other:#06x}").into()),
    }
    if digits.iter().any(|d| !(0..10_000).contains(d)) {
        return Err("invalid numeric digit".into());
    }

    let group = |i: i32| -> i16 {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG && !digits.is_empty() {
        out.push('-');
    }
    let weight = i32::from(weight);
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&group(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", group(i)));
        }
    }

    let scale = usize::from(dscale);
    if scale > 0 {
        let mut fraction = String::with_capacity(scale + 4);
        let mut i = weight + 1;
        while fraction.len() < scale {
            fraction.push_str(&format!("{:04}", group(i)));
            i += 1;
        }
        fraction.truncate(scale);
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

/// INTERVAL as an ISO-8601 duration such as `P1Y2M4DT1H2M3.5S`.
pub(crate) struct IntervalText(pub String);

impl<'a> FromSql<'a> for IntervalText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> DecodeResult<Self> {
        let mut r = Reader::new(raw);
        let micros = r.i64()?;
        let days = r.i32()?;
        let months = r.i32()?;
        Ok(IntervalText(format_interval(micros, days, months)))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INTERVAL
    }
}

fn format_interval(micros: i64, days: i32, months: i32) -> String {
    let mut out = String::from("P");
    let (years, months) = (months / 12, months % 12);
    if years != 0 {
        out.push_str(&format!("{years}Y"));
    }
    if months != 0 {
        out.push_str(&format!("{months}M"));
    }
    if days != 0 {
        out.push_str(&format!("{days}D"));
    }

    if micros != 0 {
        out.push('T');
        let hours = micros / 3_600_000_000;
        let minutes = (micros % 3_600_000_000) / 60_000_000;
        let rest = micros % 60_000_000;
        if hours != 0 {
            out.push_str(&format!("{hours}H"));
        }
        if minutes != 0 {
            out.push_str(&format!("{minutes}M"));
        }
        if rest != 0 {
            let sign = if rest < 0 { "-" } else { "" };
            let rest = rest.unsigned_abs();
            let (secs, frac) = (rest / 1_000_000, rest % 1_000_000);
            if frac == 0 {
                out.push_str(&format!("{sign}{secs}S"));
            } else {
                let frac = format!("{frac:06}");
                out.push_str(&format!("{sign}{secs}.{}S", frac.trim_end_matches('0')));
            }
        }
    }

    if out == "P" {
        out.push_str("T0S");
    }
    out
}

const PGSQL_AF_INET: u8 = 2;
const PGSQL_AF_INET6: u8 = 3;

/// INET and CIDR in PostgreSQL's address/prefix notation.
pub(crate) struct InetText(pub String);

impl<'a> FromSql<'a> for InetText {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> DecodeResult<Self> {
        let mut r = Reader::new(raw);
        let family = r.u8()?;
        let bits = r.u8()?;
        let is_cidr = r.u8()? != 0 || *ty == Type::CIDR;
        let len = usize::from(r.u8()?);
        let address = r.rest();
        if address.len() != len {
            return Err("inet address length does not match its header".into());
        }

        let (text, max_bits) = match (family, address.len()) {
            (PGSQL_AF_INET, 4) => {
                let octets: [u8; 4] = address.try_into()?;
                (Ipv4Addr::from(octets).to_string(), 32)
            }
            (PGSQL_AF_INET6, 16) => {
                let octets: [u8; 16] = address.try_into()?;
                (Ipv6Addr::from(octets).to_string(), 128)
            }
            _ => return Err(format!("invalid inet family {family}").into()),
        };

        if is_cidr || bits != max_bits {
            Ok(InetText(format!("{text}/{bits}")))
        } else {
            Ok(InetText(text))
        }
    }

    fn accepts(ty: &Type) -> bool {
        matches!(*ty, Type::INET | Type::CIDR)
    }
}

/// TIMETZ as `HH:MM:SS[.f]+hh:mm`.
pub(crate) struct TimeTzText(pub String);

impl<'a> FromSql<'a> for TimeTzText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> DecodeResult<Self> {
        let mut r = Reader::new(raw);
        let micros = r.i64()?;
        // seconds west of UTC
        let zone = r.i32()?;

        let secs = u32::try_from(micros / 1_000_000)?;
        let nanos = u32::try_from(micros % 1_000_000)? * 1_000;
        let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
            .ok_or("time of day is out of range")?;

        let east = -i64::from(zone);
        let sign = if east < 0 { '-' } else { '+' };
        let east = east.unsigned_abs();
        Ok(TimeTzText(format!(
            "{time}{sign}{:02}:{:02}",
            east / 3600,
            (east % 3600) / 60
        )))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::TIMETZ
    }
}

/// Wire bytes of a type with no dedicated decoder.
pub(crate) struct RawValue(Vec<u8>);

impl RawValue {
    /// Text when the bytes are UTF-8, bytes otherwise.
    pub(crate) fn into_value(self) -> Value {
        match String::from_utf8(self.0) {
            Ok(text) => Value::Text(text),
            Err(e) => Value::Bytes(e.into_bytes()),
        }
    }
}

impl<'a> FromSql<'a> for RawValue {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> DecodeResult<Self> {
        Ok(RawValue(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}
