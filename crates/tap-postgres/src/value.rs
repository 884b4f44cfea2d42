//! Typed decoding of result cells.
//!
//! The driver hands back binary-format cells; `decode_cell` turns one into
//! a [`PgValue`] keyed on the column's OID. Columns whose OID falls outside
//! the natively decoded set are expected to have been re-projected as
//! `::text` by the query planner and arrive here as plain strings.

use crate::connect::DateStyle;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::{FromSql, Kind, Type};
use tokio_postgres::Row;

/// A decoded runtime value, ready for conformance.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Numeric(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Time(NaiveTime),
    Interval(PgInterval),
    Json(serde_json::Value),
    Uuid(uuid::Uuid),
    Array(Vec<PgValue>),
}

/// An interval exactly as PostgreSQL stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgInterval {
    pub months: i32,
    pub days: i32,
    pub microseconds: i64,
}

impl<'a> FromSql<'a> for PgInterval {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        if raw.len() != 16 {
            return Err("invalid interval payload".into());
        }
        Ok(PgInterval {
            microseconds: i64::from_be_bytes(raw[0..8].try_into()?),
            days: i32::from_be_bytes(raw[8..12].try_into()?),
            months: i32::from_be_bytes(raw[12..16].try_into()?),
        })
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INTERVAL
    }
}

fn pg_epoch() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(2000, 1, 1)
}

/// A date rendered as its PostgreSQL text form, keeping `infinity` and
/// `-infinity` readable where chrono has no representation for them.
struct TextualDate(String);

impl<'a> FromSql<'a> for TextualDate {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        let days = postgres_protocol::types::date_from_sql(raw)?;
        let text = match days {
            i32::MAX => "infinity".to_string(),
            i32::MIN => "-infinity".to_string(),
            days => pg_epoch()
                .and_then(|epoch| epoch.checked_add_signed(Duration::days(days as i64)))
                .ok_or("date out of range")?
                .format("%Y-%m-%d")
                .to_string(),
        };
        Ok(TextualDate(text))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::DATE
    }
}

/// A timestamp or timestamptz rendered as its PostgreSQL text form.
struct TextualTimestamp(String);

impl<'a> FromSql<'a> for TextualTimestamp {
    fn from_sql(
        ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        let micros = postgres_protocol::types::timestamp_from_sql(raw)?;
        let text = match micros {
            i64::MAX => "infinity".to_string(),
            i64::MIN => "-infinity".to_string(),
            micros => {
                let stamp = pg_epoch()
                    .and_then(|epoch| epoch.and_hms_opt(0, 0, 0))
                    .and_then(|epoch| epoch.checked_add_signed(Duration::microseconds(micros)))
                    .ok_or("timestamp out of range")?;
                if *ty == Type::TIMESTAMPTZ {
                    format!("{}+00", stamp.format("%Y-%m-%d %H:%M:%S%.f"))
                } else {
                    stamp.format("%Y-%m-%d %H:%M:%S%.f").to_string()
                }
            }
        };
        Ok(TextualTimestamp(text))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::TIMESTAMP || *ty == Type::TIMESTAMPTZ
    }
}

/// Whether `decode_cell` understands the type without a server-side `::text`
/// cast. Arrays are native when their element is.
pub fn is_natively_decoded(ty: &Type) -> bool {
    match ty.kind() {
        Kind::Array(element) => scalar_native(element),
        _ => scalar_native(ty),
    }
}

fn scalar_native(ty: &Type) -> bool {
    [
        Type::BOOL,
        Type::INT2,
        Type::INT4,
        Type::INT8,
        Type::FLOAT4,
        Type::FLOAT8,
        Type::NUMERIC,
        Type::TEXT,
        Type::VARCHAR,
        Type::BPCHAR,
        Type::NAME,
        Type::BYTEA,
        Type::DATE,
        Type::TIMESTAMP,
        Type::TIMESTAMPTZ,
        Type::TIME,
        Type::INTERVAL,
        Type::JSON,
        Type::JSONB,
        Type::UUID,
        Type::BIT,
        Type::VARBIT,
    ]
    .contains(ty)
}

pub fn decode_cell(row: &Row, idx: usize, date_style: DateStyle) -> Result<PgValue> {
    let ty = row.columns()[idx].type_().clone();
    match ty.kind() {
        Kind::Array(element) => decode_array(row, idx, element.clone(), date_style),
        _ => decode_scalar(row, idx, &ty, date_style),
    }
}

fn decode_scalar(row: &Row, idx: usize, ty: &Type, date_style: DateStyle) -> Result<PgValue> {
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?.map(PgValue::Bool)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?
            .map(|v| PgValue::Int(v as i64))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?
            .map(|v| PgValue::Int(v as i64))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.map(PgValue::Int)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?
            .map(|v| PgValue::Float(v as f64))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.map(PgValue::Float)
    } else if *ty == Type::NUMERIC {
        row.try_get::<_, Option<Decimal>>(idx)?.map(PgValue::Numeric)
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(idx)?.map(PgValue::Bytes)
    } else if *ty == Type::DATE {
        match date_style {
            DateStyle::Native => row.try_get::<_, Option<NaiveDate>>(idx)?.map(PgValue::Date),
            DateStyle::Text => row
                .try_get::<_, Option<TextualDate>>(idx)?
                .map(|v| PgValue::Text(v.0)),
        }
    } else if *ty == Type::TIMESTAMP {
        match date_style {
            DateStyle::Native => row
                .try_get::<_, Option<NaiveDateTime>>(idx)?
                .map(PgValue::Timestamp),
            DateStyle::Text => row
                .try_get::<_, Option<TextualTimestamp>>(idx)?
                .map(|v| PgValue::Text(v.0)),
        }
    } else if *ty == Type::TIMESTAMPTZ {
        match date_style {
            DateStyle::Native => row
                .try_get::<_, Option<DateTime<Utc>>>(idx)?
                .map(PgValue::TimestampTz),
            DateStyle::Text => row
                .try_get::<_, Option<TextualTimestamp>>(idx)?
                .map(|v| PgValue::Text(v.0)),
        }
    } else if *ty == Type::TIME {
        row.try_get::<_, Option<NaiveTime>>(idx)?.map(PgValue::Time)
    } else if *ty == Type::INTERVAL {
        row.try_get::<_, Option<PgInterval>>(idx)?
            .map(PgValue::Interval)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(idx)?
            .map(PgValue::Json)
    } else if *ty == Type::UUID {
        row.try_get::<_, Option<uuid::Uuid>>(idx)?.map(PgValue::Uuid)
    } else if *ty == Type::BIT || *ty == Type::VARBIT {
        row.try_get::<_, Option<bit_vec::BitVec>>(idx)?
            .map(|bits| PgValue::Bytes(bits.to_bytes()))
    } else {
        // Everything else was projected as ::text.
        row.try_get::<_, Option<String>>(idx)?.map(PgValue::Text)
    };
    Ok(value.unwrap_or(PgValue::Null))
}

fn decode_array(row: &Row, idx: usize, element: Type, date_style: DateStyle) -> Result<PgValue> {
    fn items<T, F>(values: Option<Vec<Option<T>>>, convert: F) -> PgValue
    where
        F: Fn(T) -> PgValue,
    {
        match values {
            None => PgValue::Null,
            Some(values) => PgValue::Array(
                values
                    .into_iter()
                    .map(|v| v.map(&convert).unwrap_or(PgValue::Null))
                    .collect(),
            ),
        }
    }

    let value = if element == Type::BOOL {
        items(row.try_get(idx)?, PgValue::Bool)
    } else if element == Type::INT2 {
        items(row.try_get::<_, Option<Vec<Option<i16>>>>(idx)?, |v| {
            PgValue::Int(v as i64)
        })
    } else if element == Type::INT4 {
        items(row.try_get::<_, Option<Vec<Option<i32>>>>(idx)?, |v| {
            PgValue::Int(v as i64)
        })
    } else if element == Type::INT8 {
        items(row.try_get(idx)?, PgValue::Int)
    } else if element == Type::FLOAT4 {
        items(row.try_get::<_, Option<Vec<Option<f32>>>>(idx)?, |v| {
            PgValue::Float(v as f64)
        })
    } else if element == Type::FLOAT8 {
        items(row.try_get(idx)?, PgValue::Float)
    } else if element == Type::NUMERIC {
        items(row.try_get::<_, Option<Vec<Option<Decimal>>>>(idx)?, PgValue::Numeric)
    } else if element == Type::BYTEA {
        items(row.try_get::<_, Option<Vec<Option<Vec<u8>>>>>(idx)?, PgValue::Bytes)
    } else if element == Type::DATE {
        match date_style {
            DateStyle::Native => items(row.try_get(idx)?, PgValue::Date),
            DateStyle::Text => items(
                row.try_get::<_, Option<Vec<Option<TextualDate>>>>(idx)?,
                |v| PgValue::Text(v.0),
            ),
        }
    } else if element == Type::TIMESTAMP {
        match date_style {
            DateStyle::Native => items(row.try_get(idx)?, PgValue::Timestamp),
            DateStyle::Text => items(
                row.try_get::<_, Option<Vec<Option<TextualTimestamp>>>>(idx)?,
                |v| PgValue::Text(v.0),
            ),
        }
    } else if element == Type::TIMESTAMPTZ {
        match date_style {
            DateStyle::Native => items(row.try_get(idx)?, PgValue::TimestampTz),
            DateStyle::Text => items(
                row.try_get::<_, Option<Vec<Option<TextualTimestamp>>>>(idx)?,
                |v| PgValue::Text(v.0),
            ),
        }
    } else if element == Type::TIME {
        items(row.try_get(idx)?, PgValue::Time)
    } else if element == Type::INTERVAL {
        items(
            row.try_get::<_, Option<Vec<Option<PgInterval>>>>(idx)?,
            PgValue::Interval,
        )
    } else if element == Type::JSON || element == Type::JSONB {
        items(
            row.try_get::<_, Option<Vec<Option<serde_json::Value>>>>(idx)?,
            PgValue::Json,
        )
    } else if element == Type::UUID {
        items(row.try_get::<_, Option<Vec<Option<uuid::Uuid>>>>(idx)?, PgValue::Uuid)
    } else if element == Type::BIT || element == Type::VARBIT {
        items(
            row.try_get::<_, Option<Vec<Option<bit_vec::BitVec>>>>(idx)?,
            |bits| PgValue::Bytes(bits.to_bytes()),
        )
    } else {
        items(row.try_get::<_, Option<Vec<Option<String>>>>(idx)?, PgValue::Text)
    };
    Ok(value)
}

/// Parse a PostgreSQL `X/Y` LSN into its 64-bit byte offset.
pub fn parse_lsn(text: &str) -> Result<u64> {
    let (high, low) = text
        .split_once('/')
        .ok_or_else(|| Error::InvalidLsn(text.to_string()))?;
    let high = u64::from_str_radix(high, 16).map_err(|_| Error::InvalidLsn(text.to_string()))?;
    let low = u64::from_str_radix(low, 16).map_err(|_| Error::InvalidLsn(text.to_string()))?;
    Ok((high << 32) | low)
}

pub fn format_lsn(lsn: u64) -> String {
    format!("{:X}/{:X}", lsn >> 32, lsn & 0xFFFF_FFFF)
}
