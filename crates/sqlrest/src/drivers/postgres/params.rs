//! Conversion between [`SqlValue`] and PostgreSQL wire types.
//!
//! Statements are prepared first, so every parameter has a type inferred by
//! the server. Each value is converted to that type before binding; a value
//! that cannot be converted is a validation error, never a silent cast.

use std::error::Error as StdError;

use bytes::BytesMut;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use uuid::Uuid;

use crate::core::traits::FieldInfo;
use crate::core::value::{parse_timestamp, Row, SqlValue};
use crate::error::{RestError, Result};

/// A parameter ready to bind.
pub type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// Convert `params` to the types the server inferred for a statement.
pub fn bind_params(types: &[Type], params: &[SqlValue]) -> Result<Vec<BoxedParam>> {
    if types.len() != params.len() {
        return Err(RestError::Validation(format!(
            "Statement expects {} parameters, got {}",
            types.len(),
            params.len()
        )));
    }

    types
        .iter()
        .zip(params)
        .enumerate()
        .map(|(position, (ty, value))| bind_one(position, ty, value))
        .collect()
}

fn bind_one(position: usize, ty: &Type, value: &SqlValue) -> Result<BoxedParam> {
    let mismatch = || {
        RestError::Validation(format!(
            "Parameter ${} expects {}, got {} value '{}'",
            position + 1,
            ty.name(),
            value.type_name(),
            value
        ))
    };

    let null = value.is_null();

    let param: BoxedParam = match *ty {
        Type::BOOL => Box::new(if null { None } else { Some(as_bool(value).ok_or_else(mismatch)?) }),
        Type::INT2 => Box::new(if null {
            None
        } else {
            Some(as_i64(value).and_then(|v| i16::try_from(v).ok()).ok_or_else(mismatch)?)
        }),
        Type::INT4 => Box::new(if null {
            None
        } else {
            Some(as_i64(value).and_then(|v| i32::try_from(v).ok()).ok_or_else(mismatch)?)
        }),
        Type::INT8 => Box::new(if null { None } else { Some(as_i64(value).ok_or_else(mismatch)?) }),
        Type::FLOAT4 => Box::new(if null {
            None
        } else {
            Some(as_f64(value).ok_or_else(mismatch)? as f32)
        }),
        Type::FLOAT8 => Box::new(if null { None } else { Some(as_f64(value).ok_or_else(mismatch)?) }),
        Type::NUMERIC => Box::new(if null { None } else { Some(as_decimal(value).ok_or_else(mismatch)?) }),
        Type::UUID => Box::new(if null { None } else { Some(as_uuid(value).ok_or_else(mismatch)?) }),
        Type::DATE => Box::new(if null { None } else { Some(as_date(value).ok_or_else(mismatch)?) }),
        Type::TIME => Box::new(if null { None } else { Some(as_time(value).ok_or_else(mismatch)?) }),
        Type::TIMESTAMP => Box::new(if null {
            None
        } else {
            Some(as_timestamp(value).ok_or_else(mismatch)?)
        }),
        Type::TIMESTAMPTZ => Box::new(if null {
            None
        } else {
            Some(as_timestamptz(value).ok_or_else(mismatch)?)
        }),
        Type::JSON | Type::JSONB => Box::new(if null { None } else { Some(as_json(value)) }),
        Type::BYTEA => Box::new(if null { None } else { Some(as_bytes(value)) }),
        // text, varchar, bpchar, name, enums, citext, ...
        _ => Box::new(value.to_text().map(RawText)),
    };

    Ok(param)
}

fn as_bool(value: &SqlValue) -> Option<bool> {
    match value {
        SqlValue::Bool(b) => Some(*b),
        SqlValue::Int(0) => Some(false),
        SqlValue::Int(1) => Some(true),
        SqlValue::Text(s) => match s.to_lowercase().as_str() {
            "true" | "t" | "yes" | "on" | "1" => Some(true),
            "false" | "f" | "no" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_i64(value: &SqlValue) -> Option<i64> {
    match value {
        SqlValue::Int(i) => Some(*i),
        SqlValue::Float(f) if f.fract() == 0.0 => f.to_i64(),
        SqlValue::Decimal(d) if d.fract().is_zero() => d.to_i64(),
        SqlValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &SqlValue) -> Option<f64> {
    match value {
        SqlValue::Int(i) => Some(*i as f64),
        SqlValue::Float(f) => Some(*f),
        SqlValue::Decimal(d) => d.to_f64(),
        SqlValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_decimal(value: &SqlValue) -> Option<Decimal> {
    match value {
        SqlValue::Decimal(d) => Some(*d),
        SqlValue::Int(i) => Some(Decimal::from(*i)),
        SqlValue::Float(f) => Decimal::try_from(*f).ok(),
        SqlValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_uuid(value: &SqlValue) -> Option<Uuid> {
    match value {
        SqlValue::Uuid(u) => Some(*u),
        SqlValue::Text(s) => Uuid::parse_str(s.trim()).ok(),
        _ => None,
    }
}

fn as_date(value: &SqlValue) -> Option<NaiveDate> {
    match value {
        SqlValue::Date(d) => Some(*d),
        SqlValue::Timestamp(ts) => Some(ts.date()),
        SqlValue::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok(),
        _ => None,
    }
}

fn as_time(value: &SqlValue) -> Option<NaiveTime> {
    match value {
        SqlValue::Time(t) => Some(*t),
        SqlValue::Text(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f").ok(),
        _ => None,
    }
}

fn as_timestamp(value: &SqlValue) -> Option<NaiveDateTime> {
    match value {
        SqlValue::Timestamp(ts) => Some(*ts),
        SqlValue::TimestampTz(ts) => Some(ts.naive_utc()),
        SqlValue::Date(d) => d.and_hms_opt(0, 0, 0),
        SqlValue::Text(s) => parse_timestamp(s),
        _ => None,
    }
}

fn as_timestamptz(value: &SqlValue) -> Option<DateTime<FixedOffset>> {
    match value {
        SqlValue::TimestampTz(ts) => Some(*ts),
        // naive values are taken as UTC
        SqlValue::Timestamp(ts) => Some(ts.and_utc().fixed_offset()),
        SqlValue::Text(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .or_else(|| parse_timestamp(s).map(|ts| ts.and_utc().fixed_offset())),
        _ => None,
    }
}

fn as_json(value: &SqlValue) -> serde_json::Value {
    match value {
        SqlValue::Json(v) => v.clone(),
        SqlValue::Text(s) => {
            serde_json::from_str(s).unwrap_or_else(|_| serde_json::Value::String(s.clone()))
        }
        other => other.to_json(),
    }
}

fn as_bytes(value: &SqlValue) -> Vec<u8> {
    match value {
        SqlValue::Bytes(b) => b.clone(),
        SqlValue::Text(s) => s
            .strip_prefix("\\x")
            .and_then(|h| hex::decode(h).ok())
            .unwrap_or_else(|| s.as_bytes().to_vec()),
        other => other.to_string().into_bytes(),
    }
}

/// Text sent or received verbatim for types without a dedicated mapping.
///
/// The binary encoding of text-like types (and of enum labels) is the UTF-8
/// bytes themselves, so this accepts any type.
#[derive(Debug)]
struct RawText(String);

impl ToSql for RawText {
    fn to_sql(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        out.extend_from_slice(self.0.as_bytes());
        Ok(IsNull::No)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for RawText {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(RawText(String::from_utf8_lossy(raw).into_owned()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Column descriptors for a result set.
pub fn fields_of(columns: &[tokio_postgres::Column]) -> Vec<FieldInfo> {
    columns
        .iter()
        .map(|c| FieldInfo::new(c.name(), c.type_().name()))
        .collect()
}

/// Decode one result row.
pub fn decode_row(row: &tokio_postgres::Row) -> Result<Row> {
    let mut out = Row::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name(), decode_value(row, idx, column.type_())?);
    }
    Ok(out)
}

fn decode_value(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Result<SqlValue> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| SqlValue::Int(v.into())),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| SqlValue::Int(v.into())),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::Int),
        Type::OID => row
            .try_get::<_, Option<u32>>(idx)?
            .map(|v| SqlValue::Int(v.into())),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| SqlValue::Float(v.into())),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::Float),
        Type::NUMERIC => row.try_get::<_, Option<Decimal>>(idx)?.map(SqlValue::Decimal),
        Type::UUID => row.try_get::<_, Option<Uuid>>(idx)?.map(SqlValue::Uuid),
        Type::DATE => row.try_get::<_, Option<NaiveDate>>(idx)?.map(SqlValue::Date),
        Type::TIME => row.try_get::<_, Option<NaiveTime>>(idx)?.map(SqlValue::Time),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(SqlValue::Timestamp),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<FixedOffset>>>(idx)?
            .map(SqlValue::TimestampTz),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(SqlValue::Json),
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(SqlValue::Bytes),
        Type::INT4_ARRAY | Type::INT8_ARRAY => row
            .try_get::<_, Option<Vec<Option<i64>>>>(idx)
            .or_else(|_| {
                row.try_get::<_, Option<Vec<Option<i32>>>>(idx)
                    .map(|v| v.map(|items| items.into_iter().map(|i| i.map(i64::from)).collect()))
            })?
            .map(|items| SqlValue::Json(serde_json::json!(items))),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => row
            .try_get::<_, Option<Vec<Option<String>>>>(idx)?
            .map(|items| SqlValue::Json(serde_json::json!(items))),
        _ => row
            .try_get::<_, Option<RawText>>(idx)?
            .map(|t| SqlValue::Text(t.0)),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}
