//! Parameter binding and row decoding for SQL Server.
//!
//! Compiled T-SQL carries 0-based `@paramN` placeholders. Tiberius numbers
//! its parameters `@P1..`, so statements are rewritten before execution.

use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::{ColumnData, ColumnType, FromSql, Query};

use crate::core::traits::FieldInfo;
use crate::core::value::{Row, SqlValue};
use crate::error::{RestError, Result};

use super::dialect::PARAM_PREFIX;

/// Rewrite `@paramN` placeholders to tiberius' `@P{N+1}`.
///
/// String literals, bracketed and double-quoted identifiers are copied
/// through untouched. Returns the rewritten SQL and the highest parameter
/// index referenced, if any.
pub fn rewrite_placeholders(sql: &str) -> (String, Option<usize>) {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut highest: Option<usize> = None;
    let mut i = 0;
    let mut copied = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => i = skip_quoted(bytes, i, b'\''),
            b'"' => i = skip_quoted(bytes, i, b'"'),
            b'[' => i = skip_quoted(bytes, i, b']'),
            b'@' if sql[i..].starts_with(PARAM_PREFIX) && !preceded_by_at(bytes, i) => {
                let digits_start = i + PARAM_PREFIX.len();
                let digits_end = bytes[digits_start..]
                    .iter()
                    .position(|b| !b.is_ascii_digit())
                    .map_or(bytes.len(), |p| digits_start + p);
                let ends_cleanly = bytes
                    .get(digits_end)
                    .map_or(true, |b| !(b.is_ascii_alphanumeric() || *b == b'_'));

                match sql[digits_start..digits_end].parse::<usize>() {
                    Ok(index) if ends_cleanly => {
                        out.push_str(&sql[copied..i]);
                        out.push_str(&format!("@P{}", index + 1));
                        highest = Some(highest.map_or(index, |h| h.max(index)));
                        copied = digits_end;
                        i = digits_end;
                    }
                    _ => i = digits_end.max(i + 1),
                }
            }
            _ => i += 1,
        }
    }

    out.push_str(&sql[copied..]);
    (out, highest)
}

fn preceded_by_at(bytes: &[u8], i: usize) -> bool {
    i > 0 && bytes[i - 1] == b'@'
}

/// Index just past the closing delimiter; a doubled delimiter is an escape.
fn skip_quoted(bytes: &[u8], start: usize, close: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == close {
            if bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Build a tiberius query with every value bound in order.
pub fn build_query<'a>(sql: &str, params: &[SqlValue]) -> Result<Query<'a>> {
    let (rewritten, highest) = rewrite_placeholders(sql);
    if let Some(index) = highest {
        if index >= params.len() {
            return Err(RestError::Validation(format!(
                "Statement references {}{} but only {} parameters were supplied",
                PARAM_PREFIX,
                index,
                params.len()
            )));
        }
    }

    let mut query = Query::new(rewritten);
    for value in params {
        bind_value(&mut query, value);
    }
    Ok(query)
}

fn bind_value(query: &mut Query<'_>, value: &SqlValue) {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Decimal(d) => query.bind(*d),
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Bytes(b) => query.bind(b.clone()),
        SqlValue::Uuid(u) => query.bind(*u),
        SqlValue::Date(d) => query.bind(*d),
        SqlValue::Time(t) => query.bind(*t),
        SqlValue::Timestamp(ts) => query.bind(*ts),
        SqlValue::TimestampTz(ts) => query.bind(*ts),
        SqlValue::Json(json) => query.bind(json.to_string()),
    }
}

/// Column descriptors for a tiberius result set.
pub fn fields_of(columns: &[tiberius::Column]) -> Vec<FieldInfo> {
    columns
        .iter()
        .map(|c| FieldInfo::new(c.name(), type_name(c.column_type())))
        .collect()
}

fn type_name(column_type: ColumnType) -> String {
    let name = match column_type {
        ColumnType::Bit | ColumnType::Bitn => "bit",
        ColumnType::Int1 => "tinyint",
        ColumnType::Int2 => "smallint",
        ColumnType::Int4 => "int",
        ColumnType::Int8 => "bigint",
        ColumnType::Intn => "int",
        ColumnType::Float4 => "real",
        ColumnType::Float8 | ColumnType::Floatn => "float",
        ColumnType::Money | ColumnType::Money4 => "money",
        ColumnType::Decimaln => "decimal",
        ColumnType::Numericn => "numeric",
        ColumnType::Guid => "uniqueidentifier",
        ColumnType::Daten => "date",
        ColumnType::Timen => "time",
        ColumnType::Datetime | ColumnType::Datetimen => "datetime",
        ColumnType::Datetime4 => "smalldatetime",
        ColumnType::Datetime2 => "datetime2",
        ColumnType::DatetimeOffsetn => "datetimeoffset",
        ColumnType::BigVarChar => "varchar",
        ColumnType::BigChar => "char",
        ColumnType::NVarchar => "nvarchar",
        ColumnType::NChar => "nchar",
        ColumnType::Text => "text",
        ColumnType::NText => "ntext",
        ColumnType::Xml => "xml",
        ColumnType::BigVarBin => "varbinary",
        ColumnType::BigBinary => "binary",
        ColumnType::Image => "image",
        other => return format!("{:?}", other).to_lowercase(),
    };
    name.to_string()
}

/// Decode one tiberius row into a [`Row`] keyed by column name.
pub fn decode_row(row: tiberius::Row) -> Result<Row> {
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let mut decoded = Row::with_capacity(names.len());
    for (name, data) in names.into_iter().zip(row) {
        decoded.insert(name, decode_value(&data)?);
    }
    Ok(decoded)
}

fn decode_value(data: &ColumnData<'static>) -> Result<SqlValue> {
    let value = match data {
        ColumnData::U8(v) => v.map(|v| SqlValue::Int(i64::from(v))),
        ColumnData::I16(v) => v.map(|v| SqlValue::Int(i64::from(v))),
        ColumnData::I32(v) => v.map(|v| SqlValue::Int(i64::from(v))),
        ColumnData::I64(v) => v.map(SqlValue::Int),
        ColumnData::F32(v) => v.map(|v| SqlValue::Float(f64::from(v))),
        ColumnData::F64(v) => v.map(SqlValue::Float),
        ColumnData::Bit(v) => v.map(SqlValue::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| SqlValue::Text(s.to_string())),
        ColumnData::Guid(v) => v.map(SqlValue::Uuid),
        ColumnData::Binary(v) => v.as_ref().map(|b| SqlValue::Bytes(b.to_vec())),
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|x| SqlValue::Text(Cow::clone(x).into_owned().into_string())),
        ColumnData::Numeric(_) => Decimal::from_sql(data)?.map(SqlValue::Decimal),
        ColumnData::Date(_) => NaiveDate::from_sql(data)?.map(SqlValue::Date),
        ColumnData::Time(_) => NaiveTime::from_sql(data)?.map(SqlValue::Time),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(data)?.map(SqlValue::Timestamp)
        }
        ColumnData::DateTimeOffset(_) => {
            DateTime::<FixedOffset>::from_sql(data)?.map(SqlValue::TimestampTz)
        }
    };
    Ok(value.unwrap_or(SqlValue::Null))
}
