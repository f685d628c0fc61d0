use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::types::{PgInterval, PgTimeTz};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

use sqlscore_core::{ExecutionError, ExecutionErrorKind, Row, Value};

/// Decode every column of a row by its PostgreSQL type name.
pub fn decode_row(row: &PgRow) -> Result<Row, ExecutionError> {
    (0..row.columns().len())
        .map(|idx| decode_column(row, idx))
        .collect()
}

fn decode_error(column: &str, err: sqlx::Error) -> ExecutionError {
    ExecutionError::new(
        ExecutionErrorKind::Other,
        format!("failed to decode column '{column}': {err}"),
    )
}

fn decode_column(row: &PgRow, idx: usize) -> Result<Value, ExecutionError> {
    let column = &row.columns()[idx];
    let name = column.name();
    let type_name = column.type_info().name().to_ascii_uppercase();

    let raw = row.try_get_raw(idx).map_err(|err| decode_error(name, err))?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    macro_rules! get {
        ($ty:ty) => {
            row.try_get::<$ty, _>(idx).map_err(|err| decode_error(name, err))?
        };
    }

    macro_rules! array {
        ($ty:ty, $convert:expr) => {
            Value::Array(
                get!(Vec<Option<$ty>>)
                    .into_iter()
                    .map(|item| item.map_or(Value::Null, $convert))
                    .collect(),
            )
        };
    }

    let value = match type_name.as_str() {
        "BOOL" => Value::Bool(get!(bool)),
        "INT2" => Value::Int(i64::from(get!(i16))),
        "INT4" => Value::Int(i64::from(get!(i32))),
        "INT8" => Value::Int(get!(i64)),
        "FLOAT4" => Value::Float(f64::from(get!(f32))),
        "FLOAT8" => Value::Float(get!(f64)),
        "NUMERIC" => Value::Numeric(get!(Decimal).to_string()),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" | "CITEXT" => Value::Text(get!(String)),
        "DATE" => Value::Date(get!(NaiveDate).to_string()),
        "TIME" => Value::Time(get!(NaiveTime).to_string()),
        "TIMETZ" => {
            let time = get!(PgTimeTz<NaiveTime, FixedOffset>);
            Value::Time(format!("{}{}", time.time, time.offset))
        }
        "TIMESTAMP" => Value::Timestamp(get!(NaiveDateTime).to_string()),
        "TIMESTAMPTZ" => Value::TimestampTz(get!(DateTime<Utc>).to_rfc3339()),
        "INTERVAL" => {
            let interval = get!(PgInterval);
            Value::Interval {
                months: interval.months,
                days: interval.days,
                microseconds: interval.microseconds,
            }
        }
        "UUID" => Value::Uuid(get!(uuid::Uuid).to_string()),
        "BOOL[]" => array!(bool, Value::Bool),
        "INT2[]" => array!(i16, |item: i16| Value::Int(i64::from(item))),
        "INT4[]" => array!(i32, |item: i32| Value::Int(i64::from(item))),
        "INT8[]" => array!(i64, Value::Int),
        "FLOAT4[]" => array!(f32, |item: f32| Value::Float(f64::from(item))),
        "FLOAT8[]" => array!(f64, Value::Float),
        "NUMERIC[]" => array!(Decimal, |item: Decimal| Value::Numeric(item.to_string())),
        "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => array!(String, Value::Text),
        "DATE[]" => array!(NaiveDate, |item: NaiveDate| Value::Date(item.to_string())),
        "TIMESTAMP[]" => array!(NaiveDateTime, |item: NaiveDateTime| {
            Value::Timestamp(item.to_string())
        }),
        "TIMESTAMPTZ[]" => array!(DateTime<Utc>, |item: DateTime<Utc>| {
            Value::TimestampTz(item.to_rfc3339())
        }),
        "UUID[]" => array!(uuid::Uuid, |item: uuid::Uuid| Value::Uuid(item.to_string())),
        other => undecoded(row, idx).ok_or_else(|| {
            ExecutionError::new(
                ExecutionErrorKind::Other,
                format!("cannot decode column '{name}' of type {other}"),
            )
        })?,
    };
    Ok(value)
}

/// Types without a typed decoder: UTF-8 payloads (enums, json) as text,
/// anything else as the hex of its wire bytes.
fn undecoded(row: &PgRow, idx: usize) -> Option<Value> {
    if let Ok(text) = row.try_get_unchecked::<String, _>(idx) {
        return Some(Value::Other(text));
    }
    row.try_get_unchecked::<Vec<u8>, _>(idx)
        .ok()
        .map(|bytes| Value::Other(format!("\\x{}", hex::encode(bytes))))
}
