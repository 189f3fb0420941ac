//! Conversion of row results to a declared output type.

use crate::expression::ops::RowError;
use crate::types::{
    date_to_timestamp, parse_date, parse_timestamp, timestamp_to_date, DataType, Value,
};

fn coercion_error(value: &Value, target: DataType) -> RowError {
    let shown = match value {
        Value::String(s) => format!("'{s}'"),
        other => format!("{} {}", other.data_type().map_or("NULL", |t| t.name()), other),
    };
    RowError::Coercion {
        value: shown,
        target,
    }
}

/// Converts `value` to `target`. Null converts to null for every target.
pub(crate) fn coerce(value: Value, target: DataType) -> Result<Value, RowError> {
    if value.is_null() || value.data_type() == Some(target) {
        return Ok(value);
    }
    let converted = match (target, &value) {
        (DataType::Int64, Value::Float64(f)) => float_to_int(*f),
        (DataType::Int64, Value::Bool(b)) => Some(Value::Int64(i64::from(*b))),
        (DataType::Int64, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::Int64),
        (DataType::Int64, Value::Date(d)) => Some(Value::Int64(i64::from(*d))),
        (DataType::Int64, Value::Timestamp(t)) => Some(Value::Int64(*t)),

        (DataType::Float64, Value::Int64(i)) => Some(Value::Float64(*i as f64)),
        (DataType::Float64, Value::Bool(b)) => Some(Value::Float64(if *b { 1.0 } else { 0.0 })),
        (DataType::Float64, Value::String(s)) => s.trim().parse::<f64>().ok().map(Value::Float64),
        (DataType::Float64, Value::Date(d)) => Some(Value::Float64(f64::from(*d))),
        (DataType::Float64, Value::Timestamp(t)) => Some(Value::Float64(*t as f64)),

        (DataType::String, v) => Some(Value::String(v.to_text())),

        (DataType::Bool, Value::Int64(i)) => Some(Value::Bool(*i != 0)),
        (DataType::Bool, Value::Float64(f)) => Some(Value::Bool(*f != 0.0)),
        (DataType::Bool, Value::String(s)) => parse_bool(s).map(Value::Bool),

        (DataType::Date, Value::Timestamp(t)) => timestamp_to_date(*t).map(Value::Date),
        (DataType::Date, Value::Int64(i)) => i32::try_from(*i).ok().map(Value::Date),
        (DataType::Date, Value::String(s)) => parse_date(s)
            .or_else(|| parse_timestamp(s).and_then(timestamp_to_date))
            .map(Value::Date),

        (DataType::Timestamp, Value::Date(d)) => Some(Value::Timestamp(date_to_timestamp(*d))),
        (DataType::Timestamp, Value::Int64(i)) => Some(Value::Timestamp(*i)),
        (DataType::Timestamp, Value::String(s)) => parse_timestamp(s).map(Value::Timestamp),

        _ => None,
    };
    converted.ok_or_else(|| coercion_error(&value, target))
}

/// Truncates toward zero when the float is finite and in range.
fn float_to_int(f: f64) -> Option<Value> {
    let truncated = f.trunc();
    if truncated.is_finite() && truncated >= i64::MIN as f64 && truncated < i64::MAX as f64 {
        Some(Value::Int64(truncated as i64))
    } else {
        None
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}
