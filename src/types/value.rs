//! Value and `DataType` definitions for colcalc.

use std::cmp::Ordering;
use std::fmt;

use arrow::array::{
    Array, BooleanArray, Date32Array, Date64Array, Float16Array, Float32Array,
    Float64Array, Int16Array, Int32Array, Int64Array, Int8Array, LargeStringArray, StringArray,
    TimestampMicrosecondArray, TimestampMillisecondArray, TimestampNanosecondArray,
    TimestampSecondArray, UInt16Array, UInt32Array, UInt64Array, UInt8Array,
};
use arrow::datatypes::{DataType as ArrowDataType, TimeUnit};
use chrono::{DateTime, Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Days between 0001-01-01 (CE day 1) and the Unix epoch.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

const MICROS_PER_DAY: i64 = 86_400_000_000;

/// Semantic column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    String,
    /// Date (stored as days since epoch).
    Date,
    /// Timestamp (stored as microseconds since epoch).
    Timestamp,
}

impl DataType {
    /// Returns the canonical upper-case name of the type.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Int64 => "INT64",
            DataType::Float64 => "FLOAT64",
            DataType::Bool => "BOOL",
            DataType::String => "STRING",
            DataType::Date => "DATE",
            DataType::Timestamp => "TIMESTAMP",
        }
    }

    /// Converts to an Arrow data type.
    #[must_use]
    pub fn to_arrow(&self) -> ArrowDataType {
        match self {
            DataType::Int64 => ArrowDataType::Int64,
            DataType::Float64 => ArrowDataType::Float64,
            DataType::Bool => ArrowDataType::Boolean,
            DataType::String => ArrowDataType::Utf8,
            DataType::Date => ArrowDataType::Date32,
            DataType::Timestamp => ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
        }
    }

    /// Converts from an Arrow data type, widening integer and float widths.
    /// `UInt64` maps to `Int64`; [`value_at`] refuses values that do not fit.
    ///
    /// Returns None for unsupported Arrow types.
    #[must_use]
    pub fn from_arrow(arrow_type: &ArrowDataType) -> Option<Self> {
        match arrow_type {
            ArrowDataType::Int8
            | ArrowDataType::Int16
            | ArrowDataType::Int32
            | ArrowDataType::Int64
            | ArrowDataType::UInt8
            | ArrowDataType::UInt16
            | ArrowDataType::UInt32
            | ArrowDataType::UInt64 => Some(DataType::Int64),
            ArrowDataType::Float16 | ArrowDataType::Float32 | ArrowDataType::Float64 => {
                Some(DataType::Float64)
            }
            ArrowDataType::Boolean => Some(DataType::Bool),
            ArrowDataType::Utf8 | ArrowDataType::LargeUtf8 => Some(DataType::String),
            ArrowDataType::Date32 | ArrowDataType::Date64 => Some(DataType::Date),
            ArrowDataType::Timestamp(_, _) => Some(DataType::Timestamp),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runtime scalar value for one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// 64-bit signed integer value.
    Int64(i64),
    /// 64-bit floating point value.
    Float64(f64),
    /// Boolean value.
    Bool(bool),
    /// String value.
    String(String),
    /// Date value (days since Unix epoch).
    Date(i32),
    /// Timestamp value (microseconds since Unix epoch).
    Timestamp(i64),
    /// Null value.
    Null,
}

// Manual Hash implementation because f64 doesn't implement Hash
impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Int64(v) | Value::Timestamp(v) => v.hash(state),
            Value::Float64(v) => v.to_bits().hash(state),
            Value::Bool(v) => v.hash(state),
            Value::String(v) => v.hash(state),
            Value::Date(v) => v.hash(state),
            Value::Null => {}
        }
    }
}

// Manual Eq implementation because f64 doesn't implement Eq
impl Eq for Value {}

impl Value {
    /// Returns true if this value is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the data type of this value, or None for Null.
    #[must_use]
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Int64(_) => Some(DataType::Int64),
            Value::Float64(_) => Some(DataType::Float64),
            Value::Bool(_) => Some(DataType::Bool),
            Value::String(_) => Some(DataType::String),
            Value::Date(_) => Some(DataType::Date),
            Value::Timestamp(_) => Some(DataType::Timestamp),
            Value::Null => None,
        }
    }

    /// Attempts to extract an i64 value.
    #[must_use]
    pub fn as_int64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Attempts to extract an f64 value.
    #[must_use]
    pub fn as_float64(&self) -> Option<f64> {
        match self {
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the value as f64 if it is an integer or float.
    #[must_use]
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(i) => Some(*i as f64),
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    /// Attempts to extract a bool value.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Attempts to extract a string reference.
    #[must_use]
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Compares two values using SQL null semantics.
    ///
    /// Integers and floats compare numerically. Returns None if either value
    /// is null or the types are not comparable.
    #[must_use]
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int64(a), Value::Int64(b)) | (Value::Timestamp(a), Value::Timestamp(b)) => {
                Some(a.cmp(b))
            }
            (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b),
            (Value::Int64(a), Value::Float64(b)) => (*a as f64).partial_cmp(b),
            (Value::Float64(a), Value::Int64(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            // Null or type mismatch
            _ => None,
        }
    }

    /// Canonical value-to-text conversion.
    ///
    /// Null renders as the empty string.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Value::Int64(v) => v.to_string(),
            Value::Float64(v) => v.to_string(),
            Value::Bool(v) => v.to_string(),
            Value::String(v) => v.clone(),
            Value::Date(days) => format_date(*days),
            Value::Timestamp(micros) => format_timestamp(*micros),
            Value::Null => String::new(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Renders days since the Unix epoch as `YYYY-MM-DD`.
#[must_use]
pub fn format_date(days: i32) -> String {
    days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .map_or_else(|| days.to_string(), |d| d.format("%Y-%m-%d").to_string())
}

/// Renders microseconds since the Unix epoch as `YYYY-MM-DD HH:MM:SS[.ffffff]`.
#[must_use]
pub fn format_timestamp(micros: i64) -> String {
    DateTime::from_timestamp_micros(micros).map_or_else(
        || micros.to_string(),
        |ts| ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string(),
    )
}

/// Parses `YYYY-MM-DD` into days since the Unix epoch.
#[must_use]
pub fn parse_date(text: &str) -> Option<i32> {
    let date = NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()?;
    Some(date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
}

/// Parses an RFC 3339 timestamp or `YYYY-MM-DD[ HH:MM:SS[.f]]` into microseconds.
#[must_use]
pub fn parse_timestamp(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.timestamp_micros());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = chrono::NaiveDateTime::parse_from_str(text, format) {
            return Some(ts.and_utc().timestamp_micros());
        }
    }
    parse_date(text).map(|days| i64::from(days) * MICROS_PER_DAY)
}

/// Converts days since epoch to microseconds since epoch.
#[must_use]
pub fn date_to_timestamp(days: i32) -> i64 {
    i64::from(days) * MICROS_PER_DAY
}

/// Converts microseconds since epoch to the containing day.
#[must_use]
pub fn timestamp_to_date(micros: i64) -> Option<i32> {
    i32::try_from(micros.div_euclid(MICROS_PER_DAY)).ok()
}

/// Extracts the value at `row`, widening to the evaluator's scalar types.
///
/// Nulls become [`Value::Null`]. Returns None when the array's type has no
/// scalar representation, or when the value does not fit the column's
/// semantic type (a `UInt64` above `i64::MAX`).
#[must_use]
pub fn value_at(array: &dyn Array, row: usize) -> Option<Value> {
    if matches!(array.data_type(), ArrowDataType::Null) {
        return Some(Value::Null);
    }
    DataType::from_arrow(array.data_type())?;
    if array.is_null(row) {
        return Some(Value::Null);
    }

    macro_rules! int_at {
        ($ty:ty) => {
            Value::Int64(i64::from(
                array.as_any().downcast_ref::<$ty>()?.value(row),
            ))
        };
    }

    let value = match array.data_type() {
        ArrowDataType::Int8 => int_at!(Int8Array),
        ArrowDataType::Int16 => int_at!(Int16Array),
        ArrowDataType::Int32 => int_at!(Int32Array),
        ArrowDataType::Int64 => int_at!(Int64Array),
        ArrowDataType::UInt8 => int_at!(UInt8Array),
        ArrowDataType::UInt16 => int_at!(UInt16Array),
        ArrowDataType::UInt32 => int_at!(UInt32Array),
        ArrowDataType::UInt64 => {
            let v = array.as_any().downcast_ref::<UInt64Array>()?.value(row);
            Value::Int64(i64::try_from(v).ok()?)
        }
        ArrowDataType::Float16 => Value::Float64(
            array
                .as_any()
                .downcast_ref::<Float16Array>()?
                .value(row)
                .to_f64(),
        ),
        ArrowDataType::Float32 => Value::Float64(f64::from(
            array.as_any().downcast_ref::<Float32Array>()?.value(row),
        )),
        ArrowDataType::Float64 => {
            Value::Float64(array.as_any().downcast_ref::<Float64Array>()?.value(row))
        }
        ArrowDataType::Boolean => {
            Value::Bool(array.as_any().downcast_ref::<BooleanArray>()?.value(row))
        }
        ArrowDataType::Utf8 => Value::String(
            array
                .as_any()
                .downcast_ref::<StringArray>()?
                .value(row)
                .to_string(),
        ),
        ArrowDataType::LargeUtf8 => Value::String(
            array
                .as_any()
                .downcast_ref::<LargeStringArray>()?
                .value(row)
                .to_string(),
        ),
        ArrowDataType::Date32 => Value::Date(array.as_any().downcast_ref::<Date32Array>()?.value(row)),
        ArrowDataType::Date64 => {
            let millis = array.as_any().downcast_ref::<Date64Array>()?.value(row);
            Value::Date(i32::try_from(millis.div_euclid(86_400_000)).ok()?)
        }
        ArrowDataType::Timestamp(unit, _) => {
            let micros = match unit {
                TimeUnit::Second => array
                    .as_any()
                    .downcast_ref::<TimestampSecondArray>()?
                    .value(row)
                    .saturating_mul(1_000_000),
                TimeUnit::Millisecond => array
                    .as_any()
                    .downcast_ref::<TimestampMillisecondArray>()?
                    .value(row)
                    .saturating_mul(1_000),
                TimeUnit::Microsecond => array
                    .as_any()
                    .downcast_ref::<TimestampMicrosecondArray>()?
                    .value(row),
                TimeUnit::Nanosecond => {
                    array
                        .as_any()
                        .downcast_ref::<TimestampNanosecondArray>()?
                        .value(row)
                        / 1_000
                }
            };
            Value::Timestamp(micros)
        }
        _ => return None,
    };
    Some(value)
}

/// One cell of a table as seen through the read-only tabular contract.
///
/// A cell whose `error` is set holds an error marker rather than real data;
/// the marker value itself is only a compatibility convenience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    value: Value,
    display: String,
    error: Option<String>,
}

impl Cell {
    /// Creates a cell holding real data.
    #[must_use]
    pub fn new(value: Value) -> Self {
        let display = value.to_text();
        Cell {
            value,
            display,
            error: None,
        }
    }

    /// Creates a null cell.
    #[must_use]
    pub fn null() -> Self {
        Cell::new(Value::Null)
    }

    /// Creates a cell flagged as an evaluation failure.
    #[must_use]
    pub fn with_error(marker: Value, message: impl Into<String>) -> Self {
        let display = marker.to_text();
        Cell {
            value: marker,
            display,
            error: Some(message.into()),
        }
    }

    /// Returns the raw value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consumes the cell, returning the raw value.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Returns true if the value is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Returns the pre-rendered display string.
    #[must_use]
    pub fn display(&self) -> &str {
        &self.display
    }

    /// Returns the evaluation error message, if this cell is an error marker.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns true if this cell is an error marker.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl From<Value> for Cell {
    fn from(value: Value) -> Self {
        Cell::new(value)
    }
}
