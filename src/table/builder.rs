//! Typed Arrow builders keyed by semantic type.

use std::sync::Arc;

use arrow::array::{
    ArrayBuilder, ArrayRef, BooleanBuilder, Date32Builder, Float64Builder, Int64Builder,
    StringBuilder, TimestampMicrosecondBuilder,
};

use crate::error::{ColcalcError, Result};
use crate::types::{DataType, Value};

/// Average bytes reserved per string value.
const STRING_BYTES_HINT: usize = 16;

/// Appends [`Value`]s of one semantic type into an Arrow array.
#[derive(Debug)]
pub enum ColumnBuilder {
    Int64(Int64Builder),
    Float64(Float64Builder),
    Bool(BooleanBuilder),
    String(StringBuilder),
    Date(Date32Builder),
    Timestamp(TimestampMicrosecondBuilder),
}

impl ColumnBuilder {
    /// Creates a builder for `data_type` with room for `capacity` values.
    #[must_use]
    pub fn new(data_type: DataType, capacity: usize) -> Self {
        match data_type {
            DataType::Int64 => ColumnBuilder::Int64(Int64Builder::with_capacity(capacity)),
            DataType::Float64 => ColumnBuilder::Float64(Float64Builder::with_capacity(capacity)),
            DataType::Bool => ColumnBuilder::Bool(BooleanBuilder::with_capacity(capacity)),
            DataType::String => ColumnBuilder::String(StringBuilder::with_capacity(
                capacity,
                capacity * STRING_BYTES_HINT,
            )),
            DataType::Date => ColumnBuilder::Date(Date32Builder::with_capacity(capacity)),
            DataType::Timestamp => {
                ColumnBuilder::Timestamp(TimestampMicrosecondBuilder::with_capacity(capacity))
            }
        }
    }

    /// Returns the semantic type this builder accepts.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            ColumnBuilder::Int64(_) => DataType::Int64,
            ColumnBuilder::Float64(_) => DataType::Float64,
            ColumnBuilder::Bool(_) => DataType::Bool,
            ColumnBuilder::String(_) => DataType::String,
            ColumnBuilder::Date(_) => DataType::Date,
            ColumnBuilder::Timestamp(_) => DataType::Timestamp,
        }
    }

    /// Appends a value. Null is accepted by every builder.
    ///
    /// # Errors
    ///
    /// Returns `OutputTypeMismatch` if the value's type differs from the builder's.
    pub fn append(&mut self, value: &Value) -> Result<()> {
        match (self, value) {
            (builder, Value::Null) => builder.append_null(),
            (ColumnBuilder::Int64(b), Value::Int64(v)) => b.append_value(*v),
            (ColumnBuilder::Float64(b), Value::Float64(v)) => b.append_value(*v),
            (ColumnBuilder::Bool(b), Value::Bool(v)) => b.append_value(*v),
            (ColumnBuilder::String(b), Value::String(v)) => b.append_value(v),
            (ColumnBuilder::Date(b), Value::Date(v)) => b.append_value(*v),
            (ColumnBuilder::Timestamp(b), Value::Timestamp(v)) => b.append_value(*v),
            (builder, other) => {
                return Err(ColcalcError::OutputTypeMismatch {
                    expected: builder.data_type().name().into(),
                    actual: other.data_type().map_or("NULL", |t| t.name()).into(),
                })
            }
        }
        Ok(())
    }

    /// Appends a null.
    pub fn append_null(&mut self) {
        match self {
            ColumnBuilder::Int64(b) => b.append_null(),
            ColumnBuilder::Float64(b) => b.append_null(),
            ColumnBuilder::Bool(b) => b.append_null(),
            ColumnBuilder::String(b) => b.append_null(),
            ColumnBuilder::Date(b) => b.append_null(),
            ColumnBuilder::Timestamp(b) => b.append_null(),
        }
    }

    /// Returns the number of values appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            ColumnBuilder::Int64(b) => b.len(),
            ColumnBuilder::Float64(b) => b.len(),
            ColumnBuilder::Bool(b) => b.len(),
            ColumnBuilder::String(b) => b.len(),
            ColumnBuilder::Date(b) => b.len(),
            ColumnBuilder::Timestamp(b) => b.len(),
        }
    }

    /// Returns true if nothing has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finishes the builder into an immutable array.
    pub fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Int64(b) => Arc::new(b.finish()),
            ColumnBuilder::Float64(b) => Arc::new(b.finish()),
            ColumnBuilder::Bool(b) => Arc::new(b.finish()),
            ColumnBuilder::String(b) => Arc::new(b.finish()),
            ColumnBuilder::Date(b) => Arc::new(b.finish()),
            ColumnBuilder::Timestamp(b) => Arc::new(b.finish()),
        }
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::{Array, Int64Array};

    use super::*;

    #[test]
    fn test_append_and_finish() {
        let mut builder = ColumnBuilder::new(DataType::Int64, 3);
        builder.append(&Value::Int64(1)).unwrap();
        builder.append(&Value::Null).unwrap();
        builder.append(&Value::Int64(3)).unwrap();
        assert_eq!(builder.len(), 3);

        let array = builder.finish();
        let ints = array.as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ints.value(0), 1);
        assert!(ints.is_null(1));
        assert_eq!(ints.value(2), 3);
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let mut builder = ColumnBuilder::new(DataType::Bool, 1);
        let err = builder.append(&Value::from("yes")).unwrap_err();
        assert!(matches!(err, ColcalcError::OutputTypeMismatch { .. }));
        assert!(builder.is_empty());
    }
}
