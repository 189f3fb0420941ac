//! In-memory table backed by an Arrow `RecordBatch`.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::error::{ColcalcError, Result};
use crate::table::{check_column, check_row, TabularData};
use crate::types::{value_at, Cell, DataType, Value};

/// Immutable in-memory table.
#[derive(Clone)]
pub struct MemTable {
    batch: RecordBatch,
    types: Vec<DataType>,
    metadata: HashMap<String, serde_json::Value>,
}

impl std::fmt::Debug for MemTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemTable")
            .field("row_count", &self.batch.num_rows())
            .field("column_count", &self.batch.num_columns())
            .finish_non_exhaustive()
    }
}

impl MemTable {
    /// Wraps a record batch.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedInputType` if a column's Arrow type has no semantic type.
    pub fn try_new(batch: RecordBatch) -> Result<Self> {
        let schema = batch.schema();
        let types = schema
            .fields()
            .iter()
            .map(|field| {
                DataType::from_arrow(field.data_type()).ok_or_else(|| {
                    ColcalcError::UnsupportedInputType {
                        column: field.name().clone(),
                        data_type: field.data_type().to_string(),
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let metadata = schema
            .metadata()
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();

        Ok(MemTable {
            batch,
            types,
            metadata,
        })
    }

    /// Builds a table from named arrays. All columns are nullable.
    ///
    /// # Errors
    ///
    /// Returns an error if the arrays differ in length, names repeat, or a
    /// type is unsupported.
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, ArrayRef)>) -> Result<Self> {
        let mut fields = Vec::with_capacity(columns.len());
        let mut arrays = Vec::with_capacity(columns.len());
        for (name, array) in columns {
            let name = name.into();
            if fields.iter().any(|f: &Field| f.name() == &name) {
                return Err(ColcalcError::DuplicateColumn(name));
            }
            fields.push(Field::new(name, array.data_type().clone(), true));
            arrays.push(array);
        }
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?;
        Self::try_new(batch)
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns the underlying record batch.
    #[must_use]
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }
}

impl TabularData for MemTable {
    fn row_count(&self) -> usize {
        self.batch.num_rows()
    }

    fn column_count(&self) -> usize {
        self.batch.num_columns()
    }

    fn column_name(&self, col: usize) -> Result<String> {
        check_column(col, self.column_count())?;
        Ok(self.batch.schema().field(col).name().clone())
    }

    fn column_type(&self, col: usize) -> Result<DataType> {
        check_column(col, self.column_count())?;
        Ok(self.types[col])
    }

    fn cell(&self, row: usize, col: usize) -> Result<Cell> {
        check_column(col, self.column_count())?;
        check_row(row, self.row_count())?;
        // Column types were checked on construction; None here means the
        // value itself does not fit the column's type.
        match value_at(self.batch.column(col).as_ref(), row) {
            Some(value) => Ok(Cell::new(value)),
            None => Ok(Cell::with_error(
                Value::Null,
                format!("value does not fit column type {}", self.types[col]),
            )),
        }
    }

    fn metadata(&self) -> HashMap<String, serde_json::Value> {
        self.metadata.clone()
    }

    fn column_array(&self, col: usize) -> Result<ArrayRef> {
        check_column(col, self.column_count())?;
        Ok(Arc::clone(self.batch.column(col)))
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.batch.schema().index_of(name).ok()
    }
}
