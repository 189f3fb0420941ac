//! Read-only tabular data contract.
//!
//! Storage adapters, the computed-column coordinator, and every consumer
//! (filtering, sorting, export, presentation) meet at [`TabularData`]. A
//! [`ComputedTable`](crate::computed::ComputedTable) implements the same trait
//! as the storage it wraps, so it can stand in wherever a plain table is used.

mod builder;
mod memory;

use std::collections::HashMap;

use arrow::array::ArrayRef;

use crate::error::{ColcalcError, Result};
use crate::types::{Cell, DataType};

pub use builder::ColumnBuilder;
pub use memory::MemTable;

/// Read-only access to a table of typed cells.
pub trait TabularData: Send + Sync {
    /// Returns the number of rows.
    fn row_count(&self) -> usize;

    /// Returns the number of columns.
    fn column_count(&self) -> usize;

    /// Returns the name of column `col`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidColumn` if `col` is out of range.
    fn column_name(&self, col: usize) -> Result<String>;

    /// Returns the semantic type of column `col`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidColumn` if `col` is out of range.
    fn column_type(&self, col: usize) -> Result<DataType>;

    /// Returns the cell at (`row`, `col`).
    ///
    /// # Errors
    ///
    /// Returns `InvalidRow` or `InvalidColumn` for out-of-range indices.
    fn cell(&self, row: usize, col: usize) -> Result<Cell>;

    /// Returns every cell of `row` in column order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRow` if `row` is out of range.
    fn row(&self, row: usize) -> Result<Vec<Cell>> {
        check_row(row, self.row_count())?;
        (0..self.column_count())
            .map(|col| self.cell(row, col))
            .collect()
    }

    /// Returns a snapshot of table-level metadata.
    fn metadata(&self) -> HashMap<String, serde_json::Value> {
        HashMap::new()
    }

    /// Returns column `col` as an Arrow array.
    ///
    /// The default builds the array cell by cell; Arrow-backed tables return
    /// their stored array directly.
    ///
    /// # Errors
    ///
    /// Returns `InvalidColumn` if `col` is out of range.
    fn column_array(&self, col: usize) -> Result<ArrayRef> {
        let data_type = self.column_type(col)?;
        let rows = self.row_count();
        let mut builder = ColumnBuilder::new(data_type, rows);
        for row in 0..rows {
            builder.append(self.cell(row, col)?.value())?;
        }
        Ok(builder.finish())
    }

    /// Finds a column index by name.
    fn column_index(&self, name: &str) -> Option<usize> {
        (0..self.column_count()).find(|&col| self.column_name(col).is_ok_and(|n| n == name))
    }
}

/// Validates a row index against a row count.
///
/// # Errors
///
/// Returns `InvalidRow` if `row >= row_count`.
pub fn check_row(row: usize, row_count: usize) -> Result<()> {
    if row >= row_count {
        return Err(ColcalcError::InvalidRow { row, row_count });
    }
    Ok(())
}

/// Validates a column index against a column count.
///
/// # Errors
///
/// Returns `InvalidColumn` if `col >= column_count`.
pub fn check_column(col: usize, column_count: usize) -> Result<()> {
    if col >= column_count {
        return Err(ColcalcError::InvalidColumn { col, column_count });
    }
    Ok(())
}
