//! colcalc - computed columns over read-only tabular data
//!
//! Expressions are compiled once into sandboxed programs and evaluated
//! column-at-a-time over Arrow arrays. A [`ComputedTable`] wraps a source
//! table, tracks column dependencies, and materializes computed columns
//! lazily into a shared cache.

pub mod column;
pub mod computed;
pub mod config;
pub mod error;
pub mod expression;
pub mod functions;
pub mod graph;
pub mod parser;
pub mod table;
pub mod types;

pub use column::{ColumnDefinition, ColumnKind};
pub use computed::{ComputedTable, TableStats};
pub use config::EngineConfig;
pub use error::{ColcalcError, Result, SecurityViolation};
pub use expression::{EvaluatedColumn, Expression, ExpressionBuilder, RowError};
pub use functions::{FunctionCategory, FunctionRegistry, VectorFunction};
pub use graph::DependencyGraph;
pub use table::{MemTable, TabularData};
pub use types::{Cell, DataType, Value};
