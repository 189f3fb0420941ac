//! Column definitions for the augmented table.

mod definition;

pub use definition::{ColumnDefinition, ColumnKind};
