//! Error types for colcalc operations.

use thiserror::Error;

/// Result type alias using [`ColcalcError`].
pub type Result<T> = std::result::Result<T, ColcalcError>;

/// Error types for computed-column operations.
///
/// Every variant is recoverable: the operation that produced it left the
/// table unchanged.
#[derive(Debug, Error)]
pub enum ColcalcError {
    // ==================== Definition Errors ====================
    /// A column with this name already exists.
    #[error("Duplicate column name '{0}'")]
    DuplicateColumn(String),

    /// A referenced column does not exist.
    #[error("Unknown column '{0}'")]
    UnknownColumn(String),

    /// A column definition violates the data model.
    #[error("Invalid column definition: {0}")]
    InvalidDefinition(String),

    /// An expression was built without an output type.
    #[error("Expression output type must be specified")]
    MissingOutputType,

    /// An expression was built from empty source text.
    #[error("Expression text cannot be empty")]
    EmptyExpression,

    /// Adding or editing a column would introduce a dependency cycle.
    #[error("Dependency cycle detected: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    /// A column cannot be removed while other columns depend on it.
    #[error("Column '{column}' is still used by: {}", dependents.join(", "))]
    ColumnInUse {
        column: String,
        dependents: Vec<String>,
    },

    /// Pass-through columns mirror storage and cannot be removed.
    #[error("Column '{0}' is a pass-through of a storage column and cannot be removed")]
    PassThroughRemoval(String),

    // ==================== Compile Errors ====================
    /// Parse error with location information.
    #[error("Parse error at line {line}, column {col}: {message}")]
    ParseError {
        line: usize,
        col: usize,
        message: String,
    },

    /// A function was called with the wrong number of arguments.
    #[error("Function '{function}' {message}")]
    InvalidArguments { function: String, message: String },

    /// The compiled program was rejected by the sandbox.
    #[error("Security violation: {0}")]
    Security(#[from] SecurityViolation),

    // ==================== Evaluation Errors ====================
    /// The number of input arrays does not match the expression's inputs.
    #[error("Expected {expected} input columns, got {actual}")]
    InputCountMismatch { expected: usize, actual: usize },

    /// Input arrays disagree on row count.
    #[error("Input column '{column}' has {actual} rows, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    /// An input array has a type the evaluator cannot read.
    #[error("Input column '{column}' has unsupported type {data_type}")]
    UnsupportedInputType { column: String, data_type: String },

    /// The output builder received a value of the wrong type.
    #[error("Output type error: expected {expected}, got {actual}")]
    OutputTypeMismatch { expected: String, actual: String },

    // ==================== Tabular Contract Errors ====================
    /// Row index out of range.
    #[error("Invalid row {row} (row count {row_count})")]
    InvalidRow { row: usize, row_count: usize },

    /// Column index out of range.
    #[error("Invalid column {col} (column count {column_count})")]
    InvalidColumn { col: usize, column_count: usize },

    // ==================== Function Registry Errors ====================
    /// No function registered under this name.
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    /// A registry function rejected its input or failed to execute.
    #[error("Function '{name}' failed: {message}")]
    Function { name: String, message: String },

    /// Error raised by an Arrow kernel.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    // ==================== Configuration Errors ====================
    /// Invalid engine configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Reasons the sandbox rejects a compiled program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityViolation {
    /// A call names a function outside the whitelist.
    #[error("call to '{0}' is not permitted")]
    ForbiddenCall(String),

    /// The program nests deeper than the configured limit.
    #[error("nesting depth exceeds limit of {limit}")]
    NestingTooDeep { limit: usize },
}

impl ColcalcError {
    /// Returns true for errors that reject a column definition or edit.
    #[must_use]
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            ColcalcError::DuplicateColumn(_)
                | ColcalcError::UnknownColumn(_)
                | ColcalcError::InvalidDefinition(_)
                | ColcalcError::MissingOutputType
                | ColcalcError::EmptyExpression
                | ColcalcError::CycleDetected { .. }
                | ColcalcError::ColumnInUse { .. }
                | ColcalcError::PassThroughRemoval(_)
        )
    }

    /// Returns true for errors raised while compiling an expression.
    #[must_use]
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            ColcalcError::ParseError { .. }
                | ColcalcError::InvalidArguments { .. }
                | ColcalcError::Security(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_joins_path() {
        let err = ColcalcError::CycleDetected {
            path: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle detected: A -> B -> A");
        assert!(err.is_definition_error());
    }

    #[test]
    fn test_column_in_use_names_dependents() {
        let err = ColcalcError::ColumnInUse {
            column: "A".into(),
            dependents: vec!["B".into(), "C".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("'A'"));
        assert!(msg.contains("B, C"));
    }

    #[test]
    fn test_security_violation_is_compile_error() {
        let err: ColcalcError = SecurityViolation::ForbiddenCall("system".into()).into();
        assert!(err.is_compile_error());
        assert!(err.to_string().contains("system"));
    }
}
