//! Definition of a single column: pass-through, computed or transformed.

use std::fmt;

use crate::error::{ColcalcError, Result};
use crate::expression::Expression;
use crate::types::DataType;

/// Classification derived from which of source and expression are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// Reads a storage column unchanged.
    PassThrough,
    /// Computed purely from an expression.
    Computed,
    /// An expression applied to a storage column's values.
    Transformed,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnKind::PassThrough => "pass-through",
            ColumnKind::Computed => "computed",
            ColumnKind::Transformed => "transformed",
        };
        f.write_str(name)
    }
}

/// Definition of one column in a computed table.
///
/// At least one of `source_index` and `expression` is always set.
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    name: String,
    data_type: DataType,
    source_index: Option<usize>,
    expression: Option<Expression>,
}

impl ColumnDefinition {
    /// Creates a validated definition.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDefinition` if the name is empty, if neither a source
    /// nor an expression is given, or if the expression's output type differs
    /// from `data_type`.
    pub fn new(
        name: impl Into<String>,
        data_type: DataType,
        source_index: Option<usize>,
        expression: Option<Expression>,
    ) -> Result<Self> {
        let def = ColumnDefinition {
            name: name.into(),
            data_type,
            source_index,
            expression,
        };
        def.validate()?;
        Ok(def)
    }

    /// Creates a pass-through definition of storage column `source_index`.
    #[must_use]
    pub fn pass_through(name: impl Into<String>, data_type: DataType, source_index: usize) -> Self {
        ColumnDefinition {
            name: name.into(),
            data_type,
            source_index: Some(source_index),
            expression: None,
        }
    }

    /// Creates a computed definition typed by the expression's output.
    #[must_use]
    pub fn computed(name: impl Into<String>, expression: Expression) -> Self {
        ColumnDefinition {
            name: name.into(),
            data_type: expression.output_type(),
            source_index: None,
            expression: Some(expression),
        }
    }

    /// Creates a transformed definition of storage column `source_index`.
    #[must_use]
    pub fn transformed(name: impl Into<String>, source_index: usize, expression: Expression) -> Self {
        ColumnDefinition {
            name: name.into(),
            data_type: expression.output_type(),
            source_index: Some(source_index),
            expression: Some(expression),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ColcalcError::InvalidDefinition(
                "column name cannot be empty".into(),
            ));
        }
        if self.source_index.is_none() && self.expression.is_none() {
            return Err(ColcalcError::InvalidDefinition(format!(
                "column '{}' needs a source column or an expression",
                self.name
            )));
        }
        if let Some(expr) = &self.expression {
            if expr.output_type() != self.data_type {
                return Err(ColcalcError::InvalidDefinition(format!(
                    "column '{}' is declared {} but its expression produces {}",
                    self.name,
                    self.data_type,
                    expr.output_type()
                )));
            }
        }
        Ok(())
    }

    /// Returns the column name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared type.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Returns the storage column index, if any.
    #[must_use]
    pub fn source_index(&self) -> Option<usize> {
        self.source_index
    }

    /// Returns the expression, if any.
    #[must_use]
    pub fn expression(&self) -> Option<&Expression> {
        self.expression.as_ref()
    }

    /// Returns the derived classification.
    #[must_use]
    pub fn kind(&self) -> ColumnKind {
        match (self.source_index, &self.expression) {
            (Some(_), Some(_)) => ColumnKind::Transformed,
            (None, Some(_)) => ColumnKind::Computed,
            _ => ColumnKind::PassThrough,
        }
    }

    /// Returns true if values come from an expression.
    #[must_use]
    pub fn is_computed(&self) -> bool {
        self.expression.is_some()
    }

    /// Returns the expression's input column names in order.
    #[must_use]
    pub fn input_columns(&self) -> &[String] {
        self.expression.as_ref().map_or(&[][..], Expression::input_columns)
    }

    /// Returns the columns this column depends on in the graph.
    ///
    /// A transformed column reading its own name reads raw storage, which is
    /// not an edge.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        let skip_self = self.kind() == ColumnKind::Transformed;
        self.input_columns()
            .iter()
            .map(String::as_str)
            .filter(move |name| !(skip_self && *name == self.name))
    }

    /// Returns a copy with `expression` attached, keeping the source index.
    /// The declared type becomes the expression's output type.
    #[must_use]
    pub fn with_expression(&self, expression: Expression) -> Self {
        ColumnDefinition {
            name: self.name.clone(),
            data_type: expression.output_type(),
            source_index: self.source_index,
            expression: Some(expression),
        }
    }

    /// Returns a copy with the expression removed and `data_type` declared.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDefinition` if the column has no source to fall back to.
    pub fn without_expression(&self, data_type: DataType) -> Result<Self> {
        ColumnDefinition::new(self.name.clone(), data_type, self.source_index, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(text: &str, output: DataType) -> Expression {
        Expression::infer(text, output).unwrap()
    }

    #[test]
    fn test_kinds() {
        let pass = ColumnDefinition::pass_through("a", DataType::Int64, 0);
        assert_eq!(pass.kind(), ColumnKind::PassThrough);
        assert!(!pass.is_computed());
        assert!(pass.input_columns().is_empty());

        let computed = ColumnDefinition::computed("b", expr("a * 2", DataType::Int64));
        assert_eq!(computed.kind(), ColumnKind::Computed);
        assert_eq!(computed.data_type(), DataType::Int64);

        let transformed = ColumnDefinition::transformed("a", 0, expr("a + 1", DataType::Int64));
        assert_eq!(transformed.kind(), ColumnKind::Transformed);
        assert_eq!(transformed.kind().to_string(), "transformed");
    }

    #[test]
    fn test_neither_source_nor_expression_rejected() {
        let err = ColumnDefinition::new("x", DataType::Int64, None, None).unwrap_err();
        assert!(matches!(err, ColcalcError::InvalidDefinition(_)));
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(ColumnDefinition::new(" ", DataType::Int64, Some(0), None).is_err());
    }

    #[test]
    fn test_declared_type_must_match_expression() {
        let err = ColumnDefinition::new(
            "x",
            DataType::String,
            None,
            Some(expr("1 + 1", DataType::Int64)),
        )
        .unwrap_err();
        assert!(err.to_string().contains("STRING"));
    }

    #[test]
    fn test_transformed_self_reference_is_not_a_dependency() {
        let def = ColumnDefinition::transformed("price", 0, expr("price * rate", DataType::Float64));
        assert_eq!(def.dependencies().collect::<Vec<_>>(), vec!["rate"]);

        let computed = ColumnDefinition::computed("price", expr("price * rate", DataType::Float64));
        assert_eq!(computed.dependencies().collect::<Vec<_>>(), vec!["price", "rate"]);
    }

    #[test]
    fn test_expression_round_trip() {
        let pass = ColumnDefinition::pass_through("a", DataType::Int64, 3);
        let transformed = pass.with_expression(expr("string(a)", DataType::String));
        assert_eq!(transformed.kind(), ColumnKind::Transformed);
        assert_eq!(transformed.data_type(), DataType::String);

        let reverted = transformed.without_expression(DataType::Int64).unwrap();
        assert_eq!(reverted.kind(), ColumnKind::PassThrough);
        assert_eq!(reverted.source_index(), Some(3));

        let computed = ColumnDefinition::computed("c", expr("1", DataType::Int64));
        assert!(computed.without_expression(DataType::Int64).is_err());
    }
}
