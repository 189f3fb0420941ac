//! Expression compilation and column-at-a-time evaluation.
//!
//! An [`Expression`] is compiled once from source text into an immutable
//! program and then evaluated row by row over whole Arrow columns. A row that
//! fails to evaluate does not fail the column: it receives an error marker and
//! its message is recorded in [`EvaluatedColumn::errors`].

mod builtins;
mod coerce;
mod ops;
mod program;
mod sandbox;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::datatypes::DataType as ArrowDataType;

use crate::config::EngineConfig;
use crate::error::{ColcalcError, Result};
use crate::functions::FunctionRegistry;
use crate::parser::parse_expression_with_depth;
use crate::table::ColumnBuilder;
use crate::types::{value_at, DataType, Value};

use builtins::Environment;
use coerce::coerce;
use program::{lower, Node};
use sandbox::Sandbox;

pub use ops::RowError;

/// A compiled expression. Cloning is cheap and clones share the program.
#[derive(Clone)]
pub struct Expression {
    inner: Arc<Compiled>,
}

struct Compiled {
    source: String,
    inputs: Vec<String>,
    output_type: DataType,
    program: Node,
    registry: Arc<FunctionRegistry>,
    config: EngineConfig,
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("source", &self.inner.source)
            .field("inputs", &self.inner.inputs)
            .field("output_type", &self.inner.output_type)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.source)
    }
}

/// Builder for [`Expression`].
///
/// Inputs are inferred from the identifiers in the text when not given.
#[derive(Debug, Clone)]
pub struct ExpressionBuilder {
    source: String,
    inputs: Option<Vec<String>>,
    output_type: Option<DataType>,
    registry: Option<Arc<FunctionRegistry>>,
    config: EngineConfig,
}

impl ExpressionBuilder {
    /// Starts a builder for `source`.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            inputs: None,
            output_type: None,
            registry: None,
            config: EngineConfig::default(),
        }
    }

    /// Sets the ordered input column names.
    #[must_use]
    pub fn inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = Some(inputs.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the output type.
    #[must_use]
    pub fn output_type(mut self, output_type: DataType) -> Self {
        self.output_type = Some(output_type);
        self
    }

    /// Sets the registry whose functions are callable from the expression.
    #[must_use]
    pub fn registry(mut self, registry: Arc<FunctionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Compiles the expression.
    ///
    /// # Errors
    ///
    /// Returns `EmptyExpression`, `MissingOutputType`, `ParseError`,
    /// `Security`, `InvalidArguments`, `InvalidDefinition` for duplicate
    /// input names, or `Config` for an invalid configuration.
    pub fn build(self) -> Result<Expression> {
        if self.source.trim().is_empty() {
            return Err(ColcalcError::EmptyExpression);
        }
        let output_type = self.output_type.ok_or(ColcalcError::MissingOutputType)?;
        self.config.validate()?;

        let ast = parse_expression_with_depth(&self.source, self.config.max_nesting_depth)?;
        let sandbox = Sandbox::new(self.config.max_nesting_depth);

        let registry = self.registry.unwrap_or_else(FunctionRegistry::shared_default);
        let env = Environment::new(self.config.registry_wrappers.then_some(registry.as_ref()));
        sandbox.inspect(&ast, &env)?;

        let inputs = match self.inputs {
            Some(inputs) => {
                if let Some(dup) = inputs
                    .iter()
                    .enumerate()
                    .find_map(|(i, name)| inputs[..i].contains(name).then_some(name))
                {
                    return Err(ColcalcError::InvalidDefinition(format!(
                        "input column '{dup}' listed twice"
                    )));
                }
                inputs
            }
            None => ast.referenced_columns(),
        };
        let program = lower(&ast, &inputs, &env);
        log::debug!(
            "compiled expression `{}` -> {output_type} with inputs {inputs:?}",
            self.source
        );

        Ok(Expression {
            inner: Arc::new(Compiled {
                source: self.source,
                inputs,
                output_type,
                program,
                registry,
                config: self.config,
            }),
        })
    }
}

impl Expression {
    /// Compiles `source` with explicit inputs, the default registry and the
    /// default configuration.
    ///
    /// # Errors
    ///
    /// See [`ExpressionBuilder::build`].
    pub fn compile<I, S>(source: &str, inputs: I, output_type: DataType) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExpressionBuilder::new(source)
            .inputs(inputs)
            .output_type(output_type)
            .build()
    }

    /// Compiles `source`, inferring inputs from the referenced identifiers.
    ///
    /// # Errors
    ///
    /// See [`ExpressionBuilder::build`].
    pub fn infer(source: &str, output_type: DataType) -> Result<Self> {
        ExpressionBuilder::new(source).output_type(output_type).build()
    }

    /// Returns the original source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    /// Returns the ordered input column names.
    #[must_use]
    pub fn input_columns(&self) -> &[String] {
        &self.inner.inputs
    }

    /// Returns the output type.
    #[must_use]
    pub fn output_type(&self) -> DataType {
        self.inner.output_type
    }

    /// Returns the configuration the expression was compiled with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Returns true if `column` is one of the inputs.
    #[must_use]
    pub fn reads(&self, column: &str) -> bool {
        self.inner.inputs.iter().any(|c| c == column)
    }

    /// `(self) && (other)`.
    ///
    /// # Errors
    ///
    /// Returns a compile error if the combined program is rejected.
    pub fn and(&self, other: &Expression) -> Result<Expression> {
        self.combine(other, "&&")
    }

    /// `(self) || (other)`.
    ///
    /// # Errors
    ///
    /// Returns a compile error if the combined program is rejected.
    pub fn or(&self, other: &Expression) -> Result<Expression> {
        self.combine(other, "||")
    }

    /// `!(self)`.
    ///
    /// # Errors
    ///
    /// Returns a compile error if the negated program is rejected.
    #[allow(clippy::should_implement_trait)]
    pub fn not(&self) -> Result<Expression> {
        self.recompile(format!("!({})", self.source()), self.inner.inputs.clone())
    }

    fn combine(&self, other: &Expression, op: &str) -> Result<Expression> {
        let mut inputs = self.inner.inputs.clone();
        for name in other.input_columns() {
            if !inputs.contains(name) {
                inputs.push(name.clone());
            }
        }
        self.recompile(
            format!("({}) {op} ({})", self.source(), other.source()),
            inputs,
        )
    }

    fn recompile(&self, source: String, inputs: Vec<String>) -> Result<Expression> {
        ExpressionBuilder::new(source)
            .inputs(inputs)
            .output_type(DataType::Bool)
            .registry(Arc::clone(&self.inner.registry))
            .config(self.inner.config.clone())
            .build()
    }

    /// Evaluates over `inputs`, one array per input column in order. The row
    /// count is taken from the first input.
    ///
    /// # Errors
    ///
    /// See [`Expression::evaluate_with_row_count`].
    pub fn evaluate(&self, inputs: &[ArrayRef]) -> Result<EvaluatedColumn> {
        let row_count = inputs.first().map_or(0, |a| a.len());
        self.evaluate_with_row_count(inputs, row_count)
    }

    /// Evaluates over `inputs`, producing exactly `row_count` rows.
    ///
    /// All checks run before any row is evaluated. Per-row failures do not
    /// fail the call.
    ///
    /// # Errors
    ///
    /// Returns `InputCountMismatch` if the number of arrays differs from the
    /// number of inputs, `LengthMismatch` if any array does not have
    /// `row_count` rows, or `UnsupportedInputType` for an array type with no
    /// scalar representation.
    pub fn evaluate_with_row_count(
        &self,
        inputs: &[ArrayRef],
        row_count: usize,
    ) -> Result<EvaluatedColumn> {
        let names = &self.inner.inputs;
        if inputs.len() != names.len() {
            return Err(ColcalcError::InputCountMismatch {
                expected: names.len(),
                actual: inputs.len(),
            });
        }
        for (name, array) in names.iter().zip(inputs) {
            if array.len() != row_count {
                return Err(ColcalcError::LengthMismatch {
                    column: name.clone(),
                    expected: row_count,
                    actual: array.len(),
                });
            }
            let data_type = array.data_type();
            if *data_type != ArrowDataType::Null && DataType::from_arrow(data_type).is_none() {
                return Err(ColcalcError::UnsupportedInputType {
                    column: name.clone(),
                    data_type: data_type.to_string(),
                });
            }
        }

        let output_type = self.inner.output_type;
        let mut builder = ColumnBuilder::new(output_type, row_count);
        let mut errors = BTreeMap::new();
        let mut row_values = vec![Value::Null; inputs.len()];

        for row in 0..row_count {
            let result = self
                .read_row(inputs, row, &mut row_values)
                .and_then(|()| self.inner.program.eval(&row_values))
                .and_then(|value| coerce(value, output_type));
            match result {
                Ok(value) => builder.append(&value)?,
                Err(err) => {
                    builder.append(&self.error_marker(&err))?;
                    errors.insert(row, err.to_string());
                }
            }
        }

        if !errors.is_empty() {
            log::debug!(
                "expression `{}`: {} of {row_count} rows failed",
                self.inner.source,
                errors.len()
            );
        }
        Ok(EvaluatedColumn {
            values: builder.finish(),
            errors,
        })
    }

    fn read_row(
        &self,
        inputs: &[ArrayRef],
        row: usize,
        values: &mut [Value],
    ) -> std::result::Result<(), RowError> {
        for ((slot, array), name) in values.iter_mut().zip(inputs).zip(&self.inner.inputs) {
            *slot = value_at(array.as_ref(), row).ok_or_else(|| RowError::Unreadable(name.clone()))?;
        }
        Ok(())
    }

    /// Value stored in a row that failed to evaluate.
    fn error_marker(&self, err: &RowError) -> Value {
        let config = &self.inner.config;
        match self.inner.output_type {
            DataType::Int64 => Value::Int64(config.error_sentinel),
            DataType::Float64 => Value::Float64(config.error_sentinel as f64),
            DataType::Date => Value::Date(i32::try_from(config.error_sentinel).unwrap_or(-1)),
            DataType::Timestamp => Value::Timestamp(config.error_sentinel),
            DataType::String => Value::String(format!("{}{err}", config.string_error_prefix)),
            DataType::Bool => Value::Null,
        }
    }
}

/// Output of one evaluation: the values plus per-row error messages.
///
/// A row present in `errors` holds an error marker in `values`; the map is
/// the authoritative signal.
#[derive(Debug, Clone)]
pub struct EvaluatedColumn {
    values: ArrayRef,
    errors: BTreeMap<usize, String>,
}

impl EvaluatedColumn {
    /// Returns the output array.
    #[must_use]
    pub fn values(&self) -> &ArrayRef {
        &self.values
    }

    /// Returns the error message of every failed row.
    #[must_use]
    pub fn errors(&self) -> &BTreeMap<usize, String> {
        &self.errors
    }

    /// Returns the error message for `row`, if it failed.
    #[must_use]
    pub fn error(&self, row: usize) -> Option<&str> {
        self.errors.get(&row).map(String::as_str)
    }

    /// Returns the number of failed rows.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SecurityViolation;
    use arrow::array::{
        Array, BooleanArray, Date32Array, Float64Array, Int32Array, Int64Array, StringArray,
    };

    fn ints(values: &[Option<i64>]) -> ArrayRef {
        Arc::new(Int64Array::from(values.to_vec()))
    }

    // ========================================================================
    // Compile Tests
    // ========================================================================

    mod compile_tests {
        use super::*;

        #[test]
        fn test_empty_source() {
            assert!(matches!(
                Expression::compile("   ", ["x"], DataType::Int64),
                Err(ColcalcError::EmptyExpression)
            ));
        }

        #[test]
        fn test_missing_output_type() {
            assert!(matches!(
                ExpressionBuilder::new("x + 1").build(),
                Err(ColcalcError::MissingOutputType)
            ));
        }

        #[test]
        fn test_syntax_error() {
            let err = Expression::compile("x +* 2", ["x"], DataType::Int64).unwrap_err();
            assert!(err.is_compile_error());
        }

        #[test]
        fn test_forbidden_call() {
            let err = Expression::infer("exec('ls')", DataType::String).unwrap_err();
            assert!(matches!(err, ColcalcError::Security(_)));
        }

        #[test]
        fn test_inputs_inferred_in_order() {
            let expr = Expression::infer("b * a + b", DataType::Float64).unwrap();
            assert_eq!(expr.input_columns(), ["b", "a"]);
            assert!(expr.reads("a"));
            assert!(!expr.reads("c"));
        }

        #[test]
        fn test_duplicate_explicit_inputs() {
            assert!(matches!(
                Expression::compile("x", ["x", "x"], DataType::Int64),
                Err(ColcalcError::InvalidDefinition(_))
            ));
        }

        #[test]
        fn test_registry_wrappers_can_be_disabled() {
            let config = EngineConfig::new().with_registry_wrappers(false);
            let err = ExpressionBuilder::new("sqrt(x)")
                .output_type(DataType::Float64)
                .config(config)
                .build()
                .unwrap_err();
            assert!(matches!(err, ColcalcError::Security(_)));
        }

        #[test]
        fn test_custom_nesting_limit() {
            let config = EngineConfig::new().with_max_nesting_depth(3);
            assert!(ExpressionBuilder::new("((x))")
                .output_type(DataType::Int64)
                .config(config.clone())
                .build()
                .is_ok());
            assert!(ExpressionBuilder::new("((((x + 1))))")
                .output_type(DataType::Int64)
                .config(config)
                .build()
                .is_err());
        }

        #[test]
        fn test_long_operator_chain_fails_compilation() {
            let chain = vec!["x"; 200_000].join(" + ");
            let err = Expression::infer(&chain, DataType::Int64).unwrap_err();
            assert!(matches!(
                err,
                ColcalcError::Security(SecurityViolation::NestingTooDeep { limit: 100 })
            ));

            let negations = format!("{}x", "-".repeat(200_000));
            let err = Expression::infer(&negations, DataType::Int64).unwrap_err();
            assert!(err.is_compile_error());
        }

        #[test]
        fn test_composition() {
            let big = Expression::infer("x > 10", DataType::Bool).unwrap();
            let even = Expression::infer("y % 2 == 0", DataType::Bool).unwrap();
            let both = big.and(&even).unwrap();
            assert_eq!(both.source(), "(x > 10) && (y % 2 == 0)");
            assert_eq!(both.input_columns(), ["x", "y"]);
            assert_eq!(both.output_type(), DataType::Bool);

            let either = big.or(&even).unwrap();
            assert_eq!(either.input_columns(), ["x", "y"]);
            let negated = big.not().unwrap();
            assert_eq!(negated.source(), "!(x > 10)");

            let out = both
                .evaluate(&[ints(&[Some(20), Some(20)]), ints(&[Some(2), Some(3)])])
                .unwrap();
            let out = out.values().as_any().downcast_ref::<BooleanArray>().unwrap();
            assert!(out.value(0));
            assert!(!out.value(1));
        }

        #[test]
        fn test_expression_is_send_sync() {
            fn assert_send_sync<T: Send + Sync>() {}
            assert_send_sync::<Expression>();
        }
    }

    // ========================================================================
    // Evaluation Tests
    // ========================================================================

    mod evaluation_tests {
        use super::*;

        #[test]
        fn test_doubles_integers() {
            let expr = Expression::compile("x * 2", ["x"], DataType::Int64).unwrap();
            let out = expr.evaluate(&[ints(&[Some(1), Some(2), Some(3)])]).unwrap();
            let values = out.values().as_any().downcast_ref::<Int64Array>().unwrap();
            assert_eq!(values.values(), &[2, 4, 6]);
            assert_eq!(out.error_count(), 0);
        }

        #[test]
        fn test_null_input_gives_null_output() {
            let expr = Expression::compile("x + 1", ["x"], DataType::Int64).unwrap();
            let out = expr.evaluate(&[ints(&[Some(1), None])]).unwrap();
            assert!(out.values().is_null(1));
            assert!(out.error(1).is_none());
        }

        #[test]
        fn test_narrow_inputs_are_widened() {
            let expr = Expression::compile("x + 1", ["x"], DataType::Int64).unwrap();
            let input: ArrayRef = Arc::new(Int32Array::from(vec![41]));
            let out = expr.evaluate(&[input]).unwrap();
            let values = out.values().as_any().downcast_ref::<Int64Array>().unwrap();
            assert_eq!(values.value(0), 42);
        }

        #[test]
        fn test_length_mismatch_before_any_row() {
            let expr = Expression::compile("a + b", ["a", "b"], DataType::Int64).unwrap();
            let err = expr
                .evaluate(&[ints(&[Some(1), Some(2)]), ints(&[Some(1)])])
                .unwrap_err();
            assert!(matches!(
                err,
                ColcalcError::LengthMismatch { ref column, expected: 2, actual: 1 } if column == "b"
            ));
        }

        #[test]
        fn test_input_count_mismatch() {
            let expr = Expression::compile("a + b", ["a", "b"], DataType::Int64).unwrap();
            assert!(matches!(
                expr.evaluate(&[ints(&[Some(1)])]),
                Err(ColcalcError::InputCountMismatch { expected: 2, actual: 1 })
            ));
        }

        #[test]
        fn test_row_error_numeric_sentinel() {
            let expr = Expression::compile("int(s)", ["s"], DataType::Int64).unwrap();
            let input: ArrayRef = Arc::new(StringArray::from(vec!["1", "abc", "3"]));
            let out = expr.evaluate(&[input]).unwrap();
            let values = out.values().as_any().downcast_ref::<Int64Array>().unwrap();
            assert_eq!(values.values(), &[1, -1, 3]);
            assert_eq!(out.errors().keys().copied().collect::<Vec<_>>(), vec![1]);
            assert!(out.error(1).unwrap().contains("abc"));
        }

        #[test]
        fn test_row_error_string_prefix() {
            let expr = Expression::compile("string(10 / x)", ["x"], DataType::String).unwrap();
            let out = expr.evaluate(&[ints(&[Some(0), Some(4)])]).unwrap();
            let values = out.values().as_any().downcast_ref::<StringArray>().unwrap();
            assert_eq!(values.value(0), "#ERROR: division by zero");
            assert_eq!(values.value(1), "2.5");
        }

        #[test]
        fn test_row_error_bool_is_null() {
            let expr = Expression::compile("x / 0 > 1", ["x"], DataType::Bool).unwrap();
            let out = expr.evaluate(&[ints(&[Some(1)])]).unwrap();
            assert!(out.values().is_null(0));
            assert_eq!(out.error(0), Some("division by zero"));
        }

        #[test]
        fn test_custom_sentinel() {
            let expr = ExpressionBuilder::new("x / 0")
                .inputs(["x"])
                .output_type(DataType::Float64)
                .config(EngineConfig::new().with_error_sentinel(-999))
                .build()
                .unwrap();
            let out = expr.evaluate(&[ints(&[Some(1)])]).unwrap();
            let values = out.values().as_any().downcast_ref::<Float64Array>().unwrap();
            assert_eq!(values.value(0), -999.0);
        }

        #[test]
        fn test_custom_string_prefix() {
            let expr = ExpressionBuilder::new("concat('n=', int(s))")
                .inputs(["s"])
                .output_type(DataType::String)
                .config(EngineConfig::new().with_string_error_prefix("!! "))
                .build()
                .unwrap();
            let input: ArrayRef = Arc::new(StringArray::from(vec!["4", "four"]));
            let out = expr.evaluate(&[input]).unwrap();
            let values = out.values().as_any().downcast_ref::<StringArray>().unwrap();
            assert_eq!(values.value(0), "n=4");
            assert!(values.value(1).starts_with("!! "));
            assert_eq!(format!("!! {}", out.error(1).unwrap()), values.value(1));
        }

        #[test]
        fn test_oversized_unsigned_input_is_row_error() {
            let input: ArrayRef = Arc::new(arrow::array::UInt64Array::from(vec![5, u64::MAX]));
            let expr = Expression::compile("n + 1", ["n"], DataType::Int64).unwrap();
            let out = expr.evaluate(&[input]).unwrap();
            let values = out.values().as_any().downcast_ref::<Int64Array>().unwrap();
            assert_eq!(values.value(0), 6);
            assert_eq!(values.value(1), -1);
            assert!(out.error(1).unwrap().contains("'n'"));
        }

        #[test]
        fn test_zero_inputs_with_row_count() {
            let expr = Expression::compile("7", Vec::<String>::new(), DataType::Int64).unwrap();
            let out = expr.evaluate_with_row_count(&[], 3).unwrap();
            assert_eq!(out.len(), 3);
            assert!(expr.evaluate(&[]).unwrap().is_empty());
        }

        #[test]
        fn test_date_output() {
            let expr = Expression::compile("date(s)", ["s"], DataType::Date).unwrap();
            let input: ArrayRef = Arc::new(StringArray::from(vec![Some("1970-01-11"), Some("nope")]));
            let out = expr.evaluate(&[input]).unwrap();
            let values = out.values().as_any().downcast_ref::<Date32Array>().unwrap();
            assert_eq!(values.value(0), 10);
            assert_eq!(values.value(1), -1);
            assert!(out.error(1).is_some());
        }

        #[test]
        fn test_string_output_coerces() {
            let expr = Expression::compile("'n=' + x", ["x"], DataType::String).unwrap();
            let out = expr.evaluate(&[ints(&[Some(5)])]).unwrap();
            let values = out.values().as_any().downcast_ref::<StringArray>().unwrap();
            assert_eq!(values.value(0), "n=5");
        }

        #[test]
        fn test_registry_function_in_expression() {
            let expr = Expression::compile("upper(trim(s))", ["s"], DataType::String).unwrap();
            let input: ArrayRef = Arc::new(StringArray::from(vec![" ab "]));
            let out = expr.evaluate(&[input]).unwrap();
            let values = out.values().as_any().downcast_ref::<StringArray>().unwrap();
            assert_eq!(values.value(0), "AB");
        }
    }
}
