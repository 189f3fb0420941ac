//! Default registry functions built on Arrow compute kernels.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::compute::kernels::arity::unary;
use arrow::compute::kernels::length::length;
use arrow::compute::kernels::numeric::neg;
use arrow::compute::{can_cast_types, cast, cast_with_options, max, min, sum, CastOptions};
use arrow::datatypes::{DataType as ArrowDataType, Float64Type};

use crate::error::Result;
use crate::functions::{function_error, FunctionCategory, FunctionRegistry, VectorFunction};
use crate::types::DataType;

pub(super) fn register_defaults(registry: &mut FunctionRegistry) {
    registry.register(Arc::new(MathFunction::new("sqrt", f64::sqrt)));
    registry.register(Arc::new(MathFunction::new("exp", f64::exp)));
    registry.register(Arc::new(MathFunction::new("ln", f64::ln)));
    registry.register(Arc::new(MathFunction::new("log10", f64::log10)));
    registry.register(Arc::new(NegateFunction));

    registry.register(Arc::new(StringFunction::new("upper", StringOp::Upper)));
    registry.register(Arc::new(StringFunction::new("lower", StringOp::Lower)));
    registry.register(Arc::new(StringFunction::new("trim", StringOp::Trim)));
    registry.register(Arc::new(StringFunction::new("length", StringOp::Length)));

    registry.register(Arc::new(CastFunction::new("to_int64", DataType::Int64)));
    registry.register(Arc::new(CastFunction::new("to_float64", DataType::Float64)));
    registry.register(Arc::new(CastFunction::new("to_utf8", DataType::String)));
    registry.register(Arc::new(CastFunction::new("to_date", DataType::Date)));

    registry.register(Arc::new(AggregateFunction::new("sum", AggregateOp::Sum)));
    registry.register(Arc::new(AggregateFunction::new("min", AggregateOp::Min)));
    registry.register(Arc::new(AggregateFunction::new("max", AggregateOp::Max)));
    registry.register(Arc::new(AggregateFunction::new("count", AggregateOp::Count)));
    registry.register(Arc::new(AggregateFunction::new("mean", AggregateOp::Mean)));
}

fn expect_single<'a>(name: &str, input_types: &'a [ArrowDataType]) -> Result<&'a ArrowDataType> {
    match input_types {
        [single] => Ok(single),
        _ => Err(function_error(
            name,
            format!("expects 1 argument, got {}", input_types.len()),
        )),
    }
}

fn single_input<'a>(name: &str, inputs: &'a [ArrayRef]) -> Result<&'a ArrayRef> {
    match inputs {
        [single] => Ok(single),
        _ => Err(function_error(
            name,
            format!("expects 1 argument, got {}", inputs.len()),
        )),
    }
}

fn require_numeric(name: &str, data_type: &ArrowDataType) -> Result<()> {
    if data_type.is_numeric() {
        Ok(())
    } else {
        Err(function_error(
            name,
            format!("expects a numeric argument, got {data_type}"),
        ))
    }
}

/// Casts any numeric array to `Float64`.
fn to_float64(name: &str, array: &ArrayRef) -> Result<Float64Array> {
    require_numeric(name, array.data_type())?;
    let widened = cast(array.as_ref(), &ArrowDataType::Float64)?;
    widened
        .as_any()
        .downcast_ref::<Float64Array>()
        .cloned()
        .ok_or_else(|| function_error(name, "failed to widen input to Float64"))
}

// ============================================================================
// Math
// ============================================================================

/// Element-wise `f64 -> f64` function. Integer inputs are widened first.
#[derive(Debug, Clone)]
pub struct MathFunction {
    name: String,
    op: fn(f64) -> f64,
}

impl MathFunction {
    /// Creates a math function applying `op` to every non-null element.
    #[must_use]
    pub fn new(name: impl Into<String>, op: fn(f64) -> f64) -> Self {
        Self {
            name: name.into(),
            op,
        }
    }
}

impl VectorFunction for MathFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> FunctionCategory {
        FunctionCategory::Math
    }

    fn validate_input_types(&self, input_types: &[ArrowDataType]) -> Result<()> {
        require_numeric(&self.name, expect_single(&self.name, input_types)?)
    }

    fn output_type(&self, input_types: &[ArrowDataType]) -> Result<ArrowDataType> {
        self.validate_input_types(input_types)?;
        Ok(ArrowDataType::Float64)
    }

    fn execute(&self, inputs: &[ArrayRef]) -> Result<ArrayRef> {
        let input = to_float64(&self.name, single_input(&self.name, inputs)?)?;
        let op = self.op;
        let output: Float64Array = unary::<Float64Type, _, Float64Type>(&input, op);
        Ok(Arc::new(output))
    }
}

/// Arithmetic negation preserving the input type. Integer overflow fails.
#[derive(Debug, Clone, Copy)]
struct NegateFunction;

impl VectorFunction for NegateFunction {
    fn name(&self) -> &str {
        "negate"
    }

    fn category(&self) -> FunctionCategory {
        FunctionCategory::Math
    }

    fn validate_input_types(&self, input_types: &[ArrowDataType]) -> Result<()> {
        require_numeric(self.name(), expect_single(self.name(), input_types)?)
    }

    fn output_type(&self, input_types: &[ArrowDataType]) -> Result<ArrowDataType> {
        self.validate_input_types(input_types)?;
        Ok(input_types[0].clone())
    }

    fn execute(&self, inputs: &[ArrayRef]) -> Result<ArrayRef> {
        let input = single_input(self.name(), inputs)?;
        require_numeric(self.name(), input.data_type())?;
        Ok(neg(input)?)
    }
}

// ============================================================================
// String
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum StringOp {
    Upper,
    Lower,
    Trim,
    Length,
}

/// Element-wise string function over `Utf8` or `LargeUtf8` input.
#[derive(Debug, Clone)]
pub struct StringFunction {
    name: String,
    op: StringOp,
}

impl StringFunction {
    pub(super) fn new(name: impl Into<String>, op: StringOp) -> Self {
        Self {
            name: name.into(),
            op,
        }
    }

    fn check(&self, data_type: &ArrowDataType) -> Result<()> {
        match data_type {
            ArrowDataType::Utf8 | ArrowDataType::LargeUtf8 => Ok(()),
            other => Err(function_error(
                &self.name,
                format!("expects a string argument, got {other}"),
            )),
        }
    }
}

impl VectorFunction for StringFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> FunctionCategory {
        FunctionCategory::String
    }

    fn validate_input_types(&self, input_types: &[ArrowDataType]) -> Result<()> {
        self.check(expect_single(&self.name, input_types)?)
    }

    fn output_type(&self, input_types: &[ArrowDataType]) -> Result<ArrowDataType> {
        self.validate_input_types(input_types)?;
        Ok(match self.op {
            StringOp::Length => ArrowDataType::Int32,
            _ => ArrowDataType::Utf8,
        })
    }

    fn execute(&self, inputs: &[ArrayRef]) -> Result<ArrayRef> {
        let input = single_input(&self.name, inputs)?;
        self.check(input.data_type())?;
        let input = cast(input.as_ref(), &ArrowDataType::Utf8)?;
        if self.op == StringOp::Length {
            return Ok(length(input.as_ref())?);
        }

        let strings = input
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| function_error(&self.name, "failed to read string input"))?;
        let output: StringArray = match self.op {
            StringOp::Upper => strings.iter().map(|s| s.map(str::to_uppercase)).collect(),
            StringOp::Lower => strings.iter().map(|s| s.map(str::to_lowercase)).collect(),
            StringOp::Trim | StringOp::Length => strings.iter().map(|s| s.map(str::trim)).collect(),
        };
        Ok(Arc::new(output))
    }
}

// ============================================================================
// Cast
// ============================================================================

/// Strict conversion to a fixed Arrow type. Unconvertible values fail the
/// whole call instead of becoming null.
#[derive(Debug, Clone)]
pub struct CastFunction {
    name: String,
    target: ArrowDataType,
}

impl CastFunction {
    /// Creates a cast function targeting the Arrow type of `target`.
    #[must_use]
    pub fn new(name: impl Into<String>, target: DataType) -> Self {
        Self {
            name: name.into(),
            target: target.to_arrow(),
        }
    }
}

impl VectorFunction for CastFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> FunctionCategory {
        FunctionCategory::Cast
    }

    fn validate_input_types(&self, input_types: &[ArrowDataType]) -> Result<()> {
        let from = expect_single(&self.name, input_types)?;
        if can_cast_types(from, &self.target) {
            Ok(())
        } else {
            Err(function_error(
                &self.name,
                format!("cannot cast {from} to {}", self.target),
            ))
        }
    }

    fn output_type(&self, input_types: &[ArrowDataType]) -> Result<ArrowDataType> {
        self.validate_input_types(input_types)?;
        Ok(self.target.clone())
    }

    fn execute(&self, inputs: &[ArrayRef]) -> Result<ArrayRef> {
        let input = single_input(&self.name, inputs)?;
        let options = CastOptions {
            safe: false,
            ..CastOptions::default()
        };
        cast_with_options(input.as_ref(), &self.target, &options)
            .map_err(|e| function_error(&self.name, e.to_string()))
    }
}

// ============================================================================
// Aggregate
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum AggregateOp {
    Sum,
    Min,
    Max,
    Count,
    Mean,
}

/// Reduction over a whole numeric column, returning a one-element array.
#[derive(Debug, Clone)]
pub struct AggregateFunction {
    name: String,
    op: AggregateOp,
}

impl AggregateFunction {
    pub(super) fn new(name: impl Into<String>, op: AggregateOp) -> Self {
        Self {
            name: name.into(),
            op,
        }
    }
}

impl VectorFunction for AggregateFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> FunctionCategory {
        FunctionCategory::Aggregate
    }

    fn validate_input_types(&self, input_types: &[ArrowDataType]) -> Result<()> {
        let input = expect_single(&self.name, input_types)?;
        if self.op == AggregateOp::Count {
            return Ok(());
        }
        require_numeric(&self.name, input)
    }

    fn output_type(&self, input_types: &[ArrowDataType]) -> Result<ArrowDataType> {
        self.validate_input_types(input_types)?;
        Ok(match self.op {
            AggregateOp::Count => ArrowDataType::Int64,
            _ => ArrowDataType::Float64,
        })
    }

    fn execute(&self, inputs: &[ArrayRef]) -> Result<ArrayRef> {
        let input = single_input(&self.name, inputs)?;
        let non_null = (input.len() - input.null_count()) as i64;
        if self.op == AggregateOp::Count {
            return Ok(Arc::new(Int64Array::from(vec![non_null])));
        }

        let values = to_float64(&self.name, input)?;
        let result = match self.op {
            AggregateOp::Sum => sum(&values),
            AggregateOp::Min => min(&values),
            AggregateOp::Max => max(&values),
            AggregateOp::Mean => sum(&values).map(|total| total / non_null as f64),
            AggregateOp::Count => None,
        };
        Ok(Arc::new(Float64Array::from(vec![result])))
    }
}
