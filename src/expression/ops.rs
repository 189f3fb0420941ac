//! Row-level operator semantics.
//!
//! Nulls propagate through arithmetic and ordering comparisons. `==` and `!=`
//! against a null literal test nullness, and `&&`/`||` follow three-valued
//! logic.

use std::cmp::Ordering;

use thiserror::Error;

use crate::parser::{BinaryOp, UnaryOp};
use crate::types::{DataType, Value};

/// Failure evaluating one row. The row gets an error marker; other rows are
/// unaffected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowError {
    /// Operator applied to operands of incompatible types.
    #[error("type error: cannot apply '{op}' to {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    /// Prefix operator applied to an operand of the wrong type.
    #[error("type error: cannot apply '{op}' to {operand}")]
    UnaryTypeMismatch {
        op: &'static str,
        operand: &'static str,
    },

    /// Division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Integer arithmetic overflowed.
    #[error("integer overflow in '{0}'")]
    Overflow(&'static str),

    /// A value cannot be converted to the requested type.
    #[error("cannot convert {value} to {target}")]
    Coercion { value: String, target: DataType },

    /// A function call failed.
    #[error("{name}: {message}")]
    Function { name: String, message: String },

    /// An input cell could not be read.
    #[error("unreadable value in column '{0}'")]
    Unreadable(String),
}

/// Returns the type name used in diagnostics.
pub(crate) fn type_name(value: &Value) -> &'static str {
    value.data_type().map_or("NULL", |t| t.name())
}

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> RowError {
    RowError::TypeMismatch {
        op: op.as_str(),
        left: type_name(left),
        right: type_name(right),
    }
}

/// Applies a prefix operator.
pub(crate) fn apply_unary(op: UnaryOp, operand: Value) -> Result<Value, RowError> {
    match (op, operand) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Neg, Value::Int64(v)) => v
            .checked_neg()
            .map(Value::Int64)
            .ok_or(RowError::Overflow("-")),
        (UnaryOp::Neg, Value::Float64(v)) => Ok(Value::Float64(-v)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (op, other) => Err(RowError::UnaryTypeMismatch {
            op: match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "!",
            },
            operand: type_name(&other),
        }),
    }
}

/// Applies a strict binary operator. `&&`, `||` and `??` are short-circuited
/// by the caller and only reach here once both sides are known.
pub(crate) fn apply_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, RowError> {
    match op {
        BinaryOp::Add => add(left, right),
        BinaryOp::Sub => subtract(left, right),
        BinaryOp::Mul => multiply(left, right),
        BinaryOp::Div => divide(&left, &right),
        BinaryOp::Mod => remainder(&left, &right),
        BinaryOp::Eq | BinaryOp::Neq => Ok(equality(op, &left, &right)),
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => order(op, &left, &right),
        BinaryOp::And => logical_and(&left, &right),
        BinaryOp::Or => logical_or(&left, &right),
        BinaryOp::Coalesce => Ok(if left.is_null() { right } else { left }),
    }
}

fn add(left: Value, right: Value) -> Result<Value, RowError> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int64(a), Value::Int64(b)) => a
            .checked_add(b)
            .map(Value::Int64)
            .ok_or(RowError::Overflow("+")),
        (Value::Date(d), Value::Int64(n)) | (Value::Int64(n), Value::Date(d)) => i32::try_from(n)
            .ok()
            .and_then(|n| d.checked_add(n))
            .map(Value::Date)
            .ok_or(RowError::Overflow("+")),
        (Value::Timestamp(t), Value::Int64(n)) | (Value::Int64(n), Value::Timestamp(t)) => t
            .checked_add(n)
            .map(Value::Timestamp)
            .ok_or(RowError::Overflow("+")),
        (l @ Value::String(_), r) | (l, r @ Value::String(_)) => {
            let mut text = l.to_text();
            text.push_str(&r.to_text());
            Ok(Value::String(text))
        }
        (l, r) => float_op(BinaryOp::Add, &l, &r, |a, b| a + b),
    }
}

fn subtract(left: Value, right: Value) -> Result<Value, RowError> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int64(a), Value::Int64(b)) => a
            .checked_sub(b)
            .map(Value::Int64)
            .ok_or(RowError::Overflow("-")),
        (Value::Date(a), Value::Date(b)) => Ok(Value::Int64(i64::from(a) - i64::from(b))),
        (Value::Date(d), Value::Int64(n)) => i32::try_from(n)
            .ok()
            .and_then(|n| d.checked_sub(n))
            .map(Value::Date)
            .ok_or(RowError::Overflow("-")),
        (Value::Timestamp(a), Value::Timestamp(b)) => a
            .checked_sub(b)
            .map(Value::Int64)
            .ok_or(RowError::Overflow("-")),
        (Value::Timestamp(t), Value::Int64(n)) => t
            .checked_sub(n)
            .map(Value::Timestamp)
            .ok_or(RowError::Overflow("-")),
        (l, r) => float_op(BinaryOp::Sub, &l, &r, |a, b| a - b),
    }
}

fn multiply(left: Value, right: Value) -> Result<Value, RowError> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int64(a), Value::Int64(b)) => a
            .checked_mul(b)
            .map(Value::Int64)
            .ok_or(RowError::Overflow("*")),
        (l, r) => float_op(BinaryOp::Mul, &l, &r, |a, b| a * b),
    }
}

/// `/` always produces a float.
fn divide(left: &Value, right: &Value) -> Result<Value, RowError> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let (a, b) = numeric_pair(BinaryOp::Div, left, right)?;
    if b == 0.0 {
        return Err(RowError::DivisionByZero);
    }
    Ok(Value::Float64(a / b))
}

fn remainder(left: &Value, right: &Value) -> Result<Value, RowError> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int64(_), Value::Int64(0)) => Err(RowError::DivisionByZero),
        (Value::Int64(a), Value::Int64(b)) => a
            .checked_rem(*b)
            .map(Value::Int64)
            .ok_or(RowError::Overflow("%")),
        (l, r) => {
            let (a, b) = numeric_pair(BinaryOp::Mod, l, r)?;
            if b == 0.0 {
                return Err(RowError::DivisionByZero);
            }
            Ok(Value::Float64(a % b))
        }
    }
}

fn numeric_pair(op: BinaryOp, left: &Value, right: &Value) -> Result<(f64, f64), RowError> {
    match (left.to_f64(), right.to_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(mismatch(op, left, right)),
    }
}

fn float_op(
    op: BinaryOp,
    left: &Value,
    right: &Value,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Value, RowError> {
    let (a, b) = numeric_pair(op, left, right)?;
    Ok(Value::Float64(f(a, b)))
}

/// Equality never fails: incomparable non-null values are simply unequal.
fn equality(op: BinaryOp, left: &Value, right: &Value) -> Value {
    let equal = match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (l, r) => l.compare(r) == Some(Ordering::Equal),
    };
    Value::Bool(if op == BinaryOp::Eq { equal } else { !equal })
}

fn order(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RowError> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let ordering = left
        .compare(right)
        .ok_or_else(|| mismatch(op, left, right))?;
    let result = match op {
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Lte => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    };
    Ok(Value::Bool(result))
}

/// Reads a logical operand: `Some(b)` for booleans, `None` for null.
pub(crate) fn truth(op: BinaryOp, value: &Value, other: &Value) -> Result<Option<bool>, RowError> {
    if value.is_null() {
        return Ok(None);
    }
    value
        .as_bool()
        .map(Some)
        .ok_or_else(|| mismatch(op, value, other))
}

fn logical_and(left: &Value, right: &Value) -> Result<Value, RowError> {
    let l = truth(BinaryOp::And, left, right)?;
    let r = truth(BinaryOp::And, right, left)?;
    Ok(match (l, r) {
        (Some(false), _) | (_, Some(false)) => Value::Bool(false),
        (Some(true), Some(true)) => Value::Bool(true),
        _ => Value::Null,
    })
}

fn logical_or(left: &Value, right: &Value) -> Result<Value, RowError> {
    let l = truth(BinaryOp::Or, left, right)?;
    let r = truth(BinaryOp::Or, right, left)?;
    Ok(match (l, r) {
        (Some(true), _) | (_, Some(true)) => Value::Bool(true),
        (Some(false), Some(false)) => Value::Bool(false),
        _ => Value::Null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin(op: BinaryOp, l: impl Into<Value>, r: impl Into<Value>) -> Result<Value, RowError> {
        apply_binary(op, l.into(), r.into())
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(bin(BinaryOp::Add, 2i64, 3i64).unwrap(), Value::Int64(5));
        assert_eq!(bin(BinaryOp::Mul, 4i64, 5i64).unwrap(), Value::Int64(20));
        assert_eq!(bin(BinaryOp::Mod, 7i64, 3i64).unwrap(), Value::Int64(1));
        assert_eq!(
            bin(BinaryOp::Add, i64::MAX, 1i64),
            Err(RowError::Overflow("+"))
        );
    }

    #[test]
    fn test_mixed_numeric_widens() {
        assert_eq!(bin(BinaryOp::Add, 1i64, 0.5).unwrap(), Value::Float64(1.5));
        assert_eq!(bin(BinaryOp::Div, 7i64, 2i64).unwrap(), Value::Float64(3.5));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(bin(BinaryOp::Div, 1i64, 0i64), Err(RowError::DivisionByZero));
        assert_eq!(bin(BinaryOp::Mod, 1i64, 0i64), Err(RowError::DivisionByZero));
        assert_eq!(bin(BinaryOp::Div, 1.0, 0.0), Err(RowError::DivisionByZero));
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(
            bin(BinaryOp::Add, "id-", 7i64).unwrap(),
            Value::String("id-7".into())
        );
    }

    #[test]
    fn test_type_mismatch() {
        let err = bin(BinaryOp::Mul, "a", 2i64).unwrap_err();
        assert!(err.to_string().contains("STRING"));
        assert!(bin(BinaryOp::Lt, "a", 2i64).is_err());
    }

    #[test]
    fn test_null_propagation() {
        assert_eq!(bin(BinaryOp::Add, Value::Null, 1i64).unwrap(), Value::Null);
        assert_eq!(bin(BinaryOp::Gt, Value::Null, 1i64).unwrap(), Value::Null);
        assert_eq!(
            apply_unary(UnaryOp::Neg, Value::Null).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_null_equality_tests_nullness() {
        assert_eq!(
            bin(BinaryOp::Eq, Value::Null, Value::Null).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            bin(BinaryOp::Neq, 3i64, Value::Null).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(bin(BinaryOp::Eq, 1i64, 1.0).unwrap(), Value::Bool(true));
        assert_eq!(bin(BinaryOp::Eq, 1i64, "1").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_three_valued_logic() {
        assert_eq!(
            bin(BinaryOp::And, Value::Null, false).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(bin(BinaryOp::And, Value::Null, true).unwrap(), Value::Null);
        assert_eq!(
            bin(BinaryOp::Or, Value::Null, true).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(bin(BinaryOp::Or, false, Value::Null).unwrap(), Value::Null);
        assert!(bin(BinaryOp::And, 1i64, true).is_err());
    }

    #[test]
    fn test_date_arithmetic() {
        assert_eq!(
            apply_binary(BinaryOp::Add, Value::Date(10), Value::Int64(5)).unwrap(),
            Value::Date(15)
        );
        assert_eq!(
            apply_binary(BinaryOp::Sub, Value::Date(10), Value::Date(3)).unwrap(),
            Value::Int64(7)
        );
    }
}
