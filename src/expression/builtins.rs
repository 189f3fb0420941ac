//! The whitelist of functions callable from expressions.
//!
//! An [`Environment`] is built once per compilation. Anything it does not
//! name is rejected by the sandbox before evaluation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ColcalcError, Result};
use crate::expression::coerce::coerce;
use crate::expression::ops::{type_name, RowError};
use crate::functions::{FunctionRegistry, VectorFunction};
use crate::table::ColumnBuilder;
use crate::types::{value_at, DataType, Value};

/// Signature of a scalar function over one row's argument values.
pub(crate) type ScalarFn = Arc<dyn Fn(&[Value]) -> std::result::Result<Value, RowError> + Send + Sync>;

/// How a whitelisted name is evaluated.
#[derive(Clone)]
pub(crate) enum Callable {
    /// `if(cond, then, else)`, evaluated lazily.
    Conditional,
    /// `coalesce(...)` and `if_null(a, b)`: first non-null argument, evaluated lazily.
    Coalesce,
    /// Eager function over evaluated arguments.
    Scalar(ScalarFn),
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Conditional => f.write_str("Conditional"),
            Callable::Coalesce => f.write_str("Coalesce"),
            Callable::Scalar(_) => f.write_str("Scalar"),
        }
    }
}

/// A whitelisted function with its accepted argument counts.
#[derive(Debug, Clone)]
pub(crate) struct Builtin {
    pub(crate) callable: Callable,
    min_args: usize,
    max_args: Option<usize>,
}

impl Builtin {
    fn new(callable: Callable, min_args: usize, max_args: Option<usize>) -> Self {
        Self {
            callable,
            min_args,
            max_args,
        }
    }

    fn scalar<F>(min_args: usize, max_args: Option<usize>, f: F) -> Self
    where
        F: Fn(&[Value]) -> std::result::Result<Value, RowError> + Send + Sync + 'static,
    {
        Self::new(Callable::Scalar(Arc::new(f)), min_args, max_args)
    }

    fn fixed<F>(arity: usize, f: F) -> Self
    where
        F: Fn(&[Value]) -> std::result::Result<Value, RowError> + Send + Sync + 'static,
    {
        Self::scalar(arity, Some(arity), f)
    }

    /// Checks a call's argument count.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArguments` if the count is outside the accepted range.
    pub(crate) fn check_arity(&self, name: &str, count: usize) -> Result<()> {
        let ok = count >= self.min_args && self.max_args.map_or(true, |max| count <= max);
        if ok {
            return Ok(());
        }
        let expected = match self.max_args {
            Some(max) if max == self.min_args => format!("{max}"),
            Some(max) => format!("{} to {max}", self.min_args),
            None => format!("at least {}", self.min_args),
        };
        Err(ColcalcError::InvalidArguments {
            function: name.to_string(),
            message: format!("expects {expected} arguments, got {count}"),
        })
    }
}

/// Name-to-function whitelist consulted at compile time.
#[derive(Debug, Clone)]
pub(crate) struct Environment {
    entries: HashMap<String, Builtin>,
}

impl Environment {
    /// Builds the environment. Non-aggregate registry functions are added as
    /// scalar wrappers unless a built-in already claims the name.
    pub(crate) fn new(registry: Option<&FunctionRegistry>) -> Self {
        let mut entries = builtin_entries();
        if let Some(registry) = registry {
            for function in registry.elementwise() {
                let name = function.name().to_ascii_lowercase();
                if entries.contains_key(&name) {
                    log::trace!("built-in '{name}' shadows registry function");
                    continue;
                }
                let arity = function.arity();
                entries.insert(
                    name,
                    Builtin::new(
                        Callable::Scalar(registry_wrapper(Arc::clone(function))),
                        arity,
                        Some(arity),
                    ),
                );
            }
        }
        Self { entries }
    }

    /// Looks up a whitelisted function, ignoring ASCII case.
    pub(crate) fn get(&self, name: &str) -> Option<&Builtin> {
        self.entries.get(&name.to_ascii_lowercase())
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// Runs a vectorized function over one-element arrays. Any null argument
/// yields null without calling the function.
fn registry_wrapper(function: Arc<dyn VectorFunction>) -> ScalarFn {
    Arc::new(move |args: &[Value]| {
        if args.iter().any(Value::is_null) {
            return Ok(Value::Null);
        }
        let fail = |message: String| RowError::Function {
            name: function.name().to_string(),
            message,
        };

        let mut arrays = Vec::with_capacity(args.len());
        for arg in args {
            let data_type = arg
                .data_type()
                .ok_or_else(|| fail("null argument".into()))?;
            let mut builder = ColumnBuilder::new(data_type, 1);
            builder.append(arg).map_err(|e| fail(e.to_string()))?;
            arrays.push(builder.finish());
        }

        let types: Vec<_> = arrays.iter().map(|a| a.data_type().clone()).collect();
        function
            .validate_input_types(&types)
            .map_err(|e| fail(e.to_string()))?;
        let output = function.execute(&arrays).map_err(|e| fail(e.to_string()))?;
        if output.is_empty() {
            return Ok(Value::Null);
        }
        value_at(output.as_ref(), 0)
            .ok_or_else(|| fail(format!("unsupported output type {}", output.data_type())))
    })
}

fn builtin_entries() -> HashMap<String, Builtin> {
    let mut entries = HashMap::new();
    let mut add = |name: &str, builtin: Builtin| {
        entries.insert(name.to_string(), builtin);
    };

    // Conditional and null handling
    add("if", Builtin::new(Callable::Conditional, 3, Some(3)));
    add("coalesce", Builtin::new(Callable::Coalesce, 1, None));
    add("if_null", Builtin::new(Callable::Coalesce, 2, Some(2)));
    add("is_null", Builtin::fixed(1, |a| Ok(Value::Bool(a[0].is_null()))));
    add("is_not_null", Builtin::fixed(1, |a| Ok(Value::Bool(!a[0].is_null()))));

    // Math
    add("abs", Builtin::fixed(1, |a| abs(&a[0])));
    add("round", Builtin::scalar(1, Some(2), round));
    add("floor", Builtin::fixed(1, |a| rounding("floor", &a[0], f64::floor)));
    add("ceil", Builtin::fixed(1, |a| rounding("ceil", &a[0], f64::ceil)));
    add("pow", Builtin::fixed(2, pow));
    add("min", Builtin::scalar(1, None, |a| extreme("min", a, std::cmp::Ordering::Less)));
    add("max", Builtin::scalar(1, None, |a| extreme("max", a, std::cmp::Ordering::Greater)));

    // String
    add("len", Builtin::fixed(1, |a| len(&a[0])));
    add("concat", Builtin::scalar(0, None, concat));
    add("substr", Builtin::scalar(2, Some(3), substr));
    add("contains", Builtin::fixed(2, |a| text_test(a, |s, p| s.contains(p))));
    add("starts_with", Builtin::fixed(2, |a| text_test(a, |s, p| s.starts_with(p))));
    add("ends_with", Builtin::fixed(2, |a| text_test(a, |s, p| s.ends_with(p))));
    add("replace", Builtin::fixed(3, replace));

    // Conversion
    for (name, target) in [
        ("int", DataType::Int64),
        ("float", DataType::Float64),
        ("string", DataType::String),
        ("bool", DataType::Bool),
        ("date", DataType::Date),
        ("timestamp", DataType::Timestamp),
    ] {
        add(name, Builtin::fixed(1, move |a| coerce(a[0].clone(), target)));
    }

    entries
}

fn function_error(name: &str, message: impl Into<String>) -> RowError {
    RowError::Function {
        name: name.to_string(),
        message: message.into(),
    }
}

fn expect_number(name: &str, value: &Value) -> std::result::Result<f64, RowError> {
    value
        .to_f64()
        .ok_or_else(|| function_error(name, format!("expects a number, got {}", type_name(value))))
}

fn abs(value: &Value) -> std::result::Result<Value, RowError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Int64(i) => i
            .checked_abs()
            .map(Value::Int64)
            .ok_or(RowError::Overflow("abs")),
        other => Ok(Value::Float64(expect_number("abs", other)?.abs())),
    }
}

fn rounding(name: &str, value: &Value, f: fn(f64) -> f64) -> std::result::Result<Value, RowError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Int64(_) => Ok(value.clone()),
        other => Ok(Value::Float64(f(expect_number(name, other)?))),
    }
}

/// `round(x)` or `round(x, digits)`, rounding half away from zero.
fn round(args: &[Value]) -> std::result::Result<Value, RowError> {
    let digits = match args.get(1) {
        None => 0,
        Some(Value::Null) => return Ok(Value::Null),
        Some(Value::Int64(d)) => i32::try_from(*d)
            .map_err(|_| function_error("round", "digits out of range"))?,
        Some(other) => {
            return Err(function_error(
                "round",
                format!("digits must be an integer, got {}", type_name(other)),
            ))
        }
    };
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Int64(_) if digits >= 0 => Ok(args[0].clone()),
        other => {
            let x = expect_number("round", other)?;
            let scale = 10f64.powi(digits);
            Ok(Value::Float64((x * scale).round() / scale))
        }
    }
}

fn pow(args: &[Value]) -> std::result::Result<Value, RowError> {
    if args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }
    let base = expect_number("pow", &args[0])?;
    let exponent = expect_number("pow", &args[1])?;
    Ok(Value::Float64(base.powf(exponent)))
}

/// Smallest or largest non-null argument. All-null yields null.
fn extreme(
    name: &str,
    args: &[Value],
    wanted: std::cmp::Ordering,
) -> std::result::Result<Value, RowError> {
    let mut best: Option<&Value> = None;
    for arg in args.iter().filter(|a| !a.is_null()) {
        best = match best {
            None => Some(arg),
            Some(current) => {
                let ordering = arg.compare(current).ok_or_else(|| {
                    function_error(
                        name,
                        format!("cannot compare {} and {}", type_name(arg), type_name(current)),
                    )
                })?;
                Some(if ordering == wanted { arg } else { current })
            }
        };
    }
    Ok(best.cloned().unwrap_or(Value::Null))
}

fn len(value: &Value) -> std::result::Result<Value, RowError> {
    match value {
        Value::Null => Ok(Value::Null),
        other => Ok(Value::Int64(other.to_text().chars().count() as i64)),
    }
}

/// Concatenates the text of every argument, skipping nulls.
fn concat(args: &[Value]) -> std::result::Result<Value, RowError> {
    Ok(Value::String(args.iter().map(Value::to_text).collect()))
}

fn expect_text<'a>(name: &str, value: &'a Value) -> std::result::Result<&'a str, RowError> {
    value
        .as_string()
        .ok_or_else(|| function_error(name, format!("expects a string, got {}", type_name(value))))
}

fn expect_index(name: &str, value: &Value) -> std::result::Result<usize, RowError> {
    match value {
        Value::Int64(i) => usize::try_from(*i)
            .map_err(|_| function_error(name, format!("index must not be negative, got {i}"))),
        other => Err(function_error(
            name,
            format!("expects an integer, got {}", type_name(other)),
        )),
    }
}

/// `substr(s, start[, length])` with zero-based character positions.
fn substr(args: &[Value]) -> std::result::Result<Value, RowError> {
    if args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }
    let text = expect_text("substr", &args[0])?;
    let start = expect_index("substr", &args[1])?;
    let chars = text.chars().skip(start);
    let out: String = match args.get(2) {
        Some(count) => chars.take(expect_index("substr", count)?).collect(),
        None => chars.collect(),
    };
    Ok(Value::String(out))
}

fn text_test(
    args: &[Value],
    test: impl Fn(&str, &str) -> bool,
) -> std::result::Result<Value, RowError> {
    if args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }
    let text = expect_text("string test", &args[0])?;
    let pattern = expect_text("string test", &args[1])?;
    Ok(Value::Bool(test(text, pattern)))
}

fn replace(args: &[Value]) -> std::result::Result<Value, RowError> {
    if args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }
    let text = expect_text("replace", &args[0])?;
    let from = expect_text("replace", &args[1])?;
    let to = expect_text("replace", &args[2])?;
    if from.is_empty() {
        return Ok(Value::String(text.to_string()));
    }
    Ok(Value::String(text.replace(from, to)))
}
