//! Compiled program: a tree with names resolved to input slots and
//! whitelisted functions.

use std::fmt;

use crate::expression::builtins::{Callable, Environment, ScalarFn};
use crate::expression::ops::{apply_binary, apply_unary, truth, type_name, RowError};
use crate::parser::{BinaryOp, Expr, UnaryOp};
use crate::types::Value;

/// One node of a compiled program.
#[derive(Clone)]
pub(crate) enum Node {
    Const(Value),
    /// Index into the row's input values.
    Input(usize),
    /// Identifier that is not an input; always null.
    Missing(String),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Conditional(Box<Node>, Box<Node>, Box<Node>),
    Coalesce(Vec<Node>),
    Call {
        name: String,
        function: ScalarFn,
        args: Vec<Node>,
    },
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Const(v) => write!(f, "Const({v:?})"),
            Node::Input(slot) => write!(f, "Input({slot})"),
            Node::Missing(name) => write!(f, "Missing({name})"),
            Node::Unary(op, operand) => write!(f, "Unary({op:?}, {operand:?})"),
            Node::Binary(op, l, r) => write!(f, "Binary({op:?}, {l:?}, {r:?})"),
            Node::Conditional(c, t, e) => write!(f, "Conditional({c:?}, {t:?}, {e:?})"),
            Node::Coalesce(args) => write!(f, "Coalesce({args:?})"),
            Node::Call { name, args, .. } => write!(f, "Call({name}, {args:?})"),
        }
    }
}

/// Resolves `expr` against the input names and the environment.
///
/// The sandbox has already accepted every call, so an unresolved call here
/// cannot happen; it lowers to a null constant rather than panicking.
pub(crate) fn lower(expr: &Expr, inputs: &[String], env: &Environment) -> Node {
    match expr {
        Expr::Literal(lit) => Node::Const(lit.to_value()),
        Expr::Column(name) => inputs
            .iter()
            .position(|input| input == name)
            .map_or_else(|| Node::Missing(name.clone()), Node::Input),
        Expr::Unary { op, operand } => Node::Unary(*op, Box::new(lower(operand, inputs, env))),
        Expr::Binary { left, op, right } => Node::Binary(
            *op,
            Box::new(lower(left, inputs, env)),
            Box::new(lower(right, inputs, env)),
        ),
        Expr::Conditional {
            condition,
            then_branch,
            else_branch,
        } => Node::Conditional(
            Box::new(lower(condition, inputs, env)),
            Box::new(lower(then_branch, inputs, env)),
            Box::new(lower(else_branch, inputs, env)),
        ),
        Expr::Call { name, args } => {
            let mut lowered: Vec<Node> = args.iter().map(|a| lower(a, inputs, env)).collect();
            match env.get(name).map(|b| b.callable.clone()) {
                Some(Callable::Conditional) if lowered.len() == 3 => {
                    let else_branch = lowered.pop().unwrap_or(Node::Const(Value::Null));
                    let then_branch = lowered.pop().unwrap_or(Node::Const(Value::Null));
                    let condition = lowered.pop().unwrap_or(Node::Const(Value::Null));
                    Node::Conditional(
                        Box::new(condition),
                        Box::new(then_branch),
                        Box::new(else_branch),
                    )
                }
                Some(Callable::Coalesce) => Node::Coalesce(lowered),
                Some(Callable::Scalar(function)) => Node::Call {
                    name: name.to_ascii_lowercase(),
                    function,
                    args: lowered,
                },
                _ => Node::Const(Value::Null),
            }
        }
    }
}

impl Node {
    /// Evaluates the node for one row.
    pub(crate) fn eval(&self, row: &[Value]) -> Result<Value, RowError> {
        match self {
            Node::Const(v) => Ok(v.clone()),
            Node::Input(slot) => Ok(row.get(*slot).cloned().unwrap_or(Value::Null)),
            Node::Missing(_) => Ok(Value::Null),
            Node::Unary(op, operand) => apply_unary(*op, operand.eval(row)?),
            Node::Binary(op, left, right) => Self::eval_binary(*op, left, right, row),
            Node::Conditional(condition, then_branch, else_branch) => {
                let cond = condition.eval(row)?;
                let taken = match cond {
                    Value::Bool(true) => then_branch,
                    Value::Bool(false) | Value::Null => else_branch,
                    other => {
                        return Err(RowError::Function {
                            name: "if".into(),
                            message: format!("condition must be BOOL, got {}", type_name(&other)),
                        })
                    }
                };
                taken.eval(row)
            }
            Node::Coalesce(args) => {
                for arg in args {
                    let value = arg.eval(row)?;
                    if !value.is_null() {
                        return Ok(value);
                    }
                }
                Ok(Value::Null)
            }
            Node::Call { name, function, args } => {
                let values = args
                    .iter()
                    .map(|a| a.eval(row))
                    .collect::<Result<Vec<_>, _>>()?;
                function(&values).map_err(|e| match e {
                    RowError::Function { .. } => e,
                    other => RowError::Function {
                        name: name.clone(),
                        message: other.to_string(),
                    },
                })
            }
        }
    }

    /// `&&`, `||` and `??` skip the right side when the left decides.
    fn eval_binary(op: BinaryOp, left: &Node, right: &Node, row: &[Value]) -> Result<Value, RowError> {
        let l = left.eval(row)?;
        match op {
            BinaryOp::And if truth(op, &l, &Value::Null)? == Some(false) => Ok(Value::Bool(false)),
            BinaryOp::Or if truth(op, &l, &Value::Null)? == Some(true) => Ok(Value::Bool(true)),
            BinaryOp::Coalesce if !l.is_null() => Ok(l),
            _ => apply_binary(op, l, right.eval(row)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;

    fn run(text: &str, inputs: &[&str], row: &[Value]) -> Result<Value, RowError> {
        let env = Environment::new(None);
        let inputs: Vec<String> = inputs.iter().map(|s| (*s).to_string()).collect();
        let node = lower(&parse_expression(text).unwrap(), &inputs, &env);
        node.eval(row)
    }

    #[test]
    fn test_inputs_resolve_to_slots() {
        assert_eq!(
            run("b - a", &["a", "b"], &[Value::Int64(1), Value::Int64(10)]),
            Ok(Value::Int64(9))
        );
    }

    #[test]
    fn test_missing_identifier_is_null() {
        assert_eq!(run("ghost + 1", &[], &[]), Ok(Value::Null));
        assert_eq!(run("ghost == null", &[], &[]), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_if_is_lazy() {
        assert_eq!(
            run("if(x == 0, 0, 10 / x)", &["x"], &[Value::Int64(0)]),
            Ok(Value::Int64(0))
        );
        assert_eq!(
            run("x == 0 ? 0 : 10 / x", &["x"], &[Value::Int64(4)]),
            Ok(Value::Float64(2.5))
        );
    }

    #[test]
    fn test_short_circuit() {
        assert_eq!(
            run("false && 1 / 0 > 1", &[], &[]),
            Ok(Value::Bool(false))
        );
        assert_eq!(run("true || 1 / 0 > 1", &[], &[]), Ok(Value::Bool(true)));
        assert_eq!(run("5 ?? 1 / 0", &[], &[]), Ok(Value::Int64(5)));
    }

    #[test]
    fn test_coalesce_function() {
        assert_eq!(
            run("coalesce(a, b, 3)", &["a", "b"], &[Value::Null, Value::Null]),
            Ok(Value::Int64(3))
        );
        assert_eq!(
            run("if_null(a, 'none')", &["a"], &[Value::Null]),
            Ok(Value::String("none".into()))
        );
    }

    #[test]
    fn test_non_bool_condition() {
        assert!(run("if(1, 2, 3)", &[], &[]).is_err());
    }

    #[test]
    fn test_call_errors_name_function() {
        let err = run("abs(x)", &["x"], &[Value::Int64(i64::MIN)]).unwrap_err();
        assert!(err.to_string().starts_with("abs:"));
    }
}
