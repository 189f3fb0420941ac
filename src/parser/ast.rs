//! Abstract Syntax Tree definitions for column expressions.

use crate::types::Value;

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal constant.
    Literal(Literal),
    /// Reference to a column by name.
    Column(String),
    /// Prefix operator.
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// Infix operator.
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    /// `condition ? then_branch : else_branch`.
    Conditional {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    /// Function call.
    Call { name: String, args: Vec<Expr> },
}

impl Expr {
    /// Returns the referenced column names in order of first appearance.
    #[must_use]
    pub fn referenced_columns(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_columns(&mut names);
        names
    }

    fn collect_columns(&self, names: &mut Vec<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Column(name) => {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            Expr::Unary { operand, .. } => operand.collect_columns(names),
            Expr::Binary { left, right, .. } => {
                left.collect_columns(names);
                right.collect_columns(names);
            }
            Expr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.collect_columns(names);
                then_branch.collect_columns(names);
                else_branch.collect_columns(names);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_columns(names);
                }
            }
        }
    }

    /// Returns the direct children of this node.
    #[must_use]
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal(_) | Expr::Column(_) => Vec::new(),
            Expr::Unary { operand, .. } => vec![operand.as_ref()],
            Expr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => vec![condition.as_ref(), then_branch.as_ref(), else_branch.as_ref()],
            Expr::Call { args, .. } => args.iter().collect(),
        }
    }
}

/// Literal values in expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// 64-bit integer literal.
    Int64(i64),
    /// 64-bit float literal.
    Float64(f64),
    /// String literal.
    String(String),
    /// Boolean literal.
    Bool(bool),
    /// `null`.
    Null,
}

impl Literal {
    /// Converts the literal into a runtime value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Int64(v) => Value::Int64(*v),
            Literal::Float64(v) => Value::Float64(*v),
            Literal::String(v) => Value::String(v.clone()),
            Literal::Bool(v) => Value::Bool(*v),
            Literal::Null => Value::Null,
        }
    }
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation (`-`).
    Neg,
    /// Logical negation (`!`, `not`).
    Not,
}

/// Infix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    /// Null-coalescing (`??`).
    Coalesce,
}

impl BinaryOp {
    /// Parses an operator token.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "+" => Some(BinaryOp::Add),
            "-" => Some(BinaryOp::Sub),
            "*" => Some(BinaryOp::Mul),
            "/" => Some(BinaryOp::Div),
            "%" => Some(BinaryOp::Mod),
            "==" | "=" => Some(BinaryOp::Eq),
            "!=" | "<>" => Some(BinaryOp::Neq),
            "<" => Some(BinaryOp::Lt),
            "<=" => Some(BinaryOp::Lte),
            ">" => Some(BinaryOp::Gt),
            ">=" => Some(BinaryOp::Gte),
            "&&" | "and" => Some(BinaryOp::And),
            "||" | "or" => Some(BinaryOp::Or),
            "??" => Some(BinaryOp::Coalesce),
            _ => None,
        }
    }

    /// Returns the canonical string representation of this operator.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Coalesce => "??",
        }
    }

    /// Returns true for `== != < <= > >=`.
    #[must_use]
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Neq
                | BinaryOp::Lt
                | BinaryOp::Lte
                | BinaryOp::Gt
                | BinaryOp::Gte
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referenced_columns_dedup_in_order() {
        let expr = Expr::Binary {
            left: Box::new(Expr::Column("b".into())),
            op: BinaryOp::Add,
            right: Box::new(Expr::Call {
                name: "max".into(),
                args: vec![Expr::Column("a".into()), Expr::Column("b".into())],
            }),
        };
        assert_eq!(expr.referenced_columns(), vec!["b", "a"]);
    }

    #[test]
    fn test_operator_parse() {
        assert_eq!(BinaryOp::parse("AND"), Some(BinaryOp::And));
        assert_eq!(BinaryOp::parse("<>"), Some(BinaryOp::Neq));
        assert_eq!(BinaryOp::parse("^"), None);
        assert!(BinaryOp::Gte.is_comparison());
    }
}
