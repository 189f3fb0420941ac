//! Expression parser.
//!
//! Turns expression text into an [`Expr`] tree of bounded depth. Name
//! resolution and the function whitelist are checked later, in
//! [`crate::expression`].

pub mod ast;
mod grammar;

pub use ast::{BinaryOp, Expr, Literal, UnaryOp};
pub use grammar::{parse_expression, parse_expression_with_depth};
