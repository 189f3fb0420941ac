//! Compile-time safety checks.
//!
//! Expressions are untrusted input. The parser already refuses to build a
//! tree deeper than the limit; the sandbox walks that tree iteratively,
//! re-checks depth and rejects any call outside the whitelist.

use crate::error::{Result, SecurityViolation};
use crate::expression::builtins::Environment;
use crate::parser::Expr;

/// Enforces the nesting limit and the function whitelist.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Sandbox {
    max_depth: usize,
}

impl Sandbox {
    pub(crate) fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    fn too_deep(&self) -> SecurityViolation {
        SecurityViolation::NestingTooDeep {
            limit: self.max_depth,
        }
    }

    /// Walks the parsed tree without recursion.
    ///
    /// # Errors
    ///
    /// Returns `Security` for excessive depth or a call outside `env`, and
    /// `InvalidArguments` for a whitelisted call with the wrong argument count.
    pub(crate) fn inspect(&self, expr: &Expr, env: &Environment) -> Result<()> {
        let mut stack = vec![(expr, 1usize)];
        while let Some((node, depth)) = stack.pop() {
            if depth > self.max_depth {
                return Err(self.too_deep().into());
            }
            if let Expr::Call { name, args } = node {
                let builtin = env
                    .get(name)
                    .ok_or_else(|| SecurityViolation::ForbiddenCall(name.clone()))?;
                builtin.check_arity(name, args.len())?;
            }
            stack.extend(node.children().into_iter().map(|child| (child, depth + 1)));
        }
        Ok(())
    }
}
