//! Pest parser integration for the expression grammar.
//!
//! Expression text is untrusted. Nesting is bounded twice: brackets and
//! ternaries are counted in the raw text before pest runs, and the tree
//! builder tracks node depth while folding operator chains and prefix runs,
//! so no tree deeper than the limit is ever allocated.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use crate::config::DEFAULT_MAX_NESTING_DEPTH;
use crate::error::{ColcalcError, Result, SecurityViolation};
use crate::parser::ast::{BinaryOp, Expr, Literal, UnaryOp};

#[derive(Parser)]
#[grammar = "parser/grammar.pest"]
struct ExpressionParser;

/// Parses expression text into an [`Expr`] tree with the default nesting
/// limit.
///
/// # Errors
///
/// Returns a `ParseError` if the text is syntactically invalid, or
/// `Security` if it nests deeper than the default limit.
pub fn parse_expression(text: &str) -> Result<Expr> {
    parse_expression_with_depth(text, DEFAULT_MAX_NESTING_DEPTH)
}

/// Parses expression text into an [`Expr`] tree no deeper than `max_depth`
/// nodes. The root is at depth 1.
///
/// # Errors
///
/// Returns `Security(NestingTooDeep)` once nesting exceeds `max_depth`, or a
/// `ParseError` if the text is syntactically invalid.
pub fn parse_expression_with_depth(text: &str, max_depth: usize) -> Result<Expr> {
    check_nesting(text, max_depth)?;

    let mut pairs = ExpressionParser::parse(Rule::expression, text).map_err(|e| {
        let (line, col) = match e.line_col {
            pest::error::LineColLocation::Pos((l, c))
            | pest::error::LineColLocation::Span((l, c), _) => (l, c),
        };
        ColcalcError::ParseError {
            line,
            col,
            message: e.variant.message().to_string(),
        }
    })?;

    let root = pairs.next().ok_or_else(|| ColcalcError::ParseError {
        line: 0,
        col: 0,
        message: "No expression found".into(),
    })?;
    let builder = TreeBuilder { limit: max_depth };
    for inner in root.into_inner() {
        if inner.as_rule() == Rule::expr {
            return builder.node(inner, 1);
        }
    }
    Err(ColcalcError::ParseError {
        line: 0,
        col: 0,
        message: "No expression found".into(),
    })
}

fn too_deep(limit: usize) -> ColcalcError {
    SecurityViolation::NestingTooDeep { limit }.into()
}

/// Bounds the constructs that make pest recurse: brackets, and ternaries
/// whose branches run to the end of the enclosing group. Quoted sections are
/// skipped.
fn check_nesting(text: &str, limit: usize) -> Result<()> {
    // Open ternaries per bracket level; index 0 is the top level.
    let mut ternaries: Vec<usize> = vec![0];
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' && q != '`' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '?' if chars.peek() == Some(&'?') => {
                chars.next();
            }
            '?' | '(' => {
                depth += 1;
                if depth > limit {
                    return Err(too_deep(limit));
                }
                if c == '(' {
                    ternaries.push(0);
                } else if let Some(open) = ternaries.last_mut() {
                    *open += 1;
                }
            }
            ')' if ternaries.len() > 1 => {
                let open = ternaries.pop().unwrap_or(0);
                depth = depth.saturating_sub(open + 1);
            }
            ',' => {
                if let Some(open) = ternaries.last_mut() {
                    depth = depth.saturating_sub(*open);
                    *open = 0;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_error(pair: &Pair<Rule>, message: impl Into<String>) -> ColcalcError {
    let (line, col) = pair.as_span().start_pos().line_col();
    ColcalcError::ParseError {
        line,
        col,
        message: message.into(),
    }
}

/// Folds pest pairs into `Expr` nodes. `depth` is the depth of the node being
/// built; grammar wrappers that produce no node of their own pass it through.
struct TreeBuilder {
    limit: usize,
}

impl TreeBuilder {
    fn check(&self, depth: usize) -> Result<()> {
        if depth > self.limit {
            return Err(too_deep(self.limit));
        }
        Ok(())
    }

    fn node(&self, pair: Pair<Rule>, depth: usize) -> Result<Expr> {
        self.check(depth)?;
        match pair.as_rule() {
            Rule::expr => self.conditional(pair, depth),
            Rule::coalesce
            | Rule::or_expr
            | Rule::and_expr
            | Rule::additive
            | Rule::multiplicative => self.binary_chain(pair, depth),
            Rule::not_expr => self.prefixed(pair, depth, Rule::not_op, UnaryOp::Not),
            Rule::unary => self.prefixed(pair, depth, Rule::neg_op, UnaryOp::Neg),
            Rule::comparison => self.comparison(pair, depth),
            Rule::primary => self.primary(pair, depth),
            Rule::literal => Ok(Expr::Literal(build_literal(pair)?)),
            Rule::function_call => self.call(pair, depth),
            Rule::column_ref => Ok(build_column_ref(pair)),
            rule => Err(parse_error(&pair, format!("Unexpected rule {rule:?}"))),
        }
    }

    fn conditional(&self, pair: Pair<Rule>, depth: usize) -> Result<Expr> {
        let span = pair.clone();
        let mut parts = pair.into_inner();
        let condition = parts
            .next()
            .ok_or_else(|| parse_error(&span, "Empty expression"))?;

        match (parts.next(), parts.next()) {
            (Some(then_branch), Some(else_branch)) => Ok(Expr::Conditional {
                condition: Box::new(self.node(condition, depth + 1)?),
                then_branch: Box::new(self.node(then_branch, depth + 1)?),
                else_branch: Box::new(self.node(else_branch, depth + 1)?),
            }),
            (None, _) => self.node(condition, depth),
            (Some(_), None) => Err(parse_error(&span, "Conditional requires both branches")),
        }
    }

    /// Folds `operand (op operand)*` left-associatively. With `k` operators
    /// the first operand sits `k` levels below the chain's root, so the whole
    /// chain is rejected before any of it is built if that exceeds the limit.
    fn binary_chain(&self, pair: Pair<Rule>, depth: usize) -> Result<Expr> {
        let span = pair.clone();
        let parts: Vec<Pair<Rule>> = pair.into_inner().collect();
        let links = parts.len() / 2;
        self.check(depth.saturating_add(links))?;

        let mut parts = parts.into_iter();
        let first = parts
            .next()
            .ok_or_else(|| parse_error(&span, "Missing operand"))?;
        let mut left = self.node(first, depth + links)?;

        let mut level = depth + links;
        while let Some(op_pair) = parts.next() {
            let op = BinaryOp::parse(op_pair.as_str().trim()).ok_or_else(|| {
                parse_error(&op_pair, format!("Unknown operator: {}", op_pair.as_str()))
            })?;
            let right = parts
                .next()
                .ok_or_else(|| parse_error(&op_pair, "Missing right operand"))?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(self.node(right, level)?),
            };
            level -= 1;
        }

        Ok(left)
    }

    /// Builds `prefix* operand`, applying prefixes innermost-last.
    fn prefixed(&self, pair: Pair<Rule>, depth: usize, prefix: Rule, op: UnaryOp) -> Result<Expr> {
        let span = pair.clone();
        let mut prefixes = 0usize;
        let mut operand = None;
        for inner in pair.into_inner() {
            if inner.as_rule() == prefix {
                prefixes += 1;
            } else {
                operand = Some(self.node(inner, depth + prefixes)?);
            }
        }

        let mut expr = operand.ok_or_else(|| parse_error(&span, "Missing operand"))?;
        for _ in 0..prefixes {
            expr = Expr::Unary {
                op,
                operand: Box::new(expr),
            };
        }
        Ok(expr)
    }

    fn comparison(&self, pair: Pair<Rule>, depth: usize) -> Result<Expr> {
        let span = pair.clone();
        let mut parts = pair.into_inner();
        let left = parts
            .next()
            .ok_or_else(|| parse_error(&span, "Missing operand"))?;

        let Some(op_pair) = parts.next() else {
            return self.node(left, depth);
        };
        let op = BinaryOp::parse(op_pair.as_str())
            .ok_or_else(|| parse_error(&op_pair, format!("Unknown operator: {}", op_pair.as_str())))?;
        let right = parts
            .next()
            .ok_or_else(|| parse_error(&op_pair, "Missing right operand"))?;

        Ok(Expr::Binary {
            left: Box::new(self.node(left, depth + 1)?),
            op,
            right: Box::new(self.node(right, depth + 1)?),
        })
    }

    fn primary(&self, pair: Pair<Rule>, depth: usize) -> Result<Expr> {
        let span = pair.clone();
        let inner = pair
            .into_inner()
            .next()
            .ok_or_else(|| parse_error(&span, "Empty primary expression"))?;
        self.node(inner, depth)
    }

    fn call(&self, pair: Pair<Rule>, depth: usize) -> Result<Expr> {
        let mut name = String::new();
        let mut args = Vec::new();
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::identifier => name = inner.as_str().to_string(),
                _ => args.push(self.node(inner, depth + 1)?),
            }
        }
        Ok(Expr::Call { name, args })
    }
}

fn build_column_ref(pair: Pair<Rule>) -> Expr {
    let text = pair.as_str();
    let name = text
        .strip_prefix('`')
        .and_then(|s| s.strip_suffix('`'))
        .unwrap_or(text);
    Expr::Column(name.to_string())
}

fn build_literal(pair: Pair<Rule>) -> Result<Literal> {
    let span = pair.clone();
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| parse_error(&span, "Empty literal"))?;

    match inner.as_rule() {
        Rule::integer_literal => inner
            .as_str()
            .parse::<i64>()
            .map(Literal::Int64)
            .map_err(|_| parse_error(&inner, format!("Integer out of range: {}", inner.as_str()))),
        Rule::float_literal => inner
            .as_str()
            .parse::<f64>()
            .map(Literal::Float64)
            .map_err(|_| parse_error(&inner, format!("Invalid float: {}", inner.as_str()))),
        Rule::string_literal => {
            let raw = inner.into_inner().next().map_or("", |p| p.as_str());
            Ok(Literal::String(unescape(raw)))
        }
        Rule::bool_literal => Ok(Literal::Bool(inner.as_str().eq_ignore_ascii_case("true"))),
        Rule::null_literal => Ok(Literal::Null),
        rule => Err(parse_error(&inner, format!("Unexpected literal {rule:?}"))),
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str) -> Box<Expr> {
        Box::new(Expr::Column(name.into()))
    }

    fn int(v: i64) -> Box<Expr> {
        Box::new(Expr::Literal(Literal::Int64(v)))
    }

    #[test]
    fn test_precedence() {
        let expr = parse_expression("a + b * 2").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                left: col("a"),
                op: BinaryOp::Add,
                right: Box::new(Expr::Binary {
                    left: col("b"),
                    op: BinaryOp::Mul,
                    right: int(2),
                }),
            }
        );
    }

    #[test]
    fn test_left_associative_subtraction() {
        let expr = parse_expression("10 - 3 - 2").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                left: Box::new(Expr::Binary {
                    left: int(10),
                    op: BinaryOp::Sub,
                    right: int(3),
                }),
                op: BinaryOp::Sub,
                right: int(2),
            }
        );
    }

    #[test]
    fn test_ternary_and_coalesce() {
        let expr = parse_expression("x ?? 0 > 1 ? 'hi' : \"lo\"").unwrap();
        let Expr::Conditional { condition, .. } = expr else {
            panic!("expected conditional");
        };
        assert!(matches!(
            *condition,
            Expr::Binary {
                op: BinaryOp::Coalesce,
                ..
            }
        ));
    }

    #[test]
    fn test_keywords_and_logic() {
        let expr = parse_expression("not a AND b or c").unwrap();
        let Expr::Binary { op, left, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Or);
        assert!(matches!(*left, Expr::Binary { op: BinaryOp::And, .. }));
    }

    #[test]
    fn test_function_call_and_quoted_identifier() {
        let expr = parse_expression("round(`unit price` * 1.5, 2)").unwrap();
        let Expr::Call { name, args } = expr else {
            panic!("expected call");
        };
        assert_eq!(name, "round");
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].referenced_columns(), vec!["unit price"]);
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            parse_expression("'it\\'s'").unwrap(),
            Expr::Literal(Literal::String("it's".into()))
        );
        assert_eq!(
            parse_expression("TRUE").unwrap(),
            Expr::Literal(Literal::Bool(true))
        );
        assert_eq!(parse_expression("null").unwrap(), Expr::Literal(Literal::Null));
        assert_eq!(
            parse_expression("2.5e1").unwrap(),
            Expr::Literal(Literal::Float64(25.0))
        );
    }

    #[test]
    fn test_unary_minus() {
        let expr = parse_expression("--x").unwrap();
        let Expr::Unary { op, operand } = expr else {
            panic!("expected unary");
        };
        assert_eq!(op, UnaryOp::Neg);
        assert!(matches!(*operand, Expr::Unary { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(
            parse_expression("a +"),
            Err(ColcalcError::ParseError { .. })
        ));
        assert!(parse_expression("(a").is_err());
        assert!(parse_expression("").is_err());
        assert!(parse_expression("99999999999999999999").is_err());
    }

    fn too_deep(result: Result<Expr>) -> bool {
        matches!(
            result,
            Err(ColcalcError::Security(SecurityViolation::NestingTooDeep { .. }))
        )
    }

    #[test]
    fn test_depth_counts_tree_levels() {
        // `a + b + c` is ((a + b) + c): leaves a and b sit at depth 3
        assert!(parse_expression_with_depth("a + b + c", 3).is_ok());
        assert!(too_deep(parse_expression_with_depth("a + b + c", 2)));

        assert!(parse_expression_with_depth("--x", 3).is_ok());
        assert!(too_deep(parse_expression_with_depth("--x", 2)));

        assert!(parse_expression_with_depth("f(g(x))", 3).is_ok());
        assert!(too_deep(parse_expression_with_depth("f(g(x))", 2)));

        assert!(parse_expression_with_depth("x", 1).is_ok());
    }

    #[test]
    fn test_nesting_scan() {
        assert!(check_nesting("a ?? b ?? c", 1).is_ok());
        assert!(check_nesting("a ? b : c", 1).is_ok());
        assert!(check_nesting("a ? b : c ? d : e", 1).is_err());
        assert!(check_nesting("f(a ? b : c, d ? e : g)", 2).is_ok());
        assert!(check_nesting("'?(?(?(' + x", 1).is_ok());
        assert!(check_nesting(")))(", 1).is_ok());
    }
}
