//! A tiny, sandboxed expression language for gating conditions.
//!
//! Replaces the source's `_evaluate_simple_expression`, which builds a
//! Python-syntax string and leans on operator-precedence bugs (comparison
//! operators are checked before logical ones, so `a > 1 && b > 2` would
//! mis-split on the first `>`). Here the expression is parsed once into an
//! explicit [`Expr`] tree — `||` binds loosest, then `&&`, then a single
//! comparison per operand — and evaluated against a read-only context map.
//! There is no function call, attribute access, or arbitrary code path:
//! literals are `null`, `true`/`false`, numbers, and quoted strings, and
//! variables resolve only through `{{name}}` / `${name}` lookups.

use std::collections::HashMap;

use tracing::warn;

use crate::error::ExprParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) => s.parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Null => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    Lt,
    Ge,
    Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Variable(String),
    Comparison {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// Parse a gating expression into an [`Expr`] tree without evaluating it.
pub fn parse(expression: &str) -> Result<Expr, ExprParseError> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(ExprParseError::Empty);
    }
    parse_or(trimmed)
}

fn parse_or(input: &str) -> Result<Expr, ExprParseError> {
    fold_logical(input, "||", LogicalOp::Or, parse_and)
}

fn parse_and(input: &str) -> Result<Expr, ExprParseError> {
    fold_logical(input, "&&", LogicalOp::And, parse_comparison)
}

fn fold_logical(
    input: &str,
    sep: &str,
    op: LogicalOp,
    mut next: impl FnMut(&str) -> Result<Expr, ExprParseError>,
) -> Result<Expr, ExprParseError> {
    let parts: Vec<&str> = input.split(sep).collect();
    if parts.iter().any(|p| p.trim().is_empty()) {
        return Err(ExprParseError::UnbalancedOperator(sep.to_string()));
    }
    let mut parts = parts.into_iter();
    let first = next(parts.next().expect("split always yields at least one part").trim())?;
    parts.try_fold(first, |acc, part| {
        Ok(Expr::Logical {
            op,
            left: Box::new(acc),
            right: Box::new(next(part.trim())?),
        })
    })
}

/// Operators are tried longest-first so `==`/`!=` don't swallow the `=`/`!`
/// of their three-character siblings `===`/`!==`.
const COMPARISON_TOKENS: &[(&str, CompareOp)] = &[
    ("===", CompareOp::Eq),
    ("!==", CompareOp::NotEq),
    ("==", CompareOp::Eq),
    ("!=", CompareOp::NotEq),
    (">=", CompareOp::Ge),
    ("<=", CompareOp::Le),
    (">", CompareOp::Gt),
    ("<", CompareOp::Lt),
];

fn parse_comparison(input: &str) -> Result<Expr, ExprParseError> {
    for (token, op) in COMPARISON_TOKENS {
        if let Some((left, right)) = input.split_once(token) {
            if left.trim().is_empty() || right.trim().is_empty() {
                return Err(ExprParseError::UnbalancedOperator((*token).to_string()));
            }
            return Ok(Expr::Comparison {
                op: *op,
                left: Box::new(parse_operand(left.trim())?),
                right: Box::new(parse_operand(right.trim())?),
            });
        }
    }
    parse_operand(input)
}

fn parse_operand(token: &str) -> Result<Expr, ExprParseError> {
    if let Some(name) = variable_name(token) {
        return Ok(Expr::Variable(name));
    }
    Ok(Expr::Literal(parse_literal(token)))
}

/// Recognizes `{{name}}` and `${name}` where `name` is alphanumeric/underscore.
fn variable_name(token: &str) -> Option<String> {
    let inner = if let Some(stripped) = token.strip_prefix("{{").and_then(|s| s.strip_suffix("}}")) {
        stripped
    } else if let Some(stripped) = token.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        stripped
    } else {
        return None;
    };
    let inner = inner.trim();
    (!inner.is_empty() && inner.chars().all(|c| c.is_alphanumeric() || c == '_')).then(|| inner.to_string())
}

fn parse_literal(token: &str) -> Value {
    let token = token.trim();
    if (token.starts_with('"') && token.ends_with('"') && token.len() >= 2)
        || (token.starts_with('\'') && token.ends_with('\'') && token.len() >= 2)
    {
        return Value::String(token[1..token.len() - 1].to_string());
    }
    match token.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" | "none" => return Value::Null,
        _ => {}
    }
    if let Ok(n) = token.parse::<f64>() {
        return Value::Number(n);
    }
    Value::String(token.to_string())
}

/// Evaluate a parsed expression against a read-only context. Unresolved
/// variables evaluate to `Value::Null`, never an error.
pub fn eval(expr: &Expr, context: &HashMap<String, Value>) -> Value {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Variable(name) => context.get(name).cloned().unwrap_or(Value::Null),
        Expr::Comparison { op, left, right } => {
            let l = eval(left, context);
            let r = eval(right, context);
            Value::Bool(compare(*op, &l, &r))
        }
        Expr::Logical { op, left, right } => {
            let l = eval(left, context).truthy();
            let r = eval(right, context).truthy();
            Value::Bool(match op {
                LogicalOp::And => l && r,
                LogicalOp::Or => l || r,
            })
        }
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
    match op {
        CompareOp::Eq => left == right,
        CompareOp::NotEq => left != right,
        CompareOp::Gt | CompareOp::Lt | CompareOp::Ge | CompareOp::Le => {
            match (left.as_f64(), right.as_f64()) {
                (Some(l), Some(r)) => match op {
                    CompareOp::Gt => l > r,
                    CompareOp::Lt => l < r,
                    CompareOp::Ge => l >= r,
                    CompareOp::Le => l <= r,
                    _ => unreachable!(),
                },
                _ => false,
            }
        }
    }
}

/// Parse and evaluate in one step; never propagates a fatal error. A
/// condition that fails to parse is logged at `warn!` and treated as false,
/// matching the gating node's false-branch fallback.
pub fn evaluate_condition(expression: &str, context: &HashMap<String, Value>) -> bool {
    match parse(expression) {
        Ok(expr) => eval(&expr, context).truthy(),
        Err(e) => {
            warn!(expression, error = %e, "failed to parse gating expression, treating as false");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn literal_true_and_false() {
        assert!(evaluate_condition("true", &ctx(&[])));
        assert!(!evaluate_condition("false", &ctx(&[])));
    }

    #[test]
    fn numeric_comparison() {
        assert!(evaluate_condition("5 > 3", &ctx(&[])));
        assert!(!evaluate_condition("5 < 3", &ctx(&[])));
        assert!(evaluate_condition("5 >= 5", &ctx(&[])));
    }

    #[test]
    fn variable_substitution_from_context() {
        let context = ctx(&[("count", Value::Number(3.0))]);
        assert!(evaluate_condition("{{count}} == 3", &context));
        assert!(evaluate_condition("${count} >= 2", &context));
    }

    #[test]
    fn unresolved_variable_is_null_not_an_error() {
        assert!(!evaluate_condition("{{missing}} == 1", &ctx(&[])));
        assert!(evaluate_condition("{{missing}} == null", &ctx(&[])));
    }

    #[test]
    fn logical_and_or_with_correct_precedence() {
        let context = ctx(&[("a", Value::Number(5.0)), ("b", Value::Number(1.0))]);
        assert!(evaluate_condition("{{a}} > 3 && {{b}} < 2", &context));
        assert!(!evaluate_condition("{{a}} > 3 && {{b}} > 2", &context));
        assert!(evaluate_condition("{{a}} < 3 || {{b}} < 2", &context));
    }

    #[test]
    fn malformed_expression_evaluates_false_not_error() {
        assert!(!evaluate_condition("{{a}} &&", &ctx(&[])));
        assert!(!evaluate_condition("", &ctx(&[])));
    }

    #[test]
    fn string_literal_equality() {
        assert!(evaluate_condition(r#"{{status}} == "done""#, &ctx(&[("status", Value::String("done".into()))])));
    }
}
