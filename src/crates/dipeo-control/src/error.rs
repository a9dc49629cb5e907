//! Errors produced while parsing a gating expression or driving the loop
//! and skip controllers.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExprParseError {
    #[error("empty expression")]
    Empty,

    #[error("unbalanced operator in expression: '{0}'")]
    UnbalancedOperator(String),

    #[error("not a recognized literal, variable, or comparison: '{0}'")]
    UnrecognizedToken(String),
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("node '{0}' is not registered with the loop controller")]
    NodeNotRegistered(String),

    #[error("failed to parse gating expression: {0}")]
    Expr(#[from] ExprParseError),
}
