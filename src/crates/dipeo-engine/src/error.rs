//! `EngineError`: the facade error type returned by `execute()`. Lower
//! crates' errors convert into it via `#[from]` at the boundary, matching
//! the layered-error-hierarchy note in `SPEC_FULL.md` §7.

use thiserror::Error;

use dipeo_graph::GraphValidationError;
use dipeo_handlers::HandlerError;
use dipeo_state::StateStoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] GraphValidationError),

    /// One or more node types in the graph have no registered handler.
    /// Raised during the validation phase, before an `ExecutionState` is
    /// created, per `SPEC_FULL.md` §4.6.
    #[error("{0:?}")]
    NoExecutor(Vec<HandlerError>),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Storage(#[from] StateStoreError),

    /// The ready set is empty, nodes remain non-terminal, and nothing is
    /// running: a cyclic dependency not covered by a registered iterative
    /// node.
    #[error("deadlock detected: {0} node(s) never became ready")]
    Deadlock(usize),

    #[error("execution {0} not found")]
    UnknownExecution(String),

    /// A second concurrent `pause` was requested on an already-paused
    /// execution.
    #[error("execution {0} is already paused")]
    AlreadyPaused(String),

    #[error("execution {0} is not paused")]
    NotPaused(String),
}
