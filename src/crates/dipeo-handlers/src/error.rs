//! Errors produced while looking up, validating, or invoking a handler.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    /// No handler is registered for a node type. Raised during the
    /// validation phase, before an `ExecutionState` is created.
    #[error("no executor registered for node type '{0}'")]
    NoExecutor(String),

    /// `node.data` failed the handler's declared props schema.
    #[error("node '{node_id}' failed schema validation: {reason}")]
    SchemaValidation { node_id: String, reason: String },

    /// A `conversation`-typed input arrived in a shape other than the one
    /// canonical form `[{role, content, person_id?}]` fixes (Open Question
    /// resolution in `DESIGN.md`).
    #[error("node '{node_id}' received a conversation input in an unrecognized shape")]
    InvalidConversationShape { node_id: String },

    /// The handler body raised. Carries an optional machine-readable code
    /// so the Engine can distinguish a plain failure from a timeout.
    #[error("handler for node '{node_id}' failed: {message}")]
    Failed {
        node_id: String,
        message: String,
        code: Option<&'static str>,
    },

    /// A handler's declared `timeout` (or the global `node_timeout`)
    /// elapsed before it completed. Represented distinctly here but
    /// treated as a `HandlerError` with code `"timeout"` once it crosses
    /// into `dipeo-engine`.
    #[error("handler for node '{0}' timed out")]
    Timeout(String),

    /// The handler observed its cancellation token before completing.
    #[error("handler for node '{0}' was cancelled")]
    Cancelled(String),
}

impl HandlerError {
    pub fn node_id(&self) -> Option<&str> {
        match self {
            HandlerError::SchemaValidation { node_id, .. }
            | HandlerError::InvalidConversationShape { node_id }
            | HandlerError::Failed { node_id, .. } => Some(node_id),
            HandlerError::Timeout(node_id) | HandlerError::Cancelled(node_id) => Some(node_id),
            HandlerError::NoExecutor(_) => None,
        }
    }

    /// Machine-readable error code, `None` for plain `Failed` handlers that
    /// didn't set one.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            HandlerError::Timeout(_) => Some("timeout"),
            HandlerError::Cancelled(_) => Some("cancelled"),
            HandlerError::Failed { code, .. } => *code,
            _ => None,
        }
    }
}
