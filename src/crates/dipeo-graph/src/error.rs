//! Validation errors produced while building a [`crate::Graph`].

use crate::model::{HandleName, NodeId};
use thiserror::Error;

/// A single structural problem found while validating a diagram.
///
/// `build` collects every violation rather than stopping at the first one,
/// so callers can report the whole list to the diagram author at once.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("diagram has no node of type 'start'")]
    MissingStartNode,

    #[error("diagram has multiple start nodes: {0:?}")]
    MultipleStartNodes(Vec<NodeId>),

    #[error("duplicate node id: {0}")]
    DuplicateNodeId(NodeId),

    #[error("arrow '{arrow_id}' references unknown node '{node_id}'")]
    UnknownNode { arrow_id: String, node_id: NodeId },

    #[error("arrow '{arrow_id}' references undeclared handle '{node_id}.{handle}'")]
    UndeclaredHandle {
        arrow_id: String,
        node_id: NodeId,
        handle: HandleName,
    },

    #[error("node '{node_id}' references unknown person '{person_id}'")]
    UnknownPerson { node_id: NodeId, person_id: String },

    #[error(
        "arrow '{arrow_id}' creates a cycle into non-iterative node '{node_id}'; \
         back-edges must target a node registered as iterative"
    )]
    NonIterativeCycle { arrow_id: String, node_id: NodeId },
}

/// Aggregate of every violation found during [`crate::build`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("graph validation failed with {} error(s)", .0.len())]
pub struct GraphValidationError(pub Vec<ValidationError>);

impl GraphValidationError {
    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }
}
