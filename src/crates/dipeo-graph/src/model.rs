//! Node, arrow, and handle types that make up a normalized diagram.
//!
//! These mirror the shapes the loader (out of scope for this crate) hands
//! in after parsing a diagram authoring format: plain, serializable data
//! with no behavior attached. [`crate::build`] turns a [`DiagramInput`] of
//! these into a validated, queryable [`crate::Graph`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub type NodeId = String;
pub type HandleName = String;
pub type PersonId = String;

/// Reserved node type for the single required entry point of a diagram.
pub const START_NODE_TYPE: &str = "start";

/// Node types permitted to run more than once per execution without any
/// `max_iterations` override on their own `data`.
const ALWAYS_ITERATIVE_TYPES: &[&str] = &["person_job", "person_batch_job"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

/// A named input or output port on a node, with a declared data type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    pub node_id: NodeId,
    pub name: HandleName,
    pub direction: Direction,
    pub data_type: String,
}

/// A single vertex in the diagram.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub data: HashMap<String, Value>,
    #[serde(default)]
    pub position: Option<Position>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// One endpoint of an [`Arrow`]: a node and one of its declared handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleRef {
    pub node_id: NodeId,
    pub handle: HandleName,
}

impl HandleRef {
    pub fn new(node_id: impl Into<NodeId>, handle: impl Into<HandleName>) -> Self {
        Self {
            node_id: node_id.into(),
            handle: handle.into(),
        }
    }
}

/// A directed edge connecting a source handle on one node to a target
/// handle on another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arrow {
    pub id: String,
    pub source: HandleRef,
    pub target: HandleRef,
    #[serde(default)]
    pub data: Option<Value>,
}

/// LLM agent configuration referenced by `person_job` nodes. The core
/// treats this as opaque data; it never interprets `config` itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonConfig {
    pub id: PersonId,
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

/// Raw, unvalidated diagram data as handed to [`crate::build`] by the
/// (out-of-scope) loader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagramInput {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub arrows: Vec<Arrow>,
    #[serde(default)]
    pub handles: Vec<Handle>,
    #[serde(default)]
    pub persons: Vec<PersonConfig>,
}

/// Returns the `max_iterations` a node declares in `data`, if any,
/// including an explicit `0`. Zero is a real, distinct limit — "never run
/// iteratively" per `SPEC_FULL.md` §8 — not the absence of a declaration,
/// so callers that need "is this node's loop bounded at all" should use
/// [`declared_positive_max_iterations`] instead.
pub(crate) fn declared_max_iterations(node: &Node) -> Option<u32> {
    node.data.get("max_iterations").and_then(Value::as_u64).map(|n| n as u32)
}

/// Like [`declared_max_iterations`] but treats `0` as absent. Used only by
/// the generic "any node with a positive `max_iterations`" iterative-type
/// rule: a node that merely sets `max_iterations: 0` should not become
/// iterative on that basis alone.
fn declared_positive_max_iterations(node: &Node) -> Option<u32> {
    declared_max_iterations(node).filter(|&n| n > 0)
}

/// Iterative node types per `SPEC_FULL.md` §4.1: `person_job`,
/// `person_batch_job`, `condition` gated on `max_iterations`, or any node
/// carrying a positive `data.max_iterations`.
pub(crate) fn node_is_iterative(node: &Node) -> bool {
    if ALWAYS_ITERATIVE_TYPES.contains(&node.node_type.as_str()) {
        return true;
    }
    if node.node_type == "condition"
        && node
            .data
            .get("condition_type")
            .and_then(Value::as_str)
            .map(|s| s == "max_iterations")
            .unwrap_or(false)
    {
        return true;
    }
    declared_positive_max_iterations(node).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_with(node_type: &str, data: HashMap<String, Value>) -> Node {
        Node { id: "n".into(), node_type: node_type.into(), data, position: None }
    }

    #[test]
    fn explicit_zero_max_iterations_is_distinct_from_absent() {
        let with_zero = node_with("code_job", HashMap::from([("max_iterations".to_string(), Value::from(0))]));
        let without = node_with("code_job", HashMap::new());

        assert_eq!(declared_max_iterations(&with_zero), Some(0));
        assert_eq!(declared_max_iterations(&without), None);

        // The generic iterative-type rule only fires on a *positive*
        // max_iterations: a bare `code_job` with `max_iterations: 0` never
        // becomes iterative on that basis.
        assert!(!node_is_iterative(&with_zero));
        assert!(!node_is_iterative(&without));
    }

    #[test]
    fn person_job_with_explicit_zero_still_registers_the_zero_limit() {
        let node = node_with("person_job", HashMap::from([("max_iterations".to_string(), Value::from(0))]));
        assert!(node_is_iterative(&node));
        assert_eq!(declared_max_iterations(&node), Some(0));
    }
}
