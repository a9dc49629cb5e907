//! Normalized diagram graph model: node/arrow/handle types, structural
//! validation, and topological leveling.
//!
//! A diagram enters this crate as a [`DiagramInput`] (plain, serializable
//! data with no behavior) and leaves as a [`Graph`]: a validated, read-only
//! structure with a precomputed, deterministic topological order that the
//! scheduler walks level by level.

mod build;
mod error;
mod model;

pub use build::{build, Graph};
pub use error::{GraphValidationError, ValidationError};
pub use model::{
    Arrow, DiagramInput, Direction, Handle, HandleName, HandleRef, Node, NodeId, PersonConfig,
    PersonId, Position, START_NODE_TYPE,
};


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn chain_diagram(len: usize) -> DiagramInput {
        let mut nodes = vec![node_start()];
        let mut arrows = Vec::new();
        let mut handles = vec![Handle {
            node_id: "n0".into(),
            name: "out".into(),
            direction: Direction::Output,
            data_type: "any".into(),
        }];
        for i in 1..len {
            let id = format!("n{i}");
            nodes.push(Node {
                id: id.clone(),
                node_type: "endpoint".into(),
                data: Default::default(),
                position: None,
            });
            handles.push(Handle {
                node_id: id.clone(),
                name: "in".into(),
                direction: Direction::Input,
                data_type: "any".into(),
            });
            handles.push(Handle {
                node_id: id.clone(),
                name: "out".into(),
                direction: Direction::Output,
                data_type: "any".into(),
            });
            arrows.push(Arrow {
                id: format!("arr{i}"),
                source: HandleRef::new(format!("n{}", i - 1), "out"),
                target: HandleRef::new(id, "in"),
                data: None,
            });
        }
        DiagramInput {
            nodes,
            arrows,
            handles,
            persons: vec![],
        }
    }

    fn node_start() -> Node {
        Node {
            id: "n0".into(),
            node_type: START_NODE_TYPE.into(),
            data: Default::default(),
            position: None,
        }
    }

    proptest! {
        /// Building the same diagram twice always yields the same level
        /// order: leveling depends only on graph structure, never on
        /// HashMap iteration order.
        #[test]
        fn level_order_is_deterministic(len in 2usize..12) {
            let input = chain_diagram(len);
            let g1 = build(input.clone()).unwrap();
            let g2 = build(input).unwrap();
            prop_assert_eq!(g1.topological_order(), g2.topological_order());
        }

        /// A pure chain always produces exactly `len` singleton levels, one
        /// node each, in chain order.
        #[test]
        fn chain_produces_singleton_levels(len in 2usize..12) {
            let input = chain_diagram(len);
            let graph = build(input).unwrap();
            let levels = graph.topological_order();
            prop_assert_eq!(levels.len(), len);
            for (i, level) in levels.iter().enumerate() {
                prop_assert_eq!(level, &vec![format!("n{i}")]);
            }
        }
    }
}
