//! Validation and topological leveling of a [`DiagramInput`] into a
//! [`Graph`].

use std::collections::{HashMap, HashSet};

use crate::error::{GraphValidationError, ValidationError};
use crate::model::{
    self, Arrow, DiagramInput, Handle, HandleName, Node, NodeId, PersonConfig, START_NODE_TYPE,
};

/// An immutable, validated diagram graph with a precomputed topological
/// order.
///
/// Constructed once by [`build`] and shared read-only across a single
/// execution; never mutated after validation.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: HashMap<NodeId, Node>,
    arrows: Vec<Arrow>,
    handles: HashMap<(NodeId, HandleName), Handle>,
    persons: HashMap<String, PersonConfig>,
    incoming: HashMap<NodeId, Vec<usize>>,
    outgoing: HashMap<NodeId, Vec<usize>>,
    back_edges: HashSet<usize>,
    levels: Vec<Vec<NodeId>>,
    start_node: NodeId,
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn start_node(&self) -> &NodeId {
        &self.start_node
    }

    pub fn persons(&self) -> &HashMap<String, PersonConfig> {
        &self.persons
    }

    /// Arrows whose `target` is `node_id`, in declaration order.
    pub fn incoming(&self, node_id: &str) -> Vec<&Arrow> {
        self.incoming
            .get(node_id)
            .map(|idxs| idxs.iter().map(|&i| &self.arrows[i]).collect())
            .unwrap_or_default()
    }

    /// Arrows whose `source` is `node_id`, in declaration order.
    pub fn outgoing(&self, node_id: &str) -> Vec<&Arrow> {
        self.outgoing
            .get(node_id)
            .map(|idxs| idxs.iter().map(|&i| &self.arrows[i]).collect())
            .unwrap_or_default()
    }

    /// Whether the arrow at `incoming`/`outgoing` index `arrow_id` is a
    /// back-edge excluded from the DAG used for levelization.
    pub fn is_back_edge(&self, arrow: &Arrow) -> bool {
        self.arrows
            .iter()
            .position(|a| a.id == arrow.id)
            .map(|idx| self.back_edges.contains(&idx))
            .unwrap_or(false)
    }

    pub fn is_iterative(&self, node_id: &str) -> bool {
        self.nodes
            .get(node_id)
            .map(model::node_is_iterative)
            .unwrap_or(false)
    }

    pub fn max_iterations(&self, node_id: &str) -> Option<u32> {
        self.nodes.get(node_id).and_then(model::declared_max_iterations)
    }

    /// Dependency-ordered levels; each inner list is a set of nodes with no
    /// mutual dependency and may be scheduled concurrently. Node ids within
    /// a level are sorted lexicographically for deterministic iteration.
    pub fn topological_order(&self) -> &[Vec<NodeId>] {
        &self.levels
    }
}

/// Validate and normalize a [`DiagramInput`], producing a [`Graph`] with a
/// precomputed topological order, or every violation found.
pub fn build(input: DiagramInput) -> Result<Graph, GraphValidationError> {
    let mut errors = Vec::new();

    let mut nodes: HashMap<NodeId, Node> = HashMap::with_capacity(input.nodes.len());
    for node in input.nodes {
        if nodes.contains_key(&node.id) {
            errors.push(ValidationError::DuplicateNodeId(node.id.clone()));
            continue;
        }
        nodes.insert(node.id.clone(), node);
    }

    let start_candidates: Vec<NodeId> = nodes
        .values()
        .filter(|n| n.node_type == START_NODE_TYPE)
        .map(|n| n.id.clone())
        .collect();
    let start_node = match start_candidates.len() {
        0 => {
            errors.push(ValidationError::MissingStartNode);
            None
        }
        1 => Some(start_candidates[0].clone()),
        _ => {
            errors.push(ValidationError::MultipleStartNodes(start_candidates));
            None
        }
    };

    let mut handles: HashMap<(NodeId, HandleName), Handle> =
        HashMap::with_capacity(input.handles.len());
    for handle in input.handles {
        handles.insert((handle.node_id.clone(), handle.name.clone()), handle);
    }

    let persons: HashMap<String, PersonConfig> =
        input.persons.into_iter().map(|p| (p.id.clone(), p)).collect();

    let mut incoming: HashMap<NodeId, Vec<usize>> = HashMap::new();
    let mut outgoing: HashMap<NodeId, Vec<usize>> = HashMap::new();
    let arrows = input.arrows;

    for (idx, arrow) in arrows.iter().enumerate() {
        let mut endpoint_ok = true;
        for (end_name, end) in [("source", &arrow.source), ("target", &arrow.target)] {
            if !nodes.contains_key(&end.node_id) {
                errors.push(ValidationError::UnknownNode {
                    arrow_id: arrow.id.clone(),
                    node_id: end.node_id.clone(),
                });
                endpoint_ok = false;
                continue;
            }
            if !handles.contains_key(&(end.node_id.clone(), end.handle.clone())) {
                errors.push(ValidationError::UndeclaredHandle {
                    arrow_id: arrow.id.clone(),
                    node_id: end.node_id.clone(),
                    handle: end.handle.clone(),
                });
                endpoint_ok = false;
            }
            let _ = end_name;
        }
        if !endpoint_ok {
            continue;
        }
        outgoing.entry(arrow.source.node_id.clone()).or_default().push(idx);
        incoming.entry(arrow.target.node_id.clone()).or_default().push(idx);
    }

    for node in nodes.values() {
        if let Some(person_id) = node.data.get("person_id").and_then(|v| v.as_str()) {
            if !persons.contains_key(person_id) {
                errors.push(ValidationError::UnknownPerson {
                    node_id: node.id.clone(),
                    person_id: person_id.to_string(),
                });
            }
        }
    }

    if !errors.is_empty() {
        return Err(GraphValidationError(errors));
    }

    let (back_edges, cycle_errors) = detect_back_edges(&nodes, &arrows, &outgoing);
    if !cycle_errors.is_empty() {
        return Err(GraphValidationError(cycle_errors));
    }

    let levels = compute_levels(&nodes, &arrows, &incoming, &back_edges);

    Ok(Graph {
        nodes,
        arrows,
        handles,
        persons,
        incoming,
        outgoing,
        back_edges,
        levels,
        start_node: start_node.expect("validated above"),
    })
}

/// DFS-based cycle detection. Any edge to a node still on the DFS stack is
/// a back-edge; it is permitted only when its target is iterative.
fn detect_back_edges(
    nodes: &HashMap<NodeId, Node>,
    arrows: &[Arrow],
    outgoing: &HashMap<NodeId, Vec<usize>>,
) -> (HashSet<usize>, Vec<ValidationError>) {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut color: HashMap<NodeId, Color> = nodes.keys().map(|id| (id.clone(), Color::White)).collect();
    let mut back_edges = HashSet::new();
    let mut errors = Vec::new();

    let mut node_ids: Vec<&NodeId> = nodes.keys().collect();
    node_ids.sort();

    for start in node_ids {
        if color[start] != Color::White {
            continue;
        }
        let mut stack: Vec<(NodeId, usize)> = vec![(start.clone(), 0)];
        color.insert(start.clone(), Color::Gray);

        while let Some((node_id, mut edge_idx)) = stack.pop() {
            let out_edges = outgoing.get(&node_id).map(Vec::as_slice).unwrap_or(&[]);
            let mut advanced = false;
            while edge_idx < out_edges.len() {
                let arrow_idx = out_edges[edge_idx];
                edge_idx += 1;
                let target = &arrows[arrow_idx].target.node_id;
                match color.get(target).copied().unwrap_or(Color::White) {
                    Color::White => {
                        stack.push((node_id.clone(), edge_idx));
                        color.insert(target.clone(), Color::Gray);
                        stack.push((target.clone(), 0));
                        advanced = true;
                        break;
                    }
                    Color::Gray => {
                        back_edges.insert(arrow_idx);
                        if !nodes.get(target).map(model::node_is_iterative).unwrap_or(false) {
                            errors.push(ValidationError::NonIterativeCycle {
                                arrow_id: arrows[arrow_idx].id.clone(),
                                node_id: target.clone(),
                            });
                        }
                    }
                    Color::Black => {}
                }
            }
            if !advanced {
                color.insert(node_id, Color::Black);
            }
        }
    }

    (back_edges, errors)
}

/// Kahn's algorithm over the forward (back-edge-excluded) subgraph,
/// grouping nodes into dependency-ordered levels.
fn compute_levels(
    nodes: &HashMap<NodeId, Node>,
    arrows: &[Arrow],
    incoming: &HashMap<NodeId, Vec<usize>>,
    back_edges: &HashSet<usize>,
) -> Vec<Vec<NodeId>> {
    let forward_in_degree = |node_id: &str| -> usize {
        incoming
            .get(node_id)
            .map(|idxs| idxs.iter().filter(|&&i| !back_edges.contains(&i)).count())
            .unwrap_or(0)
    };

    let mut remaining: HashMap<NodeId, usize> =
        nodes.keys().map(|id| (id.clone(), forward_in_degree(id))).collect();

    let mut forward_outgoing: HashMap<NodeId, Vec<usize>> = HashMap::new();
    for (idx, arrow) in arrows.iter().enumerate() {
        if back_edges.contains(&idx) {
            continue;
        }
        forward_outgoing
            .entry(arrow.source.node_id.clone())
            .or_default()
            .push(idx);
    }

    let mut levels = Vec::new();
    let mut placed = 0usize;

    loop {
        let mut current: Vec<NodeId> = remaining
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| id.clone())
            .collect();
        if current.is_empty() {
            break;
        }
        current.sort();
        for id in &current {
            remaining.remove(id);
        }
        placed += current.len();

        for id in &current {
            for &arrow_idx in forward_outgoing.get(id).map(Vec::as_slice).unwrap_or(&[]) {
                let target = &arrows[arrow_idx].target.node_id;
                if let Some(deg) = remaining.get_mut(target) {
                    *deg = deg.saturating_sub(1);
                }
            }
        }

        levels.push(current);
    }

    debug_assert_eq!(
        placed,
        nodes.len(),
        "every node must be levelized once back-edges are excluded; a non-iterative \
         cycle should have been rejected by detect_back_edges"
    );

    levels
}
