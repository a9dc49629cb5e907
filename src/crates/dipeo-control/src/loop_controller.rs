//! Per-node iteration bookkeeping and loop-termination queries.
//!
//! A direct port of `loop_controller.py`'s `LoopController`, generalized
//! to be safely shared across the worker pool: every method takes `&self`
//! and guards its maps with `parking_lot::RwLock` rather than requiring
//! the caller to hold `&mut` across an `await`.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

/// Iteration bookkeeping for one execution's loop-capable nodes.
pub struct LoopController {
    global_max_iterations: u32,
    loop_nodes: RwLock<HashSet<String>>,
    node_max_iterations: RwLock<HashMap<String, u32>>,
    iteration_counts: RwLock<HashMap<String, u32>>,
}

impl LoopController {
    pub fn new(global_max_iterations: u32) -> Self {
        Self {
            global_max_iterations,
            loop_nodes: RwLock::new(HashSet::new()),
            node_max_iterations: RwLock::new(HashMap::new()),
            iteration_counts: RwLock::new(HashMap::new()),
        }
    }

    /// The global ceiling always applies as a safety net, even under a
    /// looser node-specific limit: `effective_max = min(node_specific,
    /// global)` when a node-specific limit is registered, else `global`.
    fn effective_max(&self, node_id: &str) -> u32 {
        match self.node_max_iterations.read().get(node_id) {
            Some(&n) => n.min(self.global_max_iterations),
            None => self.global_max_iterations,
        }
    }

    pub fn register(&self, node_id: &str, max_iterations: Option<u32>) {
        self.loop_nodes.write().insert(node_id.to_string());
        if let Some(max_iterations) = max_iterations {
            self.node_max_iterations.write().insert(node_id.to_string(), max_iterations);
        }
        self.iteration_counts.write().entry(node_id.to_string()).or_insert(0);
    }

    pub fn is_registered(&self, node_id: &str) -> bool {
        self.loop_nodes.read().contains(node_id)
    }

    pub fn iteration_count(&self, node_id: &str) -> u32 {
        self.iteration_counts.read().get(node_id).copied().unwrap_or(0)
    }

    /// False once a registered node's iteration count reaches its
    /// effective max. Unregistered nodes always continue.
    pub fn should_continue(&self, node_id: &str) -> bool {
        if !self.is_registered(node_id) {
            return true;
        }
        self.iteration_count(node_id) < self.effective_max(node_id)
    }

    pub fn increment(&self, node_id: &str) -> u32 {
        let mut counts = self.iteration_counts.write();
        let count = counts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Increment then check; the Engine calls this once per completed
    /// iteration of a loop node.
    pub fn mark_complete(&self, node_id: &str) -> (bool, u32) {
        let new_count = self.increment(node_id);
        (self.should_continue(node_id), new_count)
    }

    pub fn reset(&self, node_id: &str) {
        self.iteration_counts.write().insert(node_id.to_string(), 0);
    }

    /// `Some(remaining)` for a registered node, `None` for one the loop
    /// controller doesn't track (unbounded by this controller's policy).
    pub fn remaining(&self, node_id: &str) -> Option<u32> {
        if !self.is_registered(node_id) {
            return None;
        }
        Some(self.effective_max(node_id).saturating_sub(self.iteration_count(node_id)))
    }

    /// At least one registered loop node has reached its effective max.
    pub fn any_loop_at_max(&self) -> bool {
        self.loop_nodes
            .read()
            .iter()
            .any(|id| self.iteration_count(id) >= self.effective_max(id))
    }

    /// Every registered loop node has reached its effective max; an empty
    /// registry is never "all at max" (there is nothing to terminate).
    pub fn all_loops_at_max(&self) -> bool {
        let loop_nodes = self.loop_nodes.read();
        !loop_nodes.is_empty()
            && loop_nodes
                .iter()
                .all(|id| self.iteration_count(id) >= self.effective_max(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_node_always_continues() {
        let ctrl = LoopController::new(100);
        assert!(ctrl.should_continue("a"));
        assert_eq!(ctrl.remaining("a"), None);
    }

    #[test]
    fn node_specific_limit_stops_iteration() {
        let ctrl = LoopController::new(100);
        ctrl.register("p", Some(3));
        for _ in 0..3 {
            ctrl.mark_complete("p");
        }
        assert!(!ctrl.should_continue("p"));
        assert_eq!(ctrl.iteration_count("p"), 3);
        assert_eq!(ctrl.remaining("p"), Some(0));
    }

    #[test]
    fn global_ceiling_applies_even_under_a_looser_node_limit() {
        let ctrl = LoopController::new(2);
        ctrl.register("p", Some(1000));
        ctrl.mark_complete("p");
        ctrl.mark_complete("p");
        assert!(!ctrl.should_continue("p"));
    }

    #[test]
    fn all_loops_at_max_is_false_for_empty_registry() {
        let ctrl = LoopController::new(100);
        assert!(!ctrl.all_loops_at_max());
    }

    #[test]
    fn all_loops_at_max_requires_every_registered_node() {
        let ctrl = LoopController::new(100);
        ctrl.register("a", Some(1));
        ctrl.register("b", Some(2));
        ctrl.mark_complete("a");
        assert!(!ctrl.all_loops_at_max());
        assert!(ctrl.any_loop_at_max());
        ctrl.mark_complete("b");
        ctrl.mark_complete("b");
        assert!(ctrl.all_loops_at_max());
    }

    #[test]
    fn reset_zeroes_the_counter() {
        let ctrl = LoopController::new(100);
        ctrl.register("p", Some(2));
        ctrl.mark_complete("p");
        ctrl.mark_complete("p");
        assert!(!ctrl.should_continue("p"));
        ctrl.reset("p");
        assert!(ctrl.should_continue("p"));
        assert_eq!(ctrl.iteration_count("p"), 0);
    }
}
