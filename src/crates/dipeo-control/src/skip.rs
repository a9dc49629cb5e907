//! Skip-propagation rules, ported from `skip_manager.py`'s `SkipManager`
//! with the closed, renamed taxonomy `SPEC_FULL.md` §9 specifies.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::expr::{evaluate_condition, Value};

/// Closed skip-reason taxonomy. Kept deliberately small: every SKIPPED
/// transition carries exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    MaxIterationsReached,
    ConditionNotMet,
    DependencySkipped,
    DependencyFailed,
    UserRequested,
    FirstOnlyConsumed,
}

/// One incoming edge, as the skip controller needs to see it: who the
/// source is, its current terminal state (if any), and whether this edge
/// is an optional `first_only` input that never forces a skip.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub source_skipped: bool,
    pub source_failed: bool,
    pub optional: bool,
}

/// Everything the controller needs to decide one node's skip rules,
/// assembled by the Engine from the Graph, Store, and Loop Controller.
pub struct SkipCheck<'a> {
    pub iteration_count: u32,
    pub max_iterations: Option<u32>,
    pub skip_condition: Option<&'a str>,
    pub condition_context: &'a HashMap<String, Value>,
    pub dependencies: &'a [Dependency],
    pub first_only_prompt_consumed: bool,
    pub has_first_only_prompt: bool,
    pub has_default_prompt: bool,
}

#[derive(Default)]
pub struct SkipController {
    skipped: RwLock<HashSet<String>>,
    reasons: RwLock<HashMap<String, SkipReason>>,
}

impl SkipController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_skipped(&self, node_id: &str) -> bool {
        self.skipped.read().contains(node_id)
    }

    pub fn skip_reason(&self, node_id: &str) -> Option<SkipReason> {
        self.reasons.read().get(node_id).copied()
    }

    pub fn mark_skipped(&self, node_id: &str, reason: SkipReason) {
        self.skipped.write().insert(node_id.to_string());
        self.reasons.write().insert(node_id.to_string(), reason);
    }

    pub fn all_skipped(&self) -> HashMap<String, SkipReason> {
        self.reasons.read().clone()
    }

    /// Runs the four skip rules in order and records the first match.
    /// A node already recorded as skipped short-circuits re-evaluation.
    pub fn evaluate(&self, node_id: &str, check: &SkipCheck<'_>) -> Option<SkipReason> {
        if let Some(reason) = self.skip_reason(node_id) {
            return Some(reason);
        }

        let reason = Self::max_iterations_reached(check)
            .or_else(|| Self::condition_not_met(check))
            .or_else(|| Self::dependencies_unsatisfied(check))
            .or_else(|| Self::first_only_already_consumed(check));

        if let Some(reason) = reason {
            self.mark_skipped(node_id, reason);
        }
        reason
    }

    fn max_iterations_reached(check: &SkipCheck<'_>) -> Option<SkipReason> {
        let max = check.max_iterations?;
        (check.iteration_count >= max).then_some(SkipReason::MaxIterationsReached)
    }

    fn condition_not_met(check: &SkipCheck<'_>) -> Option<SkipReason> {
        let condition = check.skip_condition?;
        evaluate_condition(condition, check.condition_context).then_some(SkipReason::ConditionNotMet)
    }

    /// Skips only when there is at least one *required* dependency and
    /// every required dependency was skipped or failed. Optional
    /// (`first_only`) dependencies never force a skip on their own.
    fn dependencies_unsatisfied(check: &SkipCheck<'_>) -> Option<SkipReason> {
        let required: Vec<&Dependency> = check.dependencies.iter().filter(|d| !d.optional).collect();
        if required.is_empty() {
            return None;
        }
        if required.iter().all(|d| d.source_skipped || d.source_failed) {
            if required.iter().any(|d| d.source_failed) {
                Some(SkipReason::DependencyFailed)
            } else {
                Some(SkipReason::DependencySkipped)
            }
        } else {
            None
        }
    }

    fn first_only_already_consumed(check: &SkipCheck<'_>) -> Option<SkipReason> {
        (check.has_first_only_prompt && check.first_only_prompt_consumed && !check.has_default_prompt)
            .then_some(SkipReason::FirstOnlyConsumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_check() -> SkipCheck<'static> {
        SkipCheck {
            iteration_count: 0,
            max_iterations: None,
            skip_condition: None,
            condition_context: Box::leak(Box::new(HashMap::new())),
            dependencies: &[],
            first_only_prompt_consumed: false,
            has_first_only_prompt: false,
            has_default_prompt: false,
        }
    }

    #[test]
    fn no_rule_matches_means_no_skip() {
        let ctrl = SkipController::new();
        assert_eq!(ctrl.evaluate("n", &base_check()), None);
    }

    #[test]
    fn max_iterations_rule_wins_first() {
        let ctrl = SkipController::new();
        let mut check = base_check();
        check.max_iterations = Some(2);
        check.iteration_count = 2;
        assert_eq!(ctrl.evaluate("n", &check), Some(SkipReason::MaxIterationsReached));
    }

    #[test]
    fn already_skipped_short_circuits() {
        let ctrl = SkipController::new();
        ctrl.mark_skipped("n", SkipReason::UserRequested);
        assert_eq!(ctrl.evaluate("n", &base_check()), Some(SkipReason::UserRequested));
    }

    #[test]
    fn required_dependency_skipped_propagates() {
        let ctrl = SkipController::new();
        let mut check = base_check();
        let deps = vec![Dependency {
            source_skipped: true,
            source_failed: false,
            optional: false,
        }];
        check.dependencies = &deps;
        assert_eq!(ctrl.evaluate("n", &check), Some(SkipReason::DependencySkipped));
    }

    #[test]
    fn failed_dependency_yields_dependency_failed() {
        let ctrl = SkipController::new();
        let mut check = base_check();
        let deps = vec![Dependency {
            source_skipped: false,
            source_failed: true,
            optional: false,
        }];
        check.dependencies = &deps;
        assert_eq!(ctrl.evaluate("n", &check), Some(SkipReason::DependencyFailed));
    }

    #[test]
    fn optional_dependency_never_forces_skip() {
        let ctrl = SkipController::new();
        let mut check = base_check();
        let deps = vec![Dependency {
            source_skipped: true,
            source_failed: false,
            optional: true,
        }];
        check.dependencies = &deps;
        assert_eq!(ctrl.evaluate("n", &check), None);
    }

    #[test]
    fn first_only_consumed_without_default_prompt_skips() {
        let ctrl = SkipController::new();
        let mut check = base_check();
        check.has_first_only_prompt = true;
        check.first_only_prompt_consumed = true;
        assert_eq!(ctrl.evaluate("n", &check), Some(SkipReason::FirstOnlyConsumed));
    }

    #[test]
    fn first_only_consumed_but_default_prompt_present_does_not_skip() {
        let ctrl = SkipController::new();
        let mut check = base_check();
        check.has_first_only_prompt = true;
        check.first_only_prompt_consumed = true;
        check.has_default_prompt = true;
        assert_eq!(ctrl.evaluate("n", &check), None);
    }
}
