//! Process-wide `node.type -> Handler` lookup, populated at startup and
//! read-only thereafter — the one piece of shared mutable state
//! `SPEC_FULL.md`'s Design Notes explicitly permits as "process-wide"
//! (everything else is threaded through constructors).

use std::collections::HashMap;
use std::sync::Arc;

use crate::contract::Handler;
use crate::error::HandlerError;

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `node_type`, replacing any prior
    /// registration. Call during process startup only; the registry is
    /// not intended to mutate once an execution is underway.
    pub fn register(&mut self, node_type: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(node_type.into(), handler);
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(node_type).cloned()
    }

    /// Checks that every `node_type` in `types` resolves to a registered
    /// handler, collecting every miss. Called during the Engine's
    /// validation phase, before an `ExecutionState` is created, so a
    /// diagram referencing an unregistered node type fails fast with
    /// `NoExecutorError` rather than mid-run.
    pub fn check_coverage<'a>(&self, types: impl IntoIterator<Item = &'a str>) -> Result<(), Vec<HandlerError>> {
        let mut missing = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for node_type in types {
            if seen.insert(node_type) && !self.handlers.contains_key(node_type) {
                missing.push(HandlerError::NoExecutor(node_type.to_string()));
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{CodeJobHandler, ConditionHandler, EndpointHandler, StartHandler};

    fn full_registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register("start", Arc::new(StartHandler));
        registry.register("endpoint", Arc::new(EndpointHandler));
        registry.register("condition", Arc::new(ConditionHandler));
        registry.register("code_job", Arc::new(CodeJobHandler));
        registry
    }

    #[test]
    fn coverage_passes_when_every_type_is_registered() {
        let registry = full_registry();
        assert!(registry.check_coverage(["start", "endpoint"]).is_ok());
    }

    #[test]
    fn coverage_reports_every_missing_type_once() {
        let registry = full_registry();
        let err = registry.check_coverage(["start", "person_job", "person_job", "db"]).unwrap_err();
        assert_eq!(err.len(), 2);
    }
}
