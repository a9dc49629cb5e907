//! Per-execution control handles: cancellation, pause/resume, and the
//! event-sequence counter, looked up by `execution_id` from the public
//! `cancel`/`pause`/`resume` entry points.
//!
//! Grounded on `orchestrator`'s connection-pool registry shape (a
//! `DashMap` keyed by an opaque id, populated at start and torn down on
//! completion) generalized from connections to executions.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::events::SequenceCounter;

/// Live control surface for one in-flight execution. Dropped once the
/// execution reaches a terminal status.
pub struct ActiveExecution {
    pub cancellation: CancellationToken,
    paused: std::sync::atomic::AtomicBool,
    resume: Notify,
    pub sequence: SequenceCounter,
}

impl ActiveExecution {
    fn new() -> Self {
        Self {
            cancellation: CancellationToken::new(),
            paused: std::sync::atomic::AtomicBool::new(false),
            resume: Notify::new(),
            sequence: SequenceCounter::new(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Returns `false` if already paused (a second concurrent `pause`
    /// is rejected per `SPEC_FULL.md` §4.4).
    pub fn pause(&self) -> bool {
        self.paused
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::SeqCst,
                std::sync::atomic::Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Returns `false` if not currently paused.
    pub fn resume(&self) -> bool {
        let was_paused = self.paused.swap(false, std::sync::atomic::Ordering::SeqCst);
        if was_paused {
            self.resume.notify_waiters();
        }
        was_paused
    }

    pub async fn wait_for_resume(&self) {
        while self.is_paused() {
            self.resume.notified().await;
        }
    }
}

#[derive(Default, Clone)]
pub struct ControlRegistry {
    executions: Arc<DashMap<String, Arc<ActiveExecution>>>,
}

impl ControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, execution_id: &str) -> Arc<ActiveExecution> {
        let handle = Arc::new(ActiveExecution::new());
        self.executions.insert(execution_id.to_string(), Arc::clone(&handle));
        handle
    }

    pub fn get(&self, execution_id: &str) -> Option<Arc<ActiveExecution>> {
        self.executions.get(execution_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, execution_id: &str) {
        self.executions.remove(execution_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_second_concurrent_pause_is_rejected() {
        let registry = ControlRegistry::new();
        let handle = registry.insert("e1");
        assert!(handle.pause());
        assert!(!handle.pause());
    }

    #[test]
    fn resume_on_a_non_paused_execution_is_a_no_op() {
        let registry = ControlRegistry::new();
        let handle = registry.insert("e1");
        assert!(!handle.resume());
    }

    #[tokio::test]
    async fn wait_for_resume_returns_immediately_when_not_paused() {
        let registry = ControlRegistry::new();
        let handle = registry.insert("e1");
        handle.wait_for_resume().await;
    }

    #[test]
    fn remove_drops_the_handle_from_lookup() {
        let registry = ControlRegistry::new();
        registry.insert("e1");
        registry.remove("e1");
        assert!(registry.get("e1").is_none());
    }
}
