//! Per-call `ExecutionOptions`, the `execute()` caller-facing knobs from
//! `SPEC_FULL.md` §6.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    pub variables: Option<HashMap<String, Value>>,
    pub debug: bool,
    /// Caps the whole execution's wall-clock time, independent of any
    /// per-node timeout.
    pub timeout: Option<Duration>,
    pub max_iterations_global: Option<u32>,
    pub continue_on_error: bool,
    pub worker_pool_size: Option<usize>,
}
