//! `EngineConfig`: plain struct with documented defaults, overridable via
//! `DIPEO_`-prefixed environment variables per `SPEC_FULL.md` §2.1. No
//! config-file parser — the spec doesn't mandate one, and the reference
//! stack's own settings layer is a flat env-driven struct too.

use std::time::Duration;

/// Global default node timeout (`SPEC_FULL.md` §4.4).
pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(300);

/// Global iteration ceiling (`SPEC_FULL.md` §3).
pub const DEFAULT_GLOBAL_MAX_ITERATIONS: u32 = 100;

/// State retention window (`SPEC_FULL.md` §3).
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bounded worker pool size per execution. Defaults to the number of
    /// available CPU cores, minimum 1.
    pub worker_pool_size: usize,
    /// Per-node deadline absent a node-specific `timeout` override.
    pub node_timeout: Duration,
    /// Ceiling every node-specific `max_iterations` is additionally capped
    /// by (`SPEC_FULL.md` §4.3: "node-specific if set, else global ceiling").
    pub global_max_iterations: u32,
    /// Days a completed execution's state is retained before
    /// `cleanup_old_states` is eligible to remove it.
    pub retention_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).max(1),
            node_timeout: DEFAULT_NODE_TIMEOUT,
            global_max_iterations: DEFAULT_GLOBAL_MAX_ITERATIONS,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl EngineConfig {
    /// Applies `DIPEO_WORKER_POOL_SIZE`, `DIPEO_NODE_TIMEOUT` (seconds),
    /// `DIPEO_MAX_ITERATIONS_GLOBAL`, and `DIPEO_RETENTION_DAYS` on top of
    /// [`EngineConfig::default`], ignoring unset or unparsable vars.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_usize("DIPEO_WORKER_POOL_SIZE") {
            config.worker_pool_size = v.max(1);
        }
        if let Some(v) = env_u64("DIPEO_NODE_TIMEOUT") {
            config.node_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_u32("DIPEO_MAX_ITERATIONS_GLOBAL") {
            config.global_max_iterations = v;
        }
        if let Some(v) = env_i64("DIPEO_RETENTION_DAYS") {
            config.retention_days = v;
        }
        config
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.node_timeout, Duration::from_secs(300));
        assert_eq!(config.global_max_iterations, 100);
        assert_eq!(config.retention_days, 7);
        assert!(config.worker_pool_size >= 1);
    }
}
