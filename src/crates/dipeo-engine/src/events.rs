//! Event wire format (`SPEC_FULL.md` §6): `{type, execution_id, sequence,
//! node_id?, timestamp, data}`, with `sequence` a per-execution counter
//! starting at 1. This is the Engine's own sequence, independent of the
//! Router's per-channel sequence (which exists for transport-level gap
//! detection across reconnects, not for the event payload itself).

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde_json::{json, Value};

/// Per-execution monotonic counter. Starts at 1 on first use.
#[derive(Default)]
pub struct SequenceCounter(AtomicU64);

impl SequenceCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

pub fn build_event(
    sequence: u64,
    event_type: &str,
    execution_id: &str,
    node_id: Option<&str>,
    data: Value,
) -> Value {
    json!({
        "type": event_type,
        "execution_id": execution_id,
        "sequence": sequence,
        "node_id": node_id,
        "timestamp": Utc::now().to_rfc3339(),
        "data": data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_starts_at_one_and_increments() {
        let counter = SequenceCounter::new();
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
        assert_eq!(counter.next(), 3);
    }

    #[test]
    fn build_event_has_the_documented_shape() {
        let event = build_event(1, "node_start", "exec-1", Some("a"), json!({}));
        assert_eq!(event["type"], "node_start");
        assert_eq!(event["execution_id"], "exec-1");
        assert_eq!(event["sequence"], 1);
        assert_eq!(event["node_id"], "a");
        assert!(event["timestamp"].is_string());
    }
}
