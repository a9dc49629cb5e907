//! Per-connection outbound queue with a reject-newest overflow policy.
//!
//! Grounded on `orchestrator/src/api/ws/backpressure.rs`'s `ClientBackpressure`
//! / `BackpressureManager` shape (`VecDeque` queue behind a
//! `parking_lot::Mutex`, `DashMap` of per-client queues, an atomic
//! sequence/dropped counter). The overflow policy is deliberately changed:
//! the teacher's `enqueue` makes room by calling `queue.pop_front()` (evict
//! oldest); `SPEC_FULL.md` §4.5 requires the newest message to be rejected
//! instead, so a stalled consumer never silently loses its earliest,
//! often most diagnostic, backlog.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// Default outbound queue depth per connection (SPEC_FULL.md §4.5).
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub channel: String,
    pub event: serde_json::Value,
    pub sequence: u64,
}

/// One connection's outbound queue.
pub struct ClientBackpressure {
    queue: Mutex<VecDeque<QueuedMessage>>,
    max_size: usize,
    dropped: AtomicU64,
}

impl ClientBackpressure {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(max_size)),
            max_size,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueues `message` unless the queue is already at capacity, in
    /// which case the message is rejected (not the oldest queued one)
    /// and the drop counter is incremented. Returns whether it was
    /// accepted.
    pub fn enqueue(&self, message: QueuedMessage) -> bool {
        let mut queue = self.queue.lock();
        if queue.len() >= self.max_size {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        queue.push_back(message);
        true
    }

    pub fn dequeue(&self) -> Option<QueuedMessage> {
        self.queue.lock().pop_front()
    }

    pub fn depth(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_full(&self) -> bool {
        self.depth() >= self.max_size
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Per-connection backpressure queues, keyed by connection id.
pub struct BackpressureManager {
    clients: DashMap<String, Arc<ClientBackpressure>>,
    max_size: usize,
    sequence: AtomicU64,
}

impl BackpressureManager {
    pub fn new(max_size: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_size,
            sequence: AtomicU64::new(0),
        }
    }

    fn client(&self, connection_id: &str) -> Arc<ClientBackpressure> {
        Arc::clone(
            self.clients
                .entry(connection_id.to_string())
                .or_insert_with(|| Arc::new(ClientBackpressure::new(self.max_size)))
                .value(),
        )
    }

    /// Assigns the next global sequence number and enqueues; returns
    /// `false` (and counts a drop) if the connection's queue is full.
    pub fn enqueue(&self, connection_id: &str, channel: &str, event: serde_json::Value) -> bool {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.client(connection_id).enqueue(QueuedMessage {
            channel: channel.to_string(),
            event,
            sequence,
        })
    }

    pub fn dequeue(&self, connection_id: &str) -> Option<QueuedMessage> {
        self.clients.get(connection_id)?.dequeue()
    }

    pub fn depth(&self, connection_id: &str) -> usize {
        self.clients.get(connection_id).map(|c| c.depth()).unwrap_or(0)
    }

    pub fn remove_client(&self, connection_id: &str) {
        self.clients.remove(connection_id);
    }

    pub fn full_queues(&self) -> Vec<String> {
        self.clients
            .iter()
            .filter(|entry| entry.value().is_full())
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl Default for BackpressureManager {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(seq: u64) -> QueuedMessage {
        QueuedMessage {
            channel: "execution:1".to_string(),
            event: serde_json::json!({ "n": seq }),
            sequence: seq,
        }
    }

    #[test]
    fn enqueue_then_dequeue_round_trips_in_order() {
        let q = ClientBackpressure::new(4);
        assert!(q.enqueue(msg(0)));
        assert!(q.enqueue(msg(1)));
        assert_eq!(q.dequeue().unwrap().sequence, 0);
        assert_eq!(q.depth(), 1);
    }

    #[test]
    fn overflow_rejects_the_newest_message_and_keeps_the_backlog() {
        let q = ClientBackpressure::new(2);
        assert!(q.enqueue(msg(0)));
        assert!(q.enqueue(msg(1)));
        assert!(!q.enqueue(msg(2)));
        assert_eq!(q.dropped_count(), 1);
        // The oldest two messages are still there, in order.
        assert_eq!(q.dequeue().unwrap().sequence, 0);
        assert_eq!(q.dequeue().unwrap().sequence, 1);
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn manager_tracks_independent_queues_per_connection() {
        let mgr = BackpressureManager::new(1);
        assert!(mgr.enqueue("a", "ch", serde_json::json!(1)));
        assert!(mgr.enqueue("b", "ch", serde_json::json!(2)));
        assert!(!mgr.enqueue("a", "ch", serde_json::json!(3)));
        assert_eq!(mgr.depth("a"), 1);
        assert_eq!(mgr.depth("b"), 1);
        assert_eq!(mgr.full_queues().len(), 2);
        mgr.remove_client("a");
        assert_eq!(mgr.depth("a"), 0);
    }
}
