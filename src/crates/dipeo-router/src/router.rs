//! Ties the connection pool, backpressure queues, and pub/sub bus into the
//! public router surface described by `SPEC_FULL.md` §4.5.
//!
//! Grounded on `orchestrator/src/api/ws/mod.rs`'s re-export shape (the
//! teacher also composes `pool` + `backpressure` + `events` behind one
//! handler module) and `message_router.py`'s `route_to_connection` /
//! `broadcast_to_execution` contract, adapted from its Redis-backed
//! multi-worker design to a single in-process router since this crate has
//! no Non-goal excluding distribution but `SPEC_FULL.md` scopes C5 to
//! in-process pub/sub only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backpressure::{BackpressureManager, DEFAULT_QUEUE_CAPACITY};
use crate::bus::{execution_channel, EventBus, DEFAULT_CACHE_TTL};
use crate::error::RouterError;
use crate::pool::{ConnectionPool, ConnectionSink, HealthSnapshot, PoolStats, MAX_CONSECUTIVE_FAILURES};

use crate::bus::Envelope;

/// Default per-message send timeout before a connection is treated as a
/// delivery failure.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Router {
    pool: ConnectionPool,
    backpressure: BackpressureManager,
    bus: EventBus,
    send_timeout: Duration,
}

impl Router {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_QUEUE_CAPACITY, DEFAULT_CACHE_TTL, DEFAULT_SEND_TIMEOUT)
    }

    pub fn with_config(queue_capacity: usize, cache_ttl: Duration, send_timeout: Duration) -> Self {
        Self {
            pool: ConnectionPool::new(),
            backpressure: BackpressureManager::new(queue_capacity),
            bus: EventBus::new(cache_ttl),
            send_timeout,
        }
    }

    /// Allocates health and queue state for a new connection.
    pub fn register_connection(&self, connection_id: &str, sink: Arc<dyn ConnectionSink>) {
        self.pool.connect(connection_id, sink);
    }

    /// Tears down a connection's health and queue state and removes it
    /// from every subscription set it held.
    pub fn unregister_connection(&self, connection_id: &str) {
        self.pool.disconnect(connection_id);
        self.backpressure.remove_client(connection_id);
        self.bus.unsubscribe_connection(connection_id);
    }

    pub fn connection_exists(&self, connection_id: &str) -> bool {
        self.pool.exists(connection_id)
    }

    pub fn health(&self, connection_id: &str) -> Option<HealthSnapshot> {
        self.pool.health(connection_id)
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn subscribe(&self, connection_id: &str, channel: &str) -> Result<String, RouterError> {
        if !self.pool.exists(connection_id) {
            return Err(RouterError::UnknownConnection(connection_id.to_string()));
        }
        Ok(self.bus.subscribe(connection_id, channel))
    }

    pub fn unsubscribe(&self, subscription_id: &str) -> Result<(), RouterError> {
        self.bus.unsubscribe(subscription_id)
    }

    pub fn get_last_event(&self, channel: &str) -> Option<Envelope> {
        self.bus.get_last_event(channel)
    }

    /// Enqueues onto the connection's outbound queue, then attempts
    /// immediate delivery through its registered sink. The return value
    /// reflects whether the message was accepted onto the queue: a
    /// `false` here is a backpressure drop, not a delivery failure (a
    /// failed *delivery* is instead recorded against the connection's
    /// health and can still return `true`).
    pub async fn route_to_connection(&self, connection_id: &str, channel: &str, event: serde_json::Value) -> bool {
        if !self.backpressure.enqueue(connection_id, channel, event) {
            tracing::warn!(connection_id, channel, "outbound queue full, rejecting newest message");
            return false;
        }

        let Some(queued) = self.backpressure.dequeue(connection_id) else {
            return true;
        };

        let Some(sink) = self.pool.sink(connection_id) else {
            tracing::warn!(connection_id, "no sink registered for queued message");
            return true;
        };

        let started = Instant::now();
        match tokio::time::timeout(self.send_timeout, sink.send(queued.event)).await {
            Ok(Ok(())) => {
                self.pool
                    .record_success(connection_id, started.elapsed().as_secs_f64() * 1000.0);
            }
            Ok(Err(err)) => {
                tracing::warn!(connection_id, error = %err, "delivery failed");
                self.note_failure(connection_id);
            }
            Err(_) => {
                tracing::warn!(connection_id, "delivery timed out");
                self.note_failure(connection_id);
            }
        }
        true
    }

    fn note_failure(&self, connection_id: &str) {
        if let Some(failures) = self.pool.record_failure(connection_id) {
            if failures >= MAX_CONSECUTIVE_FAILURES {
                tracing::warn!(connection_id, "auto-unsubscribing after repeated delivery failures");
                self.bus.unsubscribe_connection(connection_id);
            }
        }
    }

    /// Delivers `event` to every current subscriber of `channel`
    /// concurrently and refreshes the last-event cache regardless of
    /// whether anyone is listening.
    pub async fn publish(&self, channel: &str, event: serde_json::Value) {
        let envelope = self.bus.publish(channel, event);
        let subscribers = self.bus.subscribers(channel);
        if subscribers.is_empty() {
            tracing::debug!(channel, "publish with no subscribers");
            return;
        }

        let sends = subscribers
            .into_iter()
            .map(|connection_id| self.route_to_connection(&connection_id, channel, envelope.event.clone()));
        futures::future::join_all(sends).await;
    }

    pub async fn broadcast_to_execution(&self, execution_id: &str, event: serde_json::Value) {
        self.publish(&execution_channel(execution_id), event).await;
    }

    pub fn close(&self) {
        self.bus.close();
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct CapturingSink {
        received: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    #[async_trait::async_trait]
    impl ConnectionSink for CapturingSink {
        async fn send(&self, event: serde_json::Value) -> Result<(), RouterError> {
            self.received.lock().push(event);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait::async_trait]
    impl ConnectionSink for FailingSink {
        async fn send(&self, _event: serde_json::Value) -> Result<(), RouterError> {
            Err(RouterError::SendFailed("c1".to_string(), "boom".to_string()))
        }
    }

    #[tokio::test]
    async fn publish_delivers_to_every_subscriber() {
        let router = Router::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        router.register_connection("c1", Arc::new(CapturingSink { received: Arc::clone(&received) }));
        router.subscribe("c1", "execution:e1").unwrap();

        router.broadcast_to_execution("e1", serde_json::json!({"n": 1})).await;

        assert_eq!(received.lock().len(), 1);
        assert_eq!(router.get_last_event("execution:e1").unwrap().event, serde_json::json!({"n": 1}));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_still_updates_the_cache() {
        let router = Router::new();
        router.publish("execution:e1", serde_json::json!({"n": 1})).await;
        assert!(router.get_last_event("execution:e1").is_some());
    }

    #[tokio::test]
    async fn subscribing_an_unregistered_connection_errors() {
        let router = Router::new();
        assert!(router.subscribe("ghost", "execution:e1").is_err());
    }

    #[tokio::test]
    async fn three_failed_deliveries_auto_unsubscribe_the_connection() {
        let router = Router::new();
        router.register_connection("c1", Arc::new(FailingSink));
        router.subscribe("c1", "execution:e1").unwrap();

        for _ in 0..3 {
            router.broadcast_to_execution("e1", serde_json::json!({})).await;
        }

        assert!(router.health("c1").unwrap().failed_attempts >= MAX_CONSECUTIVE_FAILURES);
        // subsequent publish has no remaining subscribers
        let received_marker = Arc::new(Mutex::new(Vec::new()));
        router.register_connection("c2", Arc::new(CapturingSink { received: Arc::clone(&received_marker) }));
        router.subscribe("c2", "execution:e1").unwrap();
        router.broadcast_to_execution("e1", serde_json::json!({})).await;
        assert_eq!(received_marker.lock().len(), 1);
    }

    #[tokio::test]
    async fn unregister_connection_drops_its_subscriptions() {
        let router = Router::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        router.register_connection("c1", Arc::new(CapturingSink { received: Arc::clone(&received) }));
        router.subscribe("c1", "execution:e1").unwrap();
        router.unregister_connection("c1");

        router.broadcast_to_execution("e1", serde_json::json!({"n": 1})).await;
        assert!(received.lock().is_empty());
        assert!(!router.connection_exists("c1"));
    }

    #[tokio::test]
    async fn routing_to_an_unregistered_connection_still_drains_the_queue_slot() {
        let router = Router::new();
        // No sink registered: the message is accepted onto the queue
        // (this connection simply never had `register_connection` called)
        // and silently dropped rather than delivered.
        assert!(router.route_to_connection("ghost", "ch", serde_json::json!(1)).await);
    }
}
