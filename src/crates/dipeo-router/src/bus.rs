//! Channel subscription registry and the last-event replay cache.
//!
//! Grounded on `original_source`'s `event_bus.py::InMemoryEventBus`
//! (subscription-id-per-channel bookkeeping, `unsubscribe` removing the
//! empty channel entry) and its `MessageRouterEventBus` (the TTL'd
//! `_last_event_cache`, `execution:<id>` channel convention). The
//! per-channel monotonic sequence mirrors `orchestrator/src/api/ws/replay.rs`'s
//! `EventHistory` sequence counter, scoped per channel instead of globally
//! so that gap detection is meaningful within one `(execution, connection)`
//! stream per `SPEC_FULL.md` §4.5's ordering guarantee.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::RouterError;

/// Default last-event cache lifetime, matching `MessageRouterEventBus`'s
/// `_cache_ttl = 60`.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// A published event, stamped with its channel-scoped sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    pub sequence: u64,
    pub published_at: i64,
    pub event: serde_json::Value,
}

struct CachedEnvelope {
    envelope: Envelope,
    stored_at: Instant,
}

/// Prefixes a channel name for the `execution:<id>` convention used by
/// `broadcast_to_execution`.
pub fn execution_channel(execution_id: &str) -> String {
    format!("execution:{execution_id}")
}

/// In-process pub/sub registry: `(connection_id, channel)` subscriptions,
/// per-channel sequence counters, and a TTL'd last-event cache.
pub struct EventBus {
    subscribers: DashMap<String, DashMap<String, String>>,
    sub_index: DashMap<String, (String, String)>,
    connection_subs: DashMap<String, HashSet<String>>,
    last_event: DashMap<String, CachedEnvelope>,
    sequence: DashMap<String, AtomicU64>,
    sub_counter: AtomicU64,
    cache_ttl: Duration,
}

impl EventBus {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            subscribers: DashMap::new(),
            sub_index: DashMap::new(),
            connection_subs: DashMap::new(),
            last_event: DashMap::new(),
            sequence: DashMap::new(),
            sub_counter: AtomicU64::new(0),
            cache_ttl,
        }
    }

    pub fn subscribe(&self, connection_id: &str, channel: &str) -> String {
        let n = self.sub_counter.fetch_add(1, Ordering::Relaxed);
        let subscription_id = format!("sub_{n}");

        self.subscribers
            .entry(channel.to_string())
            .or_default()
            .insert(subscription_id.clone(), connection_id.to_string());
        self.sub_index
            .insert(subscription_id.clone(), (channel.to_string(), connection_id.to_string()));
        self.connection_subs
            .entry(connection_id.to_string())
            .or_default()
            .insert(subscription_id.clone());

        subscription_id
    }

    pub fn unsubscribe(&self, subscription_id: &str) -> Result<(), RouterError> {
        let (channel, connection_id) = self
            .sub_index
            .remove(subscription_id)
            .map(|(_, v)| v)
            .ok_or_else(|| RouterError::UnknownSubscription(subscription_id.to_string()))?;

        if let Some(mut subs) = self.subscribers.get_mut(&channel) {
            subs.remove(subscription_id);
            if subs.is_empty() {
                drop(subs);
                self.subscribers.remove(&channel);
            }
        }
        if let Some(mut owned) = self.connection_subs.get_mut(&connection_id) {
            owned.remove(subscription_id);
        }
        Ok(())
    }

    /// Removes every subscription owned by a connection. Used both on
    /// explicit `unregister_connection` and on the router's auto-unsubscribe
    /// after repeated delivery failures.
    pub fn unsubscribe_connection(&self, connection_id: &str) {
        let Some((_, owned)) = self.connection_subs.remove(connection_id) else {
            return;
        };
        for subscription_id in owned {
            let _ = self.unsubscribe(&subscription_id);
        }
    }

    /// Connection ids currently subscribed to `channel`, for fan-out.
    pub fn subscribers(&self, channel: &str) -> Vec<String> {
        self.subscribers
            .get(channel)
            .map(|m| m.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default()
    }

    /// Stamps and caches an event for `channel`; returns the envelope for
    /// the caller to fan out to subscribers.
    pub fn publish(&self, channel: &str, event: serde_json::Value) -> Envelope {
        let sequence = self
            .sequence
            .entry(channel.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);

        let envelope = Envelope {
            channel: channel.to_string(),
            sequence,
            published_at: Utc::now().timestamp(),
            event,
        };

        self.last_event.insert(
            channel.to_string(),
            CachedEnvelope {
                envelope: envelope.clone(),
                stored_at: Instant::now(),
            },
        );

        envelope
    }

    /// The most recently published event on `channel`, if still within
    /// the cache TTL.
    pub fn get_last_event(&self, channel: &str) -> Option<Envelope> {
        let cached = self.last_event.get(channel)?;
        if cached.stored_at.elapsed() < self.cache_ttl {
            Some(cached.envelope.clone())
        } else {
            None
        }
    }

    pub fn close(&self) {
        self.subscribers.clear();
        self.sub_index.clear();
        self.connection_subs.clear();
        self.last_event.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_then_publish_lists_the_subscriber() {
        let bus = EventBus::default();
        bus.subscribe("c1", "execution:e1");
        assert_eq!(bus.subscribers("execution:e1"), vec!["c1".to_string()]);
        let env = bus.publish("execution:e1", serde_json::json!({"k": "v"}));
        assert_eq!(env.sequence, 0);
    }

    #[test]
    fn unsubscribe_removes_the_channel_entry_once_empty() {
        let bus = EventBus::default();
        let sub = bus.subscribe("c1", "execution:e1");
        bus.unsubscribe(&sub).unwrap();
        assert!(bus.subscribers("execution:e1").is_empty());
    }

    #[test]
    fn unsubscribe_unknown_id_errors() {
        let bus = EventBus::default();
        assert!(bus.unsubscribe("sub_404").is_err());
    }

    #[test]
    fn unsubscribe_connection_tears_down_every_subscription() {
        let bus = EventBus::default();
        bus.subscribe("c1", "execution:e1");
        bus.subscribe("c1", "execution:e2");
        bus.subscribe("c2", "execution:e1");
        bus.unsubscribe_connection("c1");
        assert_eq!(bus.subscribers("execution:e1"), vec!["c2".to_string()]);
        assert!(bus.subscribers("execution:e2").is_empty());
    }

    #[test]
    fn sequence_numbers_increment_per_channel_independently() {
        let bus = EventBus::default();
        bus.publish("a", serde_json::json!(1));
        bus.publish("a", serde_json::json!(2));
        let env = bus.publish("b", serde_json::json!(3));
        assert_eq!(env.sequence, 0);
        assert_eq!(bus.publish("a", serde_json::json!(4)).sequence, 2);
    }

    #[test]
    fn get_last_event_returns_none_before_any_publish() {
        let bus = EventBus::default();
        assert!(bus.get_last_event("execution:e1").is_none());
    }

    #[test]
    fn get_last_event_expires_after_ttl() {
        let bus = EventBus::new(Duration::from_millis(0));
        bus.publish("execution:e1", serde_json::json!({"k": "v"}));
        std::thread::sleep(Duration::from_millis(5));
        assert!(bus.get_last_event("execution:e1").is_none());
    }

    #[test]
    fn execution_channel_uses_the_documented_prefix() {
        assert_eq!(execution_channel("e1"), "execution:e1");
    }
}
