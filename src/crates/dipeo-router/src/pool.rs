//! Connection registry and per-connection health tracking.
//!
//! Grounded on `orchestrator/src/api/ws/pool.rs`'s `ConnectionPool`/`PoolEntry`
//! shape (`DashMap`-keyed registry, atomic counters for total/active
//! connections), with per-connection health fields (`last_successful_send`,
//! `failed_attempts`, `total_messages`, `avg_latency`) added from
//! `SPEC_FULL.md` §4.5's connection-health model, which the teacher tracks
//! separately in `WebSocketMetrics` rather than per-connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::RouterError;

/// A connection's delivery side: whatever transport owns the socket
/// implements this to receive routed events.
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    async fn send(&self, event: serde_json::Value) -> Result<(), RouterError>;
}

/// Consecutive-failure threshold after which the router auto-unsubscribes
/// a connection from every channel (SPEC_FULL.md §4.5).
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct HealthSnapshot {
    pub failed_attempts: u32,
    pub total_messages: u64,
    pub avg_latency_ms: f64,
}

/// Rolling health state for one connection.
pub struct ConnectionHealth {
    last_successful_send: RwLock<Option<DateTime<Utc>>>,
    failed_attempts: AtomicU64,
    total_messages: AtomicU64,
    avg_latency_ms: RwLock<f64>,
}

impl ConnectionHealth {
    fn new() -> Self {
        Self {
            last_successful_send: RwLock::new(None),
            failed_attempts: AtomicU64::new(0),
            total_messages: AtomicU64::new(0),
            avg_latency_ms: RwLock::new(0.0),
        }
    }

    /// Exponential moving average with alpha 0.2, matching the smoothing
    /// the teacher's `WebSocketMetrics` avoids needing (it only counts
    /// totals) but that a per-connection latency figure needs to stay
    /// responsive to recent sends without being noisy.
    fn record_success(&self, latency_ms: f64) {
        self.failed_attempts.store(0, Ordering::Relaxed);
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        *self.last_successful_send.write() = Some(Utc::now());
        let mut avg = self.avg_latency_ms.write();
        *avg = if *avg == 0.0 {
            latency_ms
        } else {
            0.2 * latency_ms + 0.8 * *avg
        };
    }

    /// Returns the new consecutive-failure count.
    fn record_failure(&self) -> u32 {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed) as u32 + 1
    }

    pub fn is_unhealthy(&self) -> bool {
        self.failed_attempts.load(Ordering::Relaxed) >= MAX_CONSECUTIVE_FAILURES as u64
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed) as u32,
            total_messages: self.total_messages.load(Ordering::Relaxed),
            avg_latency_ms: *self.avg_latency_ms.read(),
        }
    }
}

struct PoolEntry {
    sink: Arc<dyn ConnectionSink>,
    health: ConnectionHealth,
    connected_at: DateTime<Utc>,
}

/// Pool statistics, analogous to `orchestrator`'s `PoolStats`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStats {
    pub total_connections: u64,
    pub active_connections: u64,
}

/// Registry of live connections and their health, keyed by connection id.
pub struct ConnectionPool {
    entries: DashMap<String, PoolEntry>,
    total_connections: AtomicU64,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            total_connections: AtomicU64::new(0),
        }
    }

    pub fn connect(&self, connection_id: &str, sink: Arc<dyn ConnectionSink>) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            connection_id.to_string(),
            PoolEntry {
                sink,
                health: ConnectionHealth::new(),
                connected_at: Utc::now(),
            },
        );
    }

    pub fn disconnect(&self, connection_id: &str) {
        self.entries.remove(connection_id);
    }

    pub fn exists(&self, connection_id: &str) -> bool {
        self.entries.contains_key(connection_id)
    }

    pub fn sink(&self, connection_id: &str) -> Option<Arc<dyn ConnectionSink>> {
        self.entries.get(connection_id).map(|e| Arc::clone(&e.sink))
    }

    pub fn record_success(&self, connection_id: &str, latency_ms: f64) {
        if let Some(entry) = self.entries.get(connection_id) {
            entry.health.record_success(latency_ms);
        }
    }

    /// Returns the new consecutive-failure count, or `None` if the
    /// connection isn't registered.
    pub fn record_failure(&self, connection_id: &str) -> Option<u32> {
        self.entries.get(connection_id).map(|e| e.health.record_failure())
    }

    pub fn is_unhealthy(&self, connection_id: &str) -> bool {
        self.entries
            .get(connection_id)
            .map(|e| e.health.is_unhealthy())
            .unwrap_or(false)
    }

    pub fn health(&self, connection_id: &str) -> Option<HealthSnapshot> {
        self.entries.get(connection_id).map(|e| e.health.snapshot())
    }

    pub fn connected_at(&self, connection_id: &str) -> Option<DateTime<Utc>> {
        self.entries.get(connection_id).map(|e| e.connected_at)
    }

    pub fn active_connections(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections(),
        }
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}
