//! In-process pub/sub event bus and per-connection message router.
//!
//! Composes three pieces adapted from `orchestrator`'s websocket stack:
//! a connection registry with health tracking ([`pool`]), a
//! reject-newest backpressure queue per connection ([`backpressure`]),
//! and a channel-based pub/sub bus with a TTL'd last-event cache
//! ([`bus`]). [`Router`] ties them together behind the surface
//! `SPEC_FULL.md` §4.5 describes.

mod backpressure;
mod bus;
mod error;
mod pool;
mod router;

pub use backpressure::{BackpressureManager, ClientBackpressure, QueuedMessage, DEFAULT_QUEUE_CAPACITY};
pub use bus::{execution_channel, Envelope, EventBus, DEFAULT_CACHE_TTL};
pub use error::RouterError;
pub use pool::{
    ConnectionPool, ConnectionSink, HealthSnapshot, PoolStats, MAX_CONSECUTIVE_FAILURES,
};
pub use router::{Router, DEFAULT_SEND_TIMEOUT};
