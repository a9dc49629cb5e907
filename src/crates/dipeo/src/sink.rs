//! Adapts a plain closure into a [`ConnectionSink`] so embedders can call
//! [`crate::Dipeo::subscribe`] with a callback instead of standing up a
//! full transport connection. `register_connection`/`subscribe_connection_to_execution`
//! (`SPEC_FULL.md` §6) remain available directly on [`dipeo_router::Router`]
//! for callers that do own a real transport (WebSocket, SSE).

use async_trait::async_trait;
use serde_json::Value;

use dipeo_router::{ConnectionSink, RouterError};

/// Callback invoked once per event delivered to a subscription created via
/// [`crate::Dipeo::subscribe`]. Runs inline on the router's delivery path,
/// so it must not block; embedders that need to do real I/O should forward
/// the event onto their own channel instead of doing work directly here.
pub type EventHandler = std::sync::Arc<dyn Fn(Value) + Send + Sync>;

pub(crate) struct ClosureSink {
    pub(crate) handler: EventHandler,
}

#[async_trait]
impl ConnectionSink for ClosureSink {
    async fn send(&self, event: Value) -> Result<(), RouterError> {
        (self.handler)(event);
        Ok(())
    }
}
