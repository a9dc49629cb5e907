//! Public facade over the diagram execution core (`SPEC_FULL.md` §6): one
//! [`Dipeo`] per process (or per tenant) composes the graph, state,
//! control, router, handler, and engine crates behind the small surface
//! an embedding application (CLI, web GUI, hooks) actually calls.
//!
//! Grounded on `orchestrator/src/lib.rs`'s facade style — a thin
//! `pub mod` surface re-exporting the crate's error type and public API
//! rather than exposing the internal composition — generalized from a
//! single monolithic crate to a workspace of cooperating crates.
//!
//! ```ignore
//! let dipeo = Dipeo::builder().with_builtin_handlers().build();
//! let graph = Arc::new(dipeo_graph::build(diagram)?);
//! let mut events = dipeo.execute(graph, ExecutionOptions::default(), None, None).await?;
//! while let Some(event) = events.next().await {
//!     // forward to a transport, or inspect for debugging
//! }
//! ```

mod builder;
mod error;
mod sink;

pub use builder::DipeoBuilder;
pub use error::DipeoError;
pub use sink::EventHandler;

// Re-exported so embedders need only depend on this one crate for the
// common path: building a graph, registering handlers, and driving an
// execution.
pub use dipeo_engine::{EngineConfig, ExecutionOptions};
pub use dipeo_graph::{build as build_graph, DiagramInput, Graph, GraphValidationError};
pub use dipeo_handlers::{Handler, HandlerError, HandlerRegistry, NodeContext, PropsSchema};
pub use dipeo_router::Router;
pub use dipeo_state::{
    ExecutionState, ExecutionStatus, ExecutionSummary, InMemoryStateStore, NodeOutput,
    SqliteStateStore, StateStore,
};

use std::sync::Arc;

use dashmap::DashMap;
use futures::{Stream, StreamExt};
use serde_json::Value;

use dipeo_engine::Engine;
use dipeo_router::execution_channel;

use crate::sink::ClosureSink;

/// One composed instance of the execution core. Cheap to clone-by-`Arc`
/// in an embedding application if needed, but typically constructed once
/// at startup and held for the process's lifetime.
pub struct Dipeo {
    engine: Engine,
    router: Arc<Router>,
    store: Arc<dyn StateStore>,
    /// `subscribe`'s own bookkeeping: each call mints a private connection
    /// so embedders get a plain-callback API without standing up a real
    /// transport. Maps the returned `subscription_id` back to that
    /// connection so `unsubscribe` can tear it down instead of leaking a
    /// connection-pool entry per call.
    subscriptions: DashMap<String, String>,
}

impl Dipeo {
    pub fn builder() -> DipeoBuilder {
        DipeoBuilder::new()
    }

    pub(crate) fn from_parts(engine: Engine, router: Arc<Router>, store: Arc<dyn StateStore>) -> Self {
        Self { engine, router, store, subscriptions: DashMap::new() }
    }

    /// Validates `graph` against the handler registry, creates an
    /// `ExecutionState`, and returns a stream of wire-format events
    /// (`SPEC_FULL.md` §6). The stream drives the execution as it's
    /// polled; dropping it early does not cancel the run — call
    /// [`Dipeo::cancel`] for that.
    ///
    /// `interactive_handler`, if supplied, is invoked inline for every
    /// `interactive_prompt` event in addition to that event flowing
    /// through the returned stream as normal.
    pub async fn execute(
        &self,
        graph: Arc<Graph>,
        options: ExecutionOptions,
        execution_id: Option<String>,
        interactive_handler: Option<EventHandler>,
    ) -> Result<impl Stream<Item = Value> + Send + 'static, DipeoError> {
        let stream = self.engine.execute(graph, options, execution_id).await?;
        Ok(stream.inspect(move |event| {
            let Some(handler) = &interactive_handler else { return };
            if event.get("type").and_then(Value::as_str) == Some("interactive_prompt") {
                handler(event.clone());
            }
        }))
    }

    pub fn cancel(&self, execution_id: &str) -> Result<(), DipeoError> {
        Ok(self.engine.cancel(execution_id)?)
    }

    pub fn pause(&self, execution_id: &str) -> Result<(), DipeoError> {
        Ok(self.engine.pause(execution_id)?)
    }

    pub fn resume(&self, execution_id: &str) -> Result<(), DipeoError> {
        Ok(self.engine.resume(execution_id)?)
    }

    /// Registers a one-off callback connection subscribed to
    /// `execution:<execution_id>` and returns its subscription id. For
    /// embedders that already own a real transport connection (a
    /// WebSocket, an SSE stream), prefer calling
    /// [`dipeo_router::Router::register_connection`] and
    /// [`dipeo_router::Router::subscribe`] directly instead — this method
    /// exists for the common case of "just give me the events".
    pub fn subscribe(&self, execution_id: &str, handler: EventHandler) -> Result<String, DipeoError> {
        let connection_id = format!("dipeo-sub-{}", uuid::Uuid::new_v4());
        self.router.register_connection(&connection_id, Arc::new(ClosureSink { handler }));
        let channel = execution_channel(execution_id);
        match self.router.subscribe(&connection_id, &channel) {
            Ok(subscription_id) => {
                self.subscriptions.insert(subscription_id.clone(), connection_id);
                Ok(subscription_id)
            }
            Err(err) => {
                self.router.unregister_connection(&connection_id);
                Err(err.into())
            }
        }
    }

    pub fn unsubscribe(&self, subscription_id: &str) -> Result<(), DipeoError> {
        self.router.unsubscribe(subscription_id)?;
        if let Some((_, connection_id)) = self.subscriptions.remove(subscription_id) {
            self.router.unregister_connection(&connection_id);
        }
        Ok(())
    }

    pub async fn get_execution_state(&self, execution_id: &str) -> Result<Option<ExecutionState>, DipeoError> {
        Ok(self.engine.get_execution_state(execution_id).await?)
    }

    pub async fn list_executions(&self, limit: i64, offset: i64) -> Result<Vec<ExecutionSummary>, DipeoError> {
        Ok(self.engine.list_executions(limit, offset).await?)
    }

    /// Direct access to the underlying store for embedders that need the
    /// full `StateStore` contract (e.g. `cleanup_old_states`), which the
    /// facade doesn't otherwise surface since it's an operational task
    /// rather than part of a single execution's lifecycle.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Direct access to the router for embedders with a real transport
    /// connection to register.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use dipeo_graph::{Arrow, Direction, Handle, HandleRef, Node, START_NODE_TYPE};

    fn linear_diagram() -> DiagramInput {
        DiagramInput {
            nodes: vec![
                Node { id: "start".into(), node_type: START_NODE_TYPE.into(), data: HashMap::new(), position: None },
                Node { id: "end".into(), node_type: "endpoint".into(), data: HashMap::new(), position: None },
            ],
            arrows: vec![Arrow {
                id: "a1".into(),
                source: HandleRef::new("start", "out"),
                target: HandleRef::new("end", "in"),
                data: None,
            }],
            handles: vec![
                Handle { node_id: "start".into(), name: "out".into(), direction: Direction::Output, data_type: "any".into() },
                Handle { node_id: "end".into(), name: "in".into(), direction: Direction::Input, data_type: "any".into() },
            ],
            persons: vec![],
        }
    }

    #[tokio::test]
    async fn executes_a_linear_diagram_to_completion() {
        let dipeo = Dipeo::builder().with_builtin_handlers().build();
        let graph = Arc::new(build_graph(linear_diagram()).unwrap());

        let mut events = dipeo
            .execute(graph, ExecutionOptions::default(), Some("e1".into()), None)
            .await
            .unwrap();

        let mut types = Vec::new();
        while let Some(event) = events.next().await {
            types.push(event["type"].as_str().unwrap().to_string());
        }
        assert_eq!(
            types,
            vec!["execution_start", "node_start", "node_complete", "node_start", "node_complete", "execution_complete"]
        );

        let state = dipeo.get_execution_state("e1").await.unwrap().unwrap();
        assert_eq!(state.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn subscribe_receives_broadcast_events_and_unsubscribe_stops_them() {
        let dipeo = Dipeo::builder().with_builtin_handlers().build();
        let graph = Arc::new(build_graph(linear_diagram()).unwrap());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let sub_id = dipeo
            .subscribe("e2", Arc::new(move |_event: Value| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap();

        let mut events = dipeo
            .execute(graph, ExecutionOptions::default(), Some("e2".into()), None)
            .await
            .unwrap();
        while events.next().await.is_some() {}

        assert!(count.load(Ordering::Relaxed) > 0);

        dipeo.unsubscribe(&sub_id).unwrap();
        assert!(dipeo.unsubscribe(&sub_id).is_err());
    }

    #[tokio::test]
    async fn list_executions_reports_runs_newest_first() {
        let dipeo = Dipeo::builder().with_builtin_handlers().build();
        for id in ["e1", "e2"] {
            let graph = Arc::new(build_graph(linear_diagram()).unwrap());
            let mut events = dipeo
                .execute(graph, ExecutionOptions::default(), Some(id.into()), None)
                .await
                .unwrap();
            while events.next().await.is_some() {}
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let summaries = dipeo.list_executions(10, 0).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].execution_id, "e2");
    }
}
