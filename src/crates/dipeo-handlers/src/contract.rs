//! The handler contract: what a node implementation sees and what it must
//! return. Grounded on `langgraph-core::graph::NodeSpec`'s executor-as-
//! `Arc<dyn Fn>` shape and `orchestrator::executor`'s service-injection
//! pattern, generalized from a single LLM executor to an arbitrary node
//! type registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use dipeo_state::NodeOutput;

use crate::error::HandlerError;
use crate::schema::PropsSchema;

/// Everything a handler needs besides its own typed inputs: identity,
/// a read-only snapshot of execution-scoped variables, a channel to push
/// progress events, and a cooperative cancellation signal.
///
/// Handlers read state through this context; they never mutate it. The
/// Engine commits whatever `NodeOutput` `execute` returns.
#[derive(Clone)]
pub struct NodeContext {
    pub execution_id: String,
    pub current_node_id: String,
    pub variables: Arc<HashMap<String, Value>>,
    pub cancellation: CancellationToken,
    emit: Arc<dyn Fn(Value) + Send + Sync>,
}

impl NodeContext {
    pub fn new(
        execution_id: impl Into<String>,
        current_node_id: impl Into<String>,
        variables: Arc<HashMap<String, Value>>,
        cancellation: CancellationToken,
        emit: Arc<dyn Fn(Value) + Send + Sync>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            current_node_id: current_node_id.into(),
            variables,
            cancellation,
            emit,
        }
    }

    /// Pushes a progress event (e.g. an `llm_token` partial) through the
    /// Engine's event path. Does not touch execution state.
    pub fn emit(&self, payload: Value) {
        (self.emit)(payload);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Resolved inputs for one node invocation: the arrow-labeled values the
/// Engine read out of upstream `node_outputs`, keyed by target handle name.
pub type Inputs = HashMap<String, Value>;

/// Named service handles a handler declares via `requires_services` and
/// the Engine injects from its service container. The core does not
/// define what a service *is* — handlers downcast via `Any` or, more
/// commonly, an embedding application hands the registry a concrete
/// `Services` struct at registration time and handlers close over it.
pub type Services = HashMap<String, Arc<dyn std::any::Any + Send + Sync>>;

/// A node-type implementation. Implementors are looked up by `node.type`
/// in the [`crate::HandlerRegistry`] and invoked once per node dispatch
/// (possibly more than once for iterative nodes).
#[async_trait]
pub trait Handler: Send + Sync {
    /// Service names the Engine must inject from its container before
    /// this handler can run. An empty list means the handler is
    /// self-contained.
    fn requires_services(&self) -> &[&'static str] {
        &[]
    }

    /// Typed shape `node.data` must satisfy. `None` opts a handler out of
    /// schema validation entirely (discouraged; built-ins always declare one).
    fn schema(&self) -> Option<&PropsSchema> {
        None
    }

    /// Runs the node. May suspend on I/O; must check `context.cancellation`
    /// at its own suspension points and return `HandlerError::Cancelled`
    /// promptly once observed. Must not mutate `context` state directly —
    /// its return value is the only channel back to the Engine.
    async fn execute(
        &self,
        props: &Value,
        context: &NodeContext,
        inputs: &Inputs,
        services: &Services,
    ) -> Result<NodeOutput, HandlerError>;
}
