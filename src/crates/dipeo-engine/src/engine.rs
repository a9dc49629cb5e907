//! The scheduler/engine main loop (C4): drives one execution from
//! `execution_start` to its terminal event, honoring dependencies,
//! iteration limits, skip rules, concurrency, and cancellation.
//!
//! Grounded on `orchestrator`'s single-driver-task-plus-worker-pool shape
//! (one task owns control flow, handler invocations fan out onto a
//! bounded pool, completions flow back over a channel) and
//! `langgraph-core`'s level-by-level graph walk, generalized from a
//! static DAG walk to the dynamic, skip- and loop-aware readiness model
//! `SPEC_FULL.md` §4.4 describes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, instrument, warn};

use dipeo_control::{evaluate_condition, Dependency, LoopController, SkipCheck, SkipController, SkipReason};
use dipeo_graph::Graph;
use dipeo_handlers::builtin::condition_context;
use dipeo_handlers::{Handler, HandlerError, HandlerRegistry, Inputs, NodeContext, Services};
use dipeo_router::Router;
use dipeo_state::{
    ExecutionState, ExecutionStatus, ExecutionSummary, NodeExecutionStatus, NodeOutput, StateStore,
};

use crate::config::EngineConfig;
use crate::control_registry::{ActiveExecution, ControlRegistry};
use crate::error::EngineError;
use crate::events::build_event;
use crate::options::ExecutionOptions;

/// What a dispatched handler invocation reports back to the driver loop.
enum Outcome {
    Completed(NodeOutput),
    Failed(HandlerError),
}

/// Everything a spawned handler task or a handler's own `context.emit`
/// sends back to the driver over the completion channel.
enum Signal {
    Progress { node_id: String, payload: Value },
    Completion { node_id: String, iteration: u32, outcome: Outcome },
}

pub struct Engine {
    store: Arc<dyn StateStore>,
    router: Arc<Router>,
    registry: HandlerRegistry,
    config: EngineConfig,
    services: Services,
    active: ControlRegistry,
}

impl Engine {
    pub fn new(store: Arc<dyn StateStore>, router: Arc<Router>, registry: HandlerRegistry, config: EngineConfig) -> Self {
        Self {
            store,
            router,
            registry,
            config,
            services: Services::new(),
            active: ControlRegistry::new(),
        }
    }

    /// Service handles injected into every `NodeContext`/`Handler::execute`
    /// call this engine drives. Populated once at construction, per
    /// `SPEC_FULL.md` §9 ("process-wide only for the Handler Registry" —
    /// services are the same kind of startup-time, read-only wiring).
    pub fn with_services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    /// Validates the graph against the registry, creates an
    /// `ExecutionState`, and returns a stream of wire-format events. The
    /// stream itself drives the execution: dropping it does not cancel
    /// the run (use [`Engine::cancel`]), but consuming it to completion
    /// is how callers observe `execution_start` through the terminal
    /// event.
    #[instrument(skip(self, graph, options), fields(execution_id))]
    pub async fn execute(
        &self,
        graph: Arc<Graph>,
        options: ExecutionOptions,
        execution_id: Option<String>,
    ) -> Result<impl Stream<Item = Value> + Send + 'static, EngineError> {
        let node_types: Vec<&str> = graph.nodes().map(|n| n.node_type.as_str()).collect();
        self.registry.check_coverage(node_types).map_err(EngineError::NoExecutor)?;

        let execution_id = execution_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        tracing::Span::current().record("execution_id", tracing::field::display(&execution_id));

        let variables = options.variables.clone().unwrap_or_default();
        self.store
            .create_execution(execution_id.clone(), None, Some(variables.clone()))
            .await?;
        self.store
            .update_status(&execution_id, ExecutionStatus::Running, None)
            .await?;

        let handle = self.active.insert(&execution_id);

        let worker_pool_size = options.worker_pool_size.unwrap_or(self.config.worker_pool_size).max(1);
        let global_max_iterations = options.max_iterations_global.unwrap_or(self.config.global_max_iterations);
        let node_timeout_default = self.config.node_timeout;
        let continue_on_error = options.continue_on_error;

        let store = Arc::clone(&self.store);
        let router = Arc::clone(&self.router);
        let registry = self.registry.clone();
        let services = self.services.clone();
        let active = self.active.clone();

        info!(execution_id = %execution_id, nodes = graph.node_count(), "execution starting");

        Ok(run(RunParams {
            graph,
            store,
            router,
            registry,
            services,
            active,
            handle,
            execution_id,
            variables,
            worker_pool_size,
            global_max_iterations,
            node_timeout_default,
            continue_on_error,
        }))
    }

    pub fn cancel(&self, execution_id: &str) -> Result<(), EngineError> {
        let handle = self
            .active
            .get(execution_id)
            .ok_or_else(|| EngineError::UnknownExecution(execution_id.to_string()))?;
        handle.cancellation.cancel();
        handle.resume();
        Ok(())
    }

    pub fn pause(&self, execution_id: &str) -> Result<(), EngineError> {
        let handle = self
            .active
            .get(execution_id)
            .ok_or_else(|| EngineError::UnknownExecution(execution_id.to_string()))?;
        if !handle.pause() {
            return Err(EngineError::AlreadyPaused(execution_id.to_string()));
        }
        Ok(())
    }

    pub fn resume(&self, execution_id: &str) -> Result<(), EngineError> {
        let handle = self
            .active
            .get(execution_id)
            .ok_or_else(|| EngineError::UnknownExecution(execution_id.to_string()))?;
        if !handle.resume() {
            return Err(EngineError::NotPaused(execution_id.to_string()));
        }
        Ok(())
    }

    pub async fn get_execution_state(&self, execution_id: &str) -> Result<Option<ExecutionState>, EngineError> {
        Ok(self.store.get_state(execution_id).await?)
    }

    pub async fn list_executions(&self, limit: i64, offset: i64) -> Result<Vec<ExecutionSummary>, EngineError> {
        Ok(self.store.list_executions(limit, offset).await?)
    }
}

struct RunParams {
    graph: Arc<Graph>,
    store: Arc<dyn StateStore>,
    router: Arc<Router>,
    registry: HandlerRegistry,
    services: Services,
    active: ControlRegistry,
    handle: Arc<ActiveExecution>,
    execution_id: String,
    variables: HashMap<String, Value>,
    worker_pool_size: usize,
    global_max_iterations: u32,
    node_timeout_default: Duration,
    continue_on_error: bool,
}

/// The single driver task. Everything here runs on one logical task per
/// execution; handler invocations are the only work fanned out onto the
/// bounded worker pool (`semaphore`).
fn run(params: RunParams) -> impl Stream<Item = Value> + Send + 'static {
    async_stream::stream! {
        let RunParams {
            graph,
            store,
            router,
            registry,
            services,
            active,
            handle,
            execution_id,
            variables,
            worker_pool_size,
            global_max_iterations,
            node_timeout_default,
            continue_on_error,
        } = params;

        let seq = handle.sequence.next();
        let start_event = build_event(seq, "execution_start", &execution_id, None, json!({}));
        yield start_event.clone();
        router.broadcast_to_execution(&execution_id, start_event).await;

        let loop_controller = LoopController::new(global_max_iterations);
        for node in graph.nodes() {
            if graph.is_iterative(&node.id) {
                loop_controller.register(&node.id, graph.max_iterations(&node.id));
            }
        }
        let skip_controller = SkipController::new();

        let mut node_status: HashMap<String, NodeExecutionStatus> = HashMap::new();
        let mut node_outputs: HashMap<String, Value> = HashMap::new();
        let mut forward_indegree: HashMap<String, usize> = graph
            .nodes()
            .map(|n| {
                let count = graph.incoming(&n.id).into_iter().filter(|a| !graph.is_back_edge(a)).count();
                (n.id.clone(), count)
            })
            .collect();
        let mut settled: HashSet<String> = HashSet::new();
        let mut ready: VecDeque<String> = forward_indegree
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(id, _)| id.clone())
            .collect();
        let mut running: HashSet<String> = HashSet::new();

        let semaphore = Arc::new(Semaphore::new(worker_pool_size));
        let (completion_tx, mut completion_rx) = mpsc::unbounded_channel::<Signal>();

        let mut aborted = false;
        let mut failed_any = false;
        let mut deadlock: Option<usize> = None;
        let mut storage_error: Option<String> = None;

        'main: loop {
            if handle.cancellation.is_cancelled() {
                aborted = true;
                break 'main;
            }

            if handle.is_paused() {
                if running.is_empty() {
                    handle.wait_for_resume().await;
                    if handle.cancellation.is_cancelled() {
                        aborted = true;
                        break 'main;
                    }
                    continue 'main;
                }
                // in-flight handlers drain normally; fall through to await their completion.
            } else {
                while !handle.is_paused() && !handle.cancellation.is_cancelled() {
                    let Some(node_id) = ready.pop_front() else { break };
                    let Some(node) = graph.node(&node_id) else { continue };

                    if node.node_type == "condition" && !skip_controller.is_skipped(&node_id) {
                        let expr = node.data.get("condition").and_then(Value::as_str).unwrap_or("true");
                        let inputs_preview = resolve_inputs(&graph, &node_id, &node_outputs);
                        let eval_ctx = condition_context(&variables, &inputs_preview);
                        if !evaluate_condition(expr, &eval_ctx) {
                            skip_controller.mark_skipped(&node_id, SkipReason::ConditionNotMet);
                        }
                    }

                    if !skip_controller.is_skipped(&node_id) {
                        let deps = build_dependencies(&graph, &node_id, &skip_controller, &node_status, continue_on_error);
                        let empty_ctx = HashMap::new();
                        let check = SkipCheck {
                            iteration_count: loop_controller.iteration_count(&node_id),
                            max_iterations: graph.max_iterations(&node_id),
                            skip_condition: None,
                            condition_context: &empty_ctx,
                            dependencies: &deps,
                            first_only_prompt_consumed: loop_controller.iteration_count(&node_id) > 0,
                            has_first_only_prompt: node.data.get("first_only_prompt").is_some(),
                            has_default_prompt: node.data.get("default_prompt").is_some(),
                        };
                        skip_controller.evaluate(&node_id, &check);
                    }

                    if let Some(reason) = skip_controller.skip_reason(&node_id) {
                        node_status.insert(node_id.clone(), NodeExecutionStatus::Skipped);
                        let reason_str = skip_reason_str(reason);
                        if let Err(e) = store
                            .update_node_status(&execution_id, &node_id, NodeExecutionStatus::Skipped, None, None, Some(reason_str.clone()))
                            .await
                        {
                            storage_error = Some(e.to_string());
                            break 'main;
                        }
                        let seq = handle.sequence.next();
                        let event = build_event(seq, "node_skipped", &execution_id, Some(node_id.as_str()), json!({"reason": reason_str}));
                        yield event.clone();
                        router.broadcast_to_execution(&execution_id, event).await;
                        settle_and_propagate(&node_id, &graph, &mut forward_indegree, &mut settled, &mut ready);
                        continue;
                    }

                    if let Some(schema) = registry.get(&node.node_type).and_then(|h| h.schema().cloned()) {
                        let data: serde_json::Map<String, Value> = node.data.clone().into_iter().collect();
                        if let Err(e) = schema.validate(&node_id, &data) {
                            node_status.insert(node_id.clone(), NodeExecutionStatus::Failed);
                            let message = e.to_string();
                            if let Err(store_err) = store
                                .update_node_status(&execution_id, &node_id, NodeExecutionStatus::Failed, None, Some(message.clone()), None)
                                .await
                            {
                                storage_error = Some(store_err.to_string());
                                break 'main;
                            }
                            let seq = handle.sequence.next();
                            let event = build_event(seq, "node_failed", &execution_id, Some(node_id.as_str()), json!({"error": message, "code": e.code()}));
                            yield event.clone();
                            router.broadcast_to_execution(&execution_id, event).await;
                            if !continue_on_error {
                                failed_any = true;
                            }
                            settle_and_propagate(&node_id, &graph, &mut forward_indegree, &mut settled, &mut ready);
                            continue;
                        }
                    }

                    let permit = match Arc::clone(&semaphore).try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            ready.push_front(node_id);
                            break;
                        }
                    };

                    running.insert(node_id.clone());
                    node_status.insert(node_id.clone(), NodeExecutionStatus::Running);
                    if let Err(e) = store
                        .update_node_status(&execution_id, &node_id, NodeExecutionStatus::Running, None, None, None)
                        .await
                    {
                        storage_error = Some(e.to_string());
                        break 'main;
                    }
                    let seq = handle.sequence.next();
                    let start_event = build_event(seq, "node_start", &execution_id, Some(node_id.as_str()), json!({}));
                    yield start_event.clone();
                    router.broadcast_to_execution(&execution_id, start_event).await;

                    let inputs = resolve_inputs(&graph, &node_id, &node_outputs);
                    let handler = registry.get(&node.node_type).expect("coverage checked at validation");
                    let props = Value::Object(node.data.clone().into_iter().collect());
                    let node_timeout = node
                        .data
                        .get("timeout")
                        .and_then(Value::as_u64)
                        .map(Duration::from_secs)
                        .unwrap_or(node_timeout_default);
                    let child_token = handle.cancellation.child_token();
                    let services_clone = services.clone();
                    let variables_arc = Arc::new(variables.clone());
                    let tx = completion_tx.clone();
                    let exec_id_clone = execution_id.clone();
                    let node_id_clone = node_id.clone();
                    let iteration_for_task = loop_controller.iteration_count(&node_id) + 1;

                    tokio::spawn(dispatch_handler(
                        handler,
                        permit,
                        props,
                        context_for(exec_id_clone, node_id_clone.clone(), variables_arc, child_token.clone(), tx.clone()),
                        inputs,
                        services_clone,
                        node_timeout,
                        child_token,
                        node_id_clone,
                        iteration_for_task,
                        tx,
                    ));
                }
            }

            if running.is_empty() && ready.is_empty() && !handle.is_paused() {
                let all_terminal = graph.nodes().all(|n| {
                    matches!(
                        node_status.get(&n.id),
                        Some(NodeExecutionStatus::Completed | NodeExecutionStatus::Failed | NodeExecutionStatus::Skipped)
                    )
                });
                if all_terminal {
                    break 'main;
                }
                let remaining = graph.node_count()
                    - node_status
                        .values()
                        .filter(|s| {
                            matches!(
                                s,
                                NodeExecutionStatus::Completed | NodeExecutionStatus::Failed | NodeExecutionStatus::Skipped
                            )
                        })
                        .count();
                deadlock = Some(remaining);
                break 'main;
            }

            match completion_rx.recv().await {
                Some(Signal::Progress { node_id, payload }) => {
                    let seq = handle.sequence.next();
                    let event = build_event(seq, "node_update", &execution_id, Some(node_id.as_str()), payload);
                    yield event.clone();
                    router.broadcast_to_execution(&execution_id, event).await;
                }
                Some(Signal::Completion { node_id, iteration, outcome }) => {
                    running.remove(&node_id);
                    match outcome {
                        Outcome::Completed(output) => {
                            node_status.insert(node_id.clone(), NodeExecutionStatus::Completed);
                            node_outputs.insert(node_id.clone(), output.value.clone());
                            if let Err(e) = store
                                .update_node_status(&execution_id, &node_id, NodeExecutionStatus::Completed, Some(output.clone()), None, None)
                                .await
                            {
                                storage_error = Some(e.to_string());
                                break 'main;
                            }
                            let seq = handle.sequence.next();
                            let event = build_event(
                                seq,
                                "node_complete",
                                &execution_id,
                                Some(node_id.as_str()),
                                json!({"output": output.value, "iteration": iteration}),
                            );
                            yield event.clone();
                            router.broadcast_to_execution(&execution_id, event).await;

                            if graph.is_iterative(&node_id) {
                                let (should_continue, _count) = loop_controller.mark_complete(&node_id);
                                if should_continue {
                                    ready.push_back(node_id.clone());
                                }
                            }
                            settle_and_propagate(&node_id, &graph, &mut forward_indegree, &mut settled, &mut ready);
                        }
                        Outcome::Failed(err) => {
                            node_status.insert(node_id.clone(), NodeExecutionStatus::Failed);
                            let code = err.code();
                            let message = err.to_string();
                            if let Err(e) = store
                                .update_node_status(&execution_id, &node_id, NodeExecutionStatus::Failed, None, Some(message.clone()), None)
                                .await
                            {
                                storage_error = Some(e.to_string());
                                break 'main;
                            }
                            let seq = handle.sequence.next();
                            let event = build_event(
                                seq,
                                "node_failed",
                                &execution_id,
                                Some(node_id.as_str()),
                                json!({"error": message, "code": code}),
                            );
                            yield event.clone();
                            router.broadcast_to_execution(&execution_id, event).await;
                            if !continue_on_error {
                                failed_any = true;
                            }
                            settle_and_propagate(&node_id, &graph, &mut forward_indegree, &mut settled, &mut ready);
                        }
                    }
                }
                None => break 'main,
            }
        }

        if aborted {
            while !running.is_empty() {
                match completion_rx.recv().await {
                    Some(Signal::Completion { node_id, .. }) => {
                        running.remove(&node_id);
                    }
                    Some(Signal::Progress { .. }) => {}
                    None => break,
                }
            }
        }

        let final_status = if let Some(msg) = &storage_error {
            warn!(execution_id = %execution_id, error = %msg, "execution ended on a storage error");
            ExecutionStatus::Failed
        } else if aborted {
            ExecutionStatus::Aborted
        } else if deadlock.is_some() || failed_any {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };

        let error_message = storage_error.clone().or_else(|| deadlock.map(|n| EngineError::Deadlock(n).to_string()));
        let _ = store.update_status(&execution_id, final_status, error_message.clone()).await;

        let event_type = match final_status {
            ExecutionStatus::Completed => "execution_complete",
            ExecutionStatus::Aborted => "execution_aborted",
            _ => "execution_error",
        };
        let data = match &error_message {
            Some(msg) => json!({"error": msg}),
            None => json!({}),
        };
        let seq = handle.sequence.next();
        let event = build_event(seq, event_type, &execution_id, None, data);
        yield event.clone();
        router.broadcast_to_execution(&execution_id, event).await;

        active.remove(&execution_id);
        info!(execution_id = %execution_id, status = ?final_status, "execution ended");
    }
}

fn context_for(
    execution_id: String,
    node_id: String,
    variables: Arc<HashMap<String, Value>>,
    cancellation: tokio_util::sync::CancellationToken,
    tx: mpsc::UnboundedSender<Signal>,
) -> NodeContext {
    let emit_node_id = node_id.clone();
    let emit = Arc::new(move |payload: Value| {
        let _ = tx.send(Signal::Progress { node_id: emit_node_id.clone(), payload });
    });
    NodeContext::new(execution_id, node_id, variables, cancellation, emit)
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_handler(
    handler: Arc<dyn Handler>,
    permit: tokio::sync::OwnedSemaphorePermit,
    props: Value,
    context: NodeContext,
    inputs: Inputs,
    services: Services,
    node_timeout: Duration,
    child_token: tokio_util::sync::CancellationToken,
    node_id: String,
    iteration: u32,
    tx: mpsc::UnboundedSender<Signal>,
) {
    let _permit = permit;
    let outcome = tokio::time::timeout(node_timeout, handler.execute(&props, &context, &inputs, &services)).await;
    let result = match outcome {
        Ok(Ok(output)) => Outcome::Completed(output),
        Ok(Err(err)) => Outcome::Failed(err),
        Err(_) => {
            child_token.cancel();
            Outcome::Failed(HandlerError::Timeout(node_id.clone()))
        }
    };
    let _ = tx.send(Signal::Completion { node_id, iteration, outcome: result });
}

/// All incoming arrows, forward and back-edge alike: a loop's feedback
/// edge is exactly how an iterative node's own prior output reaches it
/// again, so unlike [`build_dependencies`] this does not filter it out.
fn resolve_inputs(graph: &Graph, node_id: &str, node_outputs: &HashMap<String, Value>) -> Inputs {
    let mut inputs = Inputs::new();
    for arrow in graph.incoming(node_id) {
        let value = node_outputs.get(&arrow.source.node_id).cloned().unwrap_or(Value::Null);
        inputs.insert(arrow.target.handle.clone(), value);
    }
    inputs
}

/// Forward (non-back-edge) dependency views for the Skip Controller.
/// `continue_on_error` suppresses propagation of a failed source so the
/// dependent is still attempted, per `SPEC_FULL.md` §4.4/§7.
fn build_dependencies(
    graph: &Graph,
    node_id: &str,
    skip_controller: &SkipController,
    node_status: &HashMap<String, NodeExecutionStatus>,
    continue_on_error: bool,
) -> Vec<Dependency> {
    graph
        .incoming(node_id)
        .into_iter()
        .filter(|arrow| !graph.is_back_edge(*arrow))
        .map(|arrow| {
            let source = &arrow.source.node_id;
            let source_failed =
                !continue_on_error && matches!(node_status.get(source), Some(NodeExecutionStatus::Failed));
            let optional = arrow
                .data
                .as_ref()
                .and_then(|d| d.get("first_only"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Dependency {
                source_skipped: skip_controller.is_skipped(source),
                source_failed,
                optional,
            }
        })
        .collect()
}

/// Decrements every forward-edge successor's indegree once for `node_id`'s
/// first terminal transition, enqueueing any that reach zero. An
/// iterative node's second and later completions do not re-trigger this —
/// downstream readiness depends only on the node's first terminal state,
/// matching `node_outputs` retaining no iteration history.
fn settle_and_propagate(
    node_id: &str,
    graph: &Graph,
    forward_indegree: &mut HashMap<String, usize>,
    settled: &mut HashSet<String>,
    ready: &mut VecDeque<String>,
) {
    if !settled.insert(node_id.to_string()) {
        return;
    }
    for arrow in graph.outgoing(node_id) {
        if graph.is_back_edge(arrow) {
            continue;
        }
        let target = &arrow.target.node_id;
        if let Some(count) = forward_indegree.get_mut(target) {
            if *count > 0 {
                *count -= 1;
                if *count == 0 {
                    ready.push_back(target.clone());
                }
            }
        }
    }
}

fn skip_reason_str(reason: SkipReason) -> String {
    serde_json::to_value(reason)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "UNKNOWN".to_string())
}
