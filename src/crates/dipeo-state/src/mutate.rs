//! Shared transition logic applied identically by every backend.
//!
//! Keeping this out of `memory.rs`/`sqlite.rs` means the two backends can
//! never drift on what "update_node_status" actually does to a snapshot.

use chrono::Utc;

use crate::model::{ExecutionState, NodeExecutionStatus, NodeOutput, NodeState};

pub fn apply_node_status(
    state: &mut ExecutionState,
    node_id: &str,
    status: NodeExecutionStatus,
    output: Option<NodeOutput>,
    error: Option<String>,
    skip_reason: Option<String>,
) {
    let now = Utc::now();
    let node = state
        .node_states
        .entry(node_id.to_string())
        .or_insert_with(NodeState::pending);

    node.status = status;
    match status {
        NodeExecutionStatus::Running => node.started_at = Some(now),
        NodeExecutionStatus::Completed
        | NodeExecutionStatus::Failed
        | NodeExecutionStatus::Skipped => node.ended_at = Some(now),
        NodeExecutionStatus::Pending => {}
    }
    if let Some(error) = error {
        node.error = Some(error);
    }
    if let Some(reason) = skip_reason {
        node.skip_reason = Some(reason);
    }

    if status == NodeExecutionStatus::Completed {
        if let Some(output) = output {
            if let Some(delta) = output.token_usage() {
                node.token_usage = Some(delta);
                state.token_usage.accumulate(&delta);
            }
            state.node_outputs.insert(node_id.to_string(), output);
        }
    }
}

pub fn apply_status(
    state: &mut ExecutionState,
    status: crate::model::ExecutionStatus,
    error: Option<String>,
) {
    state.status = status;
    state.error = error;
    if status.is_terminal() {
        state.ended_at = Some(Utc::now());
    }
}
