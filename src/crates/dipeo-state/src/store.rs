//! The [`StateStore`] contract implemented by both backends in this crate.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StateStoreError;
use crate::model::{
    ExecutionId, ExecutionState, ExecutionSummary, NodeExecutionStatus, NodeOutput, TokenUsage,
};

/// Durable per-execution record keeping.
///
/// All mutating methods acquire a per-execution lock internally; callers
/// never see interleaved partial writes. Snapshots returned by `get_state`
/// are owned copies — mutating them has no effect on the store.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn create_execution(
        &self,
        execution_id: ExecutionId,
        diagram_id: Option<String>,
        variables: Option<HashMap<String, Value>>,
    ) -> Result<ExecutionState, StateStoreError>;

    async fn get_state(&self, execution_id: &str) -> Result<Option<ExecutionState>, StateStoreError>;

    async fn save_state(&self, state: ExecutionState) -> Result<(), StateStoreError>;

    async fn update_status(
        &self,
        execution_id: &str,
        status: crate::model::ExecutionStatus,
        error: Option<String>,
    ) -> Result<(), StateStoreError>;

    async fn update_node_status(
        &self,
        execution_id: &str,
        node_id: &str,
        status: NodeExecutionStatus,
        output: Option<NodeOutput>,
        error: Option<String>,
        skip_reason: Option<String>,
    ) -> Result<(), StateStoreError>;

    async fn update_variables(
        &self,
        execution_id: &str,
        patch: HashMap<String, Value>,
    ) -> Result<(), StateStoreError>;

    async fn add_token_usage(&self, execution_id: &str, delta: TokenUsage) -> Result<(), StateStoreError>;

    async fn list_executions(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExecutionSummary>, StateStoreError>;

    async fn cleanup_old_states(&self, days: i64) -> Result<u64, StateStoreError>;
}
