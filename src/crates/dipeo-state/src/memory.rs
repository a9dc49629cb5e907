//! In-memory [`StateStore`] backend.
//!
//! Grounded on `langgraph-checkpoint`'s `InMemoryCheckpointSaver`: a
//! `tokio::sync::Mutex`-guarded map keyed by id, with reads cloning a
//! snapshot out from under the lock. Suitable for tests and for embedders
//! that don't need cross-process durability.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StateStoreError;
use crate::model::{
    ExecutionId, ExecutionState, ExecutionStatus, ExecutionSummary, NodeExecutionStatus, NodeOutput,
    TokenUsage,
};
use crate::mutate::{apply_node_status, apply_status};
use crate::store::StateStore;

#[derive(Default)]
pub struct InMemoryStateStore {
    executions: Mutex<HashMap<ExecutionId, Arc<Mutex<ExecutionState>>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn execution_lock(&self, execution_id: &str) -> Option<Arc<Mutex<ExecutionState>>> {
        self.executions.lock().await.get(execution_id).cloned()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create_execution(
        &self,
        execution_id: ExecutionId,
        diagram_id: Option<String>,
        variables: Option<HashMap<String, Value>>,
    ) -> Result<ExecutionState, StateStoreError> {
        let state = ExecutionState::new(execution_id.clone(), diagram_id, variables.unwrap_or_default());
        self.executions
            .lock()
            .await
            .insert(execution_id.clone(), Arc::new(Mutex::new(state.clone())));
        debug!(execution_id = %execution_id, "execution created");
        Ok(state)
    }

    async fn get_state(&self, execution_id: &str) -> Result<Option<ExecutionState>, StateStoreError> {
        match self.execution_lock(execution_id).await {
            Some(lock) => Ok(Some(lock.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn save_state(&self, state: ExecutionState) -> Result<(), StateStoreError> {
        let mut executions = self.executions.lock().await;
        match executions.get(&state.id) {
            Some(lock) => {
                *lock.lock().await = state;
            }
            None => {
                executions.insert(state.id.clone(), Arc::new(Mutex::new(state)));
            }
        }
        Ok(())
    }

    async fn update_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Result<(), StateStoreError> {
        let lock = self
            .execution_lock(execution_id)
            .await
            .ok_or_else(|| StateStoreError::NotFound(execution_id.to_string()))?;
        let mut state = lock.lock().await;
        apply_status(&mut state, status, error);
        Ok(())
    }

    async fn update_node_status(
        &self,
        execution_id: &str,
        node_id: &str,
        status: NodeExecutionStatus,
        output: Option<NodeOutput>,
        error: Option<String>,
        skip_reason: Option<String>,
    ) -> Result<(), StateStoreError> {
        let lock = self
            .execution_lock(execution_id)
            .await
            .ok_or_else(|| StateStoreError::NotFound(execution_id.to_string()))?;
        let mut state = lock.lock().await;
        apply_node_status(&mut state, node_id, status, output, error, skip_reason);
        Ok(())
    }

    async fn update_variables(
        &self,
        execution_id: &str,
        patch: HashMap<String, Value>,
    ) -> Result<(), StateStoreError> {
        let lock = self
            .execution_lock(execution_id)
            .await
            .ok_or_else(|| StateStoreError::NotFound(execution_id.to_string()))?;
        let mut state = lock.lock().await;
        state.variables.extend(patch);
        Ok(())
    }

    async fn add_token_usage(&self, execution_id: &str, delta: TokenUsage) -> Result<(), StateStoreError> {
        let lock = self
            .execution_lock(execution_id)
            .await
            .ok_or_else(|| StateStoreError::NotFound(execution_id.to_string()))?;
        let mut state = lock.lock().await;
        state.token_usage.accumulate(&delta);
        Ok(())
    }

    async fn list_executions(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExecutionSummary>, StateStoreError> {
        let executions = self.executions.lock().await;
        let mut snapshots = Vec::with_capacity(executions.len());
        for lock in executions.values() {
            snapshots.push(lock.lock().await.clone());
        }
        snapshots.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(snapshots
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|state| ExecutionSummary {
                execution_id: state.id,
                status: state.status,
                started_at: state.started_at,
                ended_at: state.ended_at,
                total_nodes: state.node_states.len(),
                diagram_id: state.diagram_id,
            })
            .collect())
    }

    async fn cleanup_old_states(&self, days: i64) -> Result<u64, StateStoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let mut executions = self.executions.lock().await;
        let mut to_remove = Vec::new();
        for (id, lock) in executions.iter() {
            if lock.lock().await.started_at < cutoff {
                to_remove.push(id.clone());
            }
        }
        for id in &to_remove {
            executions.remove(id);
        }
        Ok(to_remove.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = InMemoryStateStore::new();
        let state = store
            .create_execution("exec-1".into(), Some("diagram-1".into()), None)
            .await
            .unwrap();
        assert_eq!(state.status, ExecutionStatus::Started);

        let fetched = store.get_state("exec-1").await.unwrap().unwrap();
        assert_eq!(fetched.id, "exec-1");
        assert_eq!(fetched.diagram_id.as_deref(), Some("diagram-1"));
    }

    #[tokio::test]
    async fn get_state_on_unknown_execution_is_none() {
        let store = InMemoryStateStore::new();
        assert!(store.get_state("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_status_sets_ended_at_on_terminal_status() {
        let store = InMemoryStateStore::new();
        store.create_execution("exec-1".into(), None, None).await.unwrap();
        store
            .update_status("exec-1", ExecutionStatus::Completed, None)
            .await
            .unwrap();
        let state = store.get_state("exec-1").await.unwrap().unwrap();
        assert_eq!(state.status, ExecutionStatus::Completed);
        assert!(state.ended_at.is_some());
    }

    #[tokio::test]
    async fn update_node_status_accumulates_token_usage() {
        let store = InMemoryStateStore::new();
        store.create_execution("exec-1".into(), None, None).await.unwrap();

        let mut metadata = HashMap::new();
        metadata.insert(
            "tokenUsage".to_string(),
            serde_json::json!({"input": 10, "output": 5, "cached": null, "total": 15}),
        );
        let output = NodeOutput {
            value: Value::Null,
            metadata,
        };

        store
            .update_node_status(
                "exec-1",
                "node-a",
                NodeExecutionStatus::Completed,
                Some(output),
                None,
                None,
            )
            .await
            .unwrap();

        let state = store.get_state("exec-1").await.unwrap().unwrap();
        assert_eq!(state.token_usage.total, 15);
        assert_eq!(state.node_states["node-a"].status, NodeExecutionStatus::Completed);
        assert!(state.node_states["node-a"].ended_at.is_some());
    }

    #[tokio::test]
    async fn mutating_unknown_execution_fails() {
        let store = InMemoryStateStore::new();
        let err = store
            .update_status("missing", ExecutionStatus::Failed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StateStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_executions_orders_newest_first() {
        let store = InMemoryStateStore::new();
        store.create_execution("first".into(), None, None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.create_execution("second".into(), None, None).await.unwrap();

        let summaries = store.list_executions(10, 0).await.unwrap();
        assert_eq!(summaries[0].execution_id, "second");
        assert_eq!(summaries[1].execution_id, "first");
    }
}
