//! SQLite-backed [`StateStore`].
//!
//! Grounded on `orchestrator/src/db/connection.rs` (pool setup, WAL-style
//! pragmas) and `orchestrator/src/db/repositories/checkpoint_repo.rs`
//! (query shape: `sqlx::query_as` against a plain repository struct, no
//! ORM). Unlike the original `simple_state_store.py`'s single
//! autocommit connection, this uses a small `sqlx::SqlitePool` — the
//! reference layout in `SPEC_FULL.md` §4.2 explicitly allows either, as
//! long as mutations stay serialized per execution. Serialization here is
//! a `tokio::sync::Mutex` per execution id, not the pool itself.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StateStoreError;
use crate::model::{
    ExecutionId, ExecutionState, ExecutionStatus, ExecutionSummary, NodeExecutionStatus, NodeOutput,
    TokenUsage,
};
use crate::mutate::{apply_node_status, apply_status};
use crate::store::StateStore;

pub struct SqliteStateStore {
    pool: SqlitePool,
    locks: tokio::sync::Mutex<HashMap<ExecutionId, Arc<Mutex<()>>>>,
}

impl SqliteStateStore {
    pub async fn connect(database_url: &str) -> Result<Self, StateStoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            locks: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    async fn lock_for(&self, execution_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(execution_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read_row(&self, execution_id: &str) -> Result<Option<ExecutionState>, StateStoreError> {
        let row = sqlx::query(
            "SELECT execution_id, status, diagram_id, started_at, ended_at, \
             node_states, node_outputs, token_usage, error, variables \
             FROM execution_states WHERE execution_id = ?",
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(row_to_state(row)?))
    }

    async fn write_row(&self, state: &ExecutionState) -> Result<(), StateStoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO execution_states \
             (execution_id, status, diagram_id, started_at, ended_at, \
              node_states, node_outputs, token_usage, error, variables) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&state.id)
        .bind(status_str(state.status))
        .bind(&state.diagram_id)
        .bind(state.started_at.to_rfc3339())
        .bind(state.ended_at.map(|t| t.to_rfc3339()))
        .bind(serde_json::to_string(&state.node_states)?)
        .bind(serde_json::to_string(&state.node_outputs)?)
        .bind(serde_json::to_string(&state.token_usage)?)
        .bind(&state.error)
        .bind(serde_json::to_string(&state.variables)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Read-modify-write under the per-execution lock; used by every
    /// mutating method except `create_execution`/`save_state`, which
    /// already carry the full state.
    async fn with_state<F>(&self, execution_id: &str, f: F) -> Result<(), StateStoreError>
    where
        F: FnOnce(&mut ExecutionState),
    {
        let lock = self.lock_for(execution_id).await;
        let _guard = lock.lock().await;
        let mut state = self
            .read_row(execution_id)
            .await?
            .ok_or_else(|| StateStoreError::NotFound(execution_id.to_string()))?;
        f(&mut state);
        self.write_row(&state).await
    }
}

fn status_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Started => "started",
        ExecutionStatus::Running => "running",
        ExecutionStatus::Paused => "paused",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Aborted => "aborted",
    }
}

fn parse_status(raw: &str) -> Result<ExecutionStatus, StateStoreError> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|_| StateStoreError::Backend(format!("unknown execution status: {raw}")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StateStoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StateStoreError::Backend(format!("bad timestamp '{raw}': {e}")))
}

fn row_to_state(row: sqlx::sqlite::SqliteRow) -> Result<ExecutionState, StateStoreError> {
    let status_raw: String = row.try_get("status")?;
    let started_raw: String = row.try_get("started_at")?;
    let ended_raw: Option<String> = row.try_get("ended_at")?;
    let node_states_raw: String = row.try_get("node_states")?;
    let node_outputs_raw: String = row.try_get("node_outputs")?;
    let token_usage_raw: String = row.try_get("token_usage")?;
    let variables_raw: String = row.try_get("variables")?;

    Ok(ExecutionState {
        id: row.try_get("execution_id")?,
        status: parse_status(&status_raw)?,
        diagram_id: row.try_get("diagram_id")?,
        started_at: parse_timestamp(&started_raw)?,
        ended_at: ended_raw.map(|s| parse_timestamp(&s)).transpose()?,
        node_states: serde_json::from_str(&node_states_raw)?,
        node_outputs: serde_json::from_str(&node_outputs_raw)?,
        token_usage: serde_json::from_str(&token_usage_raw)?,
        error: row.try_get("error")?,
        variables: serde_json::from_str(&variables_raw)?,
    })
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn create_execution(
        &self,
        execution_id: ExecutionId,
        diagram_id: Option<String>,
        variables: Option<HashMap<String, Value>>,
    ) -> Result<ExecutionState, StateStoreError> {
        let state = ExecutionState::new(execution_id.clone(), diagram_id, variables.unwrap_or_default());
        self.write_row(&state).await?;
        debug!(execution_id = %execution_id, "execution created");
        Ok(state)
    }

    async fn get_state(&self, execution_id: &str) -> Result<Option<ExecutionState>, StateStoreError> {
        self.read_row(execution_id).await
    }

    async fn save_state(&self, state: ExecutionState) -> Result<(), StateStoreError> {
        let lock = self.lock_for(&state.id).await;
        let _guard = lock.lock().await;
        self.write_row(&state).await
    }

    async fn update_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Result<(), StateStoreError> {
        self.with_state(execution_id, |state| apply_status(state, status, error))
            .await
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
        self.with_state(execution_id, |state| {
            apply_node_status(state, node_id, status, output, error, skip_reason)
        })
        .await
    }

    async fn update_variables(
        &self,
        execution_id: &str,
        patch: HashMap<String, Value>,
    ) -> Result<(), StateStoreError> {
        self.with_state(execution_id, |state| state.variables.extend(patch))
            .await
    }

    async fn add_token_usage(&self, execution_id: &str, delta: TokenUsage) -> Result<(), StateStoreError> {
        self.with_state(execution_id, |state| state.token_usage.accumulate(&delta))
            .await
    }

    async fn list_executions(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExecutionSummary>, StateStoreError> {
        let rows = sqlx::query(
            "SELECT execution_id, status, started_at, ended_at, node_states, diagram_id \
             FROM execution_states ORDER BY started_at DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let node_states_raw: String = row.try_get("node_states")?;
            let node_states: HashMap<String, Value> = serde_json::from_str(&node_states_raw)?;
            let started_raw: String = row.try_get("started_at")?;
            let ended_raw: Option<String> = row.try_get("ended_at")?;
            let status_raw: String = row.try_get("status")?;
            summaries.push(ExecutionSummary {
                execution_id: row.try_get("execution_id")?,
                status: parse_status(&status_raw)?,
                started_at: parse_timestamp(&started_raw)?,
                ended_at: ended_raw.map(|s| parse_timestamp(&s)).transpose()?,
                total_nodes: node_states.len(),
                diagram_id: row.try_get("diagram_id")?,
            });
        }
        Ok(summaries)
    }

    async fn cleanup_old_states(&self, days: i64) -> Result<u64, StateStoreError> {
        let cutoff = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();
        let result = sqlx::query("DELETE FROM execution_states WHERE started_at < ?")
            .bind(&cutoff)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            if let Err(e) = sqlx::query("VACUUM").execute(&self.pool).await {
                warn!(error = %e, "VACUUM after cleanup failed, continuing");
            }
        }
        Ok(deleted)
    }
}
