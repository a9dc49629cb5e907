//! Plain data types persisted by the state store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type ExecutionId = String;
pub type NodeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Started,
    Running,
    Paused,
    Completed,
    Failed,
    Aborted,
}

impl ExecutionStatus {
    /// `is_active` per the data model: STARTED, RUNNING, or PAUSED.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Started | Self::Running | Self::Paused)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cached: Option<u64>,
    pub total: u64,
}

impl TokenUsage {
    pub fn accumulate(&mut self, delta: &TokenUsage) {
        self.input += delta.input;
        self.output += delta.output;
        if let Some(cached) = delta.cached {
            self.cached = Some(self.cached.unwrap_or(0) + cached);
        }
        self.total = self.input + self.output;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutput {
    pub value: Value,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl NodeOutput {
    /// Pulls `metadata.tokenUsage` out if present, per the handler contract.
    pub fn token_usage(&self) -> Option<TokenUsage> {
        self.metadata
            .get("tokenUsage")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub status: NodeExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub skip_reason: Option<String>,
    pub token_usage: Option<TokenUsage>,
}

impl NodeState {
    pub fn pending() -> Self {
        Self {
            status: NodeExecutionStatus::Pending,
            started_at: None,
            ended_at: None,
            error: None,
            skip_reason: None,
            token_usage: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub id: ExecutionId,
    pub status: ExecutionStatus,
    pub diagram_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub node_states: HashMap<NodeId, NodeState>,
    pub node_outputs: HashMap<NodeId, NodeOutput>,
    pub variables: HashMap<String, Value>,
    pub token_usage: TokenUsage,
    pub error: Option<String>,
}

impl ExecutionState {
    pub fn new(id: ExecutionId, diagram_id: Option<String>, variables: HashMap<String, Value>) -> Self {
        Self {
            id,
            status: ExecutionStatus::Started,
            diagram_id,
            started_at: Utc::now(),
            ended_at: None,
            node_states: HashMap::new(),
            node_outputs: HashMap::new(),
            variables,
            token_usage: TokenUsage::default(),
            error: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// A row of [`crate::store::StateStore::list_executions`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_nodes: usize,
    pub diagram_id: Option<String>,
}
