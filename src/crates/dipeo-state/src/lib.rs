//! Durable per-execution record keeping: node statuses, outputs,
//! variables, and token-usage totals.
//!
//! Two backends implement the same [`StateStore`] contract: [`memory`]
//! for tests and embedders that don't need cross-process durability, and
//! [`sqlite`] for a write-ahead-logged embedded database. Both serialize
//! mutation per execution and hand out owned snapshots on read.

mod error;
mod memory;
mod model;
mod mutate;
mod sqlite;
mod store;

pub use error::StateStoreError;
pub use memory::InMemoryStateStore;
pub use model::{
    ExecutionId, ExecutionState, ExecutionStatus, ExecutionSummary, NodeExecutionStatus, NodeId,
    NodeOutput, NodeState, TokenUsage,
};
pub use sqlite::SqliteStateStore;
pub use store::StateStore;
