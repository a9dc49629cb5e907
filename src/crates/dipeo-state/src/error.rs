//! Errors surfaced by a [`crate::StateStore`] implementation.

use thiserror::Error;

use crate::model::ExecutionId;

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("execution {0} not found")]
    NotFound(ExecutionId),

    #[error("persistence backend error: {0}")]
    Backend(String),

    #[error("failed to (de)serialize execution state: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("sqlite backend error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}
