//! The facade's aggregate error type. Every lower-crate error converts in
//! via `#[from]` at this one remaining boundary, the same layered-error
//! pattern `dipeo-engine::EngineError` uses one level down.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DipeoError {
    #[error(transparent)]
    Engine(#[from] dipeo_engine::EngineError),

    #[error(transparent)]
    Router(#[from] dipeo_router::RouterError),

    #[error("subscription {0} has no associated connection")]
    UnknownSubscription(String),
}
