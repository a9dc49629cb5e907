//! Scheduler/engine (C4): drives one diagram execution to completion over
//! the graph, state, control, router, and handler crates.
//!
//! [`Engine`] is the facade this crate exports: construct one per process
//! (or per tenant), call [`Engine::execute`] per run. Concurrent
//! executions share nothing but the `StateStore` and `Router`, each of
//! which is internally locked per execution.

mod config;
mod control_registry;
mod engine;
mod error;
mod events;
mod options;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
pub use events::{build_event, SequenceCounter};
pub use options::ExecutionOptions;
