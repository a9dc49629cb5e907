//! Handler registry and contract (C6): maps a node's `type` to a handler,
//! defines what handlers see (the [`NodeContext`]) and must return
//! ([`dipeo_state::NodeOutput`]), and ships three minimal built-in
//! handlers sufficient to exercise the Engine end to end.
//!
//! Grounded on `langgraph-core::graph::NodeSpec` (executor-as-trait-object
//! shape) and `orchestrator::executor` (service-injection pattern).
//! Production node bodies (`person_job`, `api_job`, `db`, `sub_diagram`,
//! …) are out of this crate's scope entirely — they are trait objects an
//! embedding application registers at startup.

pub mod builtin;
mod contract;
mod conversation;
mod error;
mod registry;
mod schema;

pub use contract::{Handler, Inputs, NodeContext, Services};
pub use conversation::{format_with_history, parse_conversation, ConversationMessage};
pub use error::HandlerError;
pub use registry::HandlerRegistry;
pub use schema::{FieldKind, PropsField, PropsSchema};
