//! Built-in handlers for test and demo coverage only, per `SPEC_FULL.md`
//! §4.6: `start`, `endpoint`, `condition`, and a `code_job` restricted to a
//! tiny safe expression subset. Every other node type named in the
//! OVERVIEW (`person_job`, `api_job`, `db`, `sub_diagram`, …) has no
//! production body here — an embedding application supplies a
//! [`crate::Handler`] trait object for it.

mod code_job;
mod condition;
mod endpoint;
mod start;

pub use code_job::CodeJobHandler;
pub use condition::{build_context as condition_context, ConditionHandler};
pub use endpoint::EndpointHandler;
pub use start::StartHandler;
