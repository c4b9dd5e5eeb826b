//! `agents` crate: the contracts the orchestration core consumes.
//!
//! The decision oracle picks the next move at every turn and a [`Worker`]
//! performs a stage's actual work under delegation.  Neither lives in the
//! engine; the engine only talks to them through the traits defined here.

pub mod error;
pub mod traits;
pub mod mock;

pub use error::AgentError;
pub use traits::{
    Decision, DecisionContext, DecisionOracle, RunContext, TransitionOption, TransitionRecord,
    Worker, WorkerRequest,
};
