//! `engine` crate: workflow models, validation, and the two run modes.
//!
//! - Sequential: [`WorkflowState`] driven by [`WorkflowExecutor`] under a
//!   decision oracle.
//! - Concurrent: [`ConcurrentScheduler`] driven by [`ParallelExecutor`]
//!   over the stage dependency graph.

pub mod models;
pub mod error;
pub mod dag;
pub mod state;
pub mod scheduler;
pub mod executor;
pub mod parallel;

pub use models::{Workflow, Stage, Transition};
pub use error::EngineError;
pub use dag::{execution_waves, topological_order, validate_workflow};
pub use state::WorkflowState;
pub use scheduler::{ConcurrentScheduler, EventKind, LifecycleEvent, StageStatus, StageTiming};
pub use executor::{ExecutorConfig, RunReport, WorkerRegistry, WorkflowExecutor};
pub use parallel::{ParallelConfig, ParallelExecutor, ParallelRunReport};
