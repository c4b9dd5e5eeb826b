//! Engine-level error types.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the workflow engine (validation + execution).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    // ------ Configuration errors ------

    /// A stage identifier does not exist in the workflow.
    #[error("unknown stage: '{0}'")]
    UnknownStage(String),

    /// The workflow declares no stages at all.
    #[error("workflow '{0}' has no stages")]
    EmptyWorkflow(String),

    /// A stage is stored under a key that differs from its own ID.
    #[error("stage stored under key '{key}' has ID '{id}'")]
    StageIdMismatch { key: String, id: String },

    /// A declared transition points at a stage that doesn't exist.
    #[error("stage '{stage}' declares a transition to unknown stage '{target}'")]
    UnknownTransitionTarget { stage: String, target: String },

    /// A stage depends on a stage that doesn't exist.
    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    /// The stage dependency graph is not acyclic.
    #[error("stage dependency graph contains a cycle through {0:?}")]
    DependencyCycle(Vec<String>),

    // ------ Sequential run errors ------

    /// The requested target is not among the current stage's transitions.
    /// State is left untouched.
    #[error("invalid transition '{from}' -> '{to}' (allowed: {allowed:?})")]
    InvalidTransition {
        from: String,
        to: String,
        allowed: Vec<String>,
    },

    /// The decision oracle returned an error.
    #[error("decision oracle failed in stage '{stage}': {message}")]
    OracleFailure { stage: String, message: String },

    /// A delegation named a worker type nobody registered.
    #[error("no worker registered for type '{worker}' (stage '{stage}')")]
    UnknownWorker { stage: String, worker: String },

    /// A worker failed; fatal unless the caller re-delegates.
    #[error("worker '{worker}' failed in stage '{stage}': {message}")]
    WorkerFailure {
        stage: String,
        worker: String,
        message: String,
    },

    /// The configured turn ceiling was reached before the run completed.
    #[error("run did not complete within {0} oracle turns")]
    TurnLimitExceeded(usize),

    // ------ Concurrent run errors ------

    /// `start_stage`/`complete_stage` called on a stage outside the expected set.
    #[error("cannot {operation} stage '{stage}': stage is {state}")]
    SchedulerPrecondition {
        stage: String,
        operation: &'static str,
        state: &'static str,
    },

    /// A stage outlived the configured per-stage timeout.
    #[error("stage '{stage}' did not complete within {timeout:?}")]
    StageTimedOut { stage: String, timeout: Duration },

    /// Nothing is running, nothing is runnable, and the run is not complete.
    #[error("run stalled with pending stages {0:?}")]
    Stalled(Vec<String>),
}
