//! Collaborator-level error type.

use thiserror::Error;

/// Errors returned by a decision oracle or a worker.
///
/// The engine never retries on either variant; it wraps the message together
/// with the stage it happened in and hands it back to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// The oracle could not produce a decision.
    #[error("decision oracle error: {0}")]
    Oracle(String),

    /// The worker failed to finish its assignment.
    #[error("worker error: {0}")]
    Worker(String),
}
