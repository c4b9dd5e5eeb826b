//! The `DecisionOracle` and `Worker` traits, plus the data they exchange
//! with the engine.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::AgentError;

/// Per-run context handed to every oracle and worker call.
///
/// Defined here (in the agents crate) so both the engine and individual
/// collaborator implementations can import it without a circular dependency.
/// One value is created per run and owned by it; nothing is looked up from
/// process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    /// ID of the current run.
    pub run_id: Uuid,
    /// Name of the workflow being executed.
    pub workflow: String,
    /// Initial input supplied when the run was started.
    pub input: Value,
    /// Free-form, caller-owned key/value pairs (session ids, tenant, ...).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl RunContext {
    pub fn new(workflow: impl Into<String>, input: Value) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            workflow: workflow.into(),
            input,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One applied stage transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: String,
    pub to: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// A declared outgoing transition, as presented to the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOption {
    pub target: String,
    /// Advisory text; the engine never evaluates it.
    pub condition: String,
}

/// Snapshot of the run the oracle decides on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionContext {
    pub run: RunContext,
    pub stage_id: String,
    pub stage_name: String,
    pub goal: String,
    pub tools: Vec<String>,
    pub transitions: Vec<TransitionOption>,
    pub is_final: bool,
    /// Last recorded result per stage.
    pub results: BTreeMap<String, Value>,
    pub history: Vec<TransitionRecord>,
    /// Output of the most recent delegation in the current stage, not yet
    /// committed by a transition.
    pub pending_result: Option<Value>,
}

/// What the oracle wants to happen next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    /// Hand the current stage's work to a worker; the stage does not advance.
    Delegate {
        worker_type: String,
        instructions: String,
    },
    /// Move to another stage. `from` is informational only.
    Transition {
        from: String,
        to: String,
        reason: String,
        summary: String,
    },
    /// Finish the run.
    Complete { summary: String },
}

/// The external decision source driving the sequential loop.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Pick the next move. `Ok(None)` means the turn produced nothing the
    /// engine recognizes; the loop asks again without touching state.
    async fn decide(&self, ctx: &DecisionContext) -> Result<Option<Decision>, AgentError>;
}

/// Everything a worker gets for one assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub worker_type: String,
    pub stage: String,
    /// Tool identifiers the stage permits, in declaration order.
    pub tools: Vec<String>,
    pub instructions: String,
    pub prior_results: BTreeMap<String, Value>,
}

/// Performs the actual work of a stage.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn run(&self, request: &WorkerRequest, ctx: &RunContext) -> Result<Value, AgentError>;
}
