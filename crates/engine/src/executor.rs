//! Sequential orchestration loop.
//!
//! `WorkflowExecutor` drives one [`WorkflowState`] to completion:
//! 1. Snapshots the run into a [`DecisionContext`](agents::DecisionContext) and asks the oracle.
//! 2. `Delegate` runs a registered worker; its output becomes the stage's
//!    pending result and the oracle is asked again.  The stage does not move.
//! 3. `Transition` is applied against the tracked current stage; a rejected
//!    transition aborts the run.
//! 4. `Complete` flags the run and ends the loop.
//!
//! There are no retries here.  Retry and backoff belong to the oracle or
//! to whoever calls the executor.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use agents::{Decision, DecisionOracle, RunContext, TransitionRecord, Worker, WorkerRequest};

use crate::models::Workflow;
use crate::state::WorkflowState;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Upper bound on oracle calls per run. `None` leaves liveness entirely
    /// to the oracle.
    pub max_turns: Option<usize>,
}

// ---------------------------------------------------------------------------
// Worker registry
// ---------------------------------------------------------------------------

/// Maps `worker_type` strings to worker implementations.
pub type WorkerRegistry = HashMap<String, Arc<dyn Worker>>;

// ---------------------------------------------------------------------------
// Output of a completed run
// ---------------------------------------------------------------------------

/// The result of running a workflow to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow: String,
    /// Stage the run was in when it completed.
    pub final_stage: String,
    pub summary: Option<String>,
    /// Last recorded result per stage.
    pub results: BTreeMap<String, Value>,
    pub history: Vec<TransitionRecord>,
    /// Delegation output produced in the final stage, if any.
    pub final_output: Option<Value>,
    /// Number of oracle calls made.
    pub turns: usize,
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Runs workflows one stage at a time under oracle control.
pub struct WorkflowExecutor {
    oracle: Arc<dyn DecisionOracle>,
    workers: WorkerRegistry,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    /// Create a new executor.
    pub fn new(oracle: Arc<dyn DecisionOracle>, workers: WorkerRegistry, config: ExecutorConfig) -> Self {
        Self { oracle, workers, config }
    }

    /// Start a fresh run of `workflow` and drive it to completion.
    ///
    /// # Errors
    /// Configuration errors, rejected transitions, oracle or worker
    /// failures, and [`EngineError::TurnLimitExceeded`] when configured.
    #[instrument(skip(self, workflow, input), fields(workflow = %workflow.name))]
    pub async fn run(&self, workflow: Arc<Workflow>, input: Value) -> Result<RunReport, EngineError> {
        let mut state = WorkflowState::new(workflow.clone())?;
        let ctx = RunContext::new(workflow.name.clone(), input);
        self.drive(&mut state, &ctx).await
    }

    /// Drive a caller-owned state until it is complete.
    ///
    /// On error the state is left exactly as it was after the last applied
    /// transition, so the caller can inspect it.
    #[instrument(skip(self, state, ctx), fields(run_id = %ctx.run_id))]
    pub async fn drive(&self, state: &mut WorkflowState, ctx: &RunContext) -> Result<RunReport, EngineError> {
        let mut pending: Option<Value> = None;
        let mut turns = 0usize;

        info!(stage = %state.current_stage_id(), "run started");

        while !state.is_complete() {
            if let Some(limit) = self.config.max_turns {
                if turns >= limit {
                    return Err(EngineError::TurnLimitExceeded(limit));
                }
            }
            turns += 1;

            let snapshot = state.decision_context(ctx, pending.clone());
            let decision = self
                .oracle
                .decide(&snapshot)
                .await
                .map_err(|e| EngineError::OracleFailure {
                    stage: snapshot.stage_id.clone(),
                    message: e.to_string(),
                })?;

            match decision {
                None => {
                    debug!(stage = %snapshot.stage_id, turn = turns, "no recognized decision, asking again");
                }

                Some(Decision::Delegate { worker_type, instructions }) => {
                    let output = self.delegate(state, ctx, &worker_type, instructions).await?;
                    pending = Some(output);
                }

                Some(Decision::Transition { from, to, reason, summary }) => {
                    let current = state.current_stage_id().to_owned();
                    if from != current {
                        warn!(claimed = %from, actual = %current, "oracle echoed a stale source stage, using tracked stage");
                    }
                    let result = pending.take().unwrap_or(Value::String(summary));
                    state.transition_to(&to, reason, result)?;
                    info!(%current, %to, "stage transition");
                }

                Some(Decision::Complete { summary }) => {
                    let stage = state.current_stage();
                    if !stage.is_final {
                        warn!(stage = %stage.id, "run completed from a non-final stage");
                    }
                    state.mark_complete();
                    state.set_summary(summary);
                }
            }
        }

        info!(
            stage = %state.current_stage_id(),
            transitions = state.transition_count(),
            turns,
            "run completed"
        );

        Ok(RunReport {
            run_id: ctx.run_id,
            workflow: state.workflow().name.clone(),
            final_stage: state.current_stage_id().to_owned(),
            summary: state.summary().map(str::to_owned),
            results: state.results().clone(),
            history: state.history().to_vec(),
            final_output: pending,
            turns,
        })
    }

    // -----------------------------------------------------------------------
    // Internal: hand the current stage's work to a worker.
    // -----------------------------------------------------------------------

    async fn delegate(
        &self,
        state: &WorkflowState,
        ctx: &RunContext,
        worker_type: &str,
        instructions: String,
    ) -> Result<Value, EngineError> {
        let stage = state.current_stage();
        let worker = self
            .workers
            .get(worker_type)
            .ok_or_else(|| EngineError::UnknownWorker {
                stage: stage.id.clone(),
                worker: worker_type.to_owned(),
            })?;

        let request = WorkerRequest {
            worker_type: worker_type.to_owned(),
            stage: stage.id.clone(),
            tools: stage.tools.clone(),
            instructions,
            prior_results: state.results().clone(),
        };

        debug!(stage = %stage.id, worker = %worker_type, "delegating");

        worker
            .run(&request, ctx)
            .await
            .map_err(|e| EngineError::WorkerFailure {
                stage: stage.id.clone(),
                worker: worker_type.to_owned(),
                message: e.to_string(),
            })
    }
}
