//! Concurrent driving executor.
//!
//! `ParallelExecutor` owns the control loop around a [`ConcurrentScheduler`]:
//! it starts every runnable stage as a tokio task, waits for whichever
//! finishes first, and reports completions to the scheduler one at a time.
//! Only the workers run concurrently; the scheduler is touched from this
//! loop alone, so it needs no lock.
//!
//! Without a `stage_timeout`, a worker that never returns hangs the run.
//! There is no cancellation of individual stages; on the first failure every
//! other in-flight stage is aborted and the run fails.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use agents::{RunContext, Worker, WorkerRequest};

use crate::models::Workflow;
use crate::scheduler::{ConcurrentScheduler, LifecycleEvent, StageTiming};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the parallel executor.
#[derive(Debug, Clone, Default)]
pub struct ParallelConfig {
    /// Maximum number of stages running at once. `None` means no limit.
    pub max_concurrent: Option<usize>,
    /// Per-stage deadline. `None` waits forever.
    pub stage_timeout: Option<Duration>,
}

// ---------------------------------------------------------------------------
// Output of a completed run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelRunReport {
    pub run_id: Uuid,
    pub workflow: String,
    pub results: BTreeMap<String, Value>,
    pub timings: BTreeMap<String, StageTiming>,
    pub events: Vec<LifecycleEvent>,
    /// Stage IDs in the order their completions arrived.
    pub completion_order: Vec<String>,
}

// ---------------------------------------------------------------------------
// ParallelExecutor
// ---------------------------------------------------------------------------

/// Runs every stage of a dependency graph, as many at a time as allowed.
///
/// Each stage becomes one [`WorkerRequest`] whose `worker_type` is the stage
/// ID, whose instructions are the stage goal, and whose prior results are
/// those of the stage's dependencies.
pub struct ParallelExecutor {
    worker: Arc<dyn Worker>,
    config: ParallelConfig,
}

impl ParallelExecutor {
    pub fn new(worker: Arc<dyn Worker>, config: ParallelConfig) -> Self {
        Self { worker, config }
    }

    /// Start a fresh concurrent run of `workflow`.
    ///
    /// # Errors
    /// Configuration errors (including dependency cycles), the first worker
    /// failure, or [`EngineError::StageTimedOut`].
    #[instrument(skip(self, workflow, input), fields(workflow = %workflow.name))]
    pub async fn run(&self, workflow: Arc<Workflow>, input: Value) -> Result<ParallelRunReport, EngineError> {
        let mut scheduler = ConcurrentScheduler::new(workflow.clone())?;
        let ctx = Arc::new(RunContext::new(workflow.name.clone(), input));
        self.drive(&mut scheduler, ctx).await
    }

    /// Drive a caller-owned scheduler until every stage has completed.
    #[instrument(skip(self, scheduler, ctx), fields(run_id = %ctx.run_id))]
    pub async fn drive(
        &self,
        scheduler: &mut ConcurrentScheduler,
        ctx: Arc<RunContext>,
    ) -> Result<ParallelRunReport, EngineError> {
        let limit = self.config.max_concurrent.unwrap_or(usize::MAX).max(1);
        let mut in_flight: JoinSet<Result<Value, EngineError>> = JoinSet::new();
        let mut task_stages: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut completion_order = Vec::with_capacity(scheduler.workflow().len());

        info!(stages = scheduler.workflow().len(), limit = ?self.config.max_concurrent, "parallel run started");

        while !scheduler.is_complete() {
            for stage_id in scheduler.runnable_stages() {
                if in_flight.len() >= limit {
                    break;
                }
                let request = worker_request(scheduler, &stage_id)?;
                scheduler.start_stage(&stage_id)?;

                let worker = self.worker.clone();
                let ctx = ctx.clone();
                let timeout = self.config.stage_timeout;
                let handle = in_flight.spawn(run_stage(worker, request, ctx, timeout));
                task_stages.insert(handle.id(), stage_id);
            }

            let Some(joined) = in_flight.join_next_with_id().await else {
                return Err(EngineError::Stalled(scheduler.pending()));
            };

            let (stage_id, outcome) = match joined {
                Ok((id, outcome)) => (task_stages.remove(&id).unwrap_or_default(), outcome),
                Err(join_err) => {
                    let stage = task_stages.remove(&join_err.id()).unwrap_or_default();
                    (
                        stage.clone(),
                        Err(EngineError::WorkerFailure {
                            stage,
                            worker: "task".into(),
                            message: join_err.to_string(),
                        }),
                    )
                }
            };

            match outcome {
                Ok(result) => {
                    let unlocked = scheduler.complete_stage(&stage_id, result)?;
                    debug!(stage = %stage_id, ?unlocked, in_flight = in_flight.len(), "completion reconciled");
                    completion_order.push(stage_id);
                }
                Err(e) => {
                    error!(stage = %stage_id, error = %e, "stage failed, aborting run");
                    in_flight.abort_all();
                    return Err(e);
                }
            }
        }

        info!(completed = completion_order.len(), "parallel run completed");

        Ok(ParallelRunReport {
            run_id: ctx.run_id,
            workflow: scheduler.workflow().name.clone(),
            results: scheduler.results().clone(),
            timings: scheduler.timings().clone(),
            events: scheduler.events().to_vec(),
            completion_order,
        })
    }
}

/// Build the assignment for `stage_id` from the scheduler's current results.
fn worker_request(scheduler: &ConcurrentScheduler, stage_id: &str) -> Result<WorkerRequest, EngineError> {
    let stage = scheduler.workflow().stage(stage_id)?;
    let prior_results = stage
        .depends_on
        .iter()
        .filter_map(|dep| scheduler.results().get(dep).map(|v| (dep.clone(), v.clone())))
        .collect();

    Ok(WorkerRequest {
        worker_type: stage.id.clone(),
        stage: stage.id.clone(),
        tools: stage.tools.clone(),
        instructions: stage.goal.clone(),
        prior_results,
    })
}

async fn run_stage(
    worker: Arc<dyn Worker>,
    request: WorkerRequest,
    ctx: Arc<RunContext>,
    timeout: Option<Duration>,
) -> Result<Value, EngineError> {
    let failure = |message: String| EngineError::WorkerFailure {
        stage: request.stage.clone(),
        worker: request.worker_type.clone(),
        message,
    };

    match timeout {
        Some(limit) => match tokio::time::timeout(limit, worker.run(&request, &ctx)).await {
            Ok(result) => result.map_err(|e| failure(e.to_string())),
            Err(_) => Err(EngineError::StageTimedOut {
                stage: request.stage.clone(),
                timeout: limit,
            }),
        },
        None => worker
            .run(&request, &ctx)
            .await
            .map_err(|e| failure(e.to_string())),
    }
}
