//! Stand-in collaborators for `waypoint simulate`.
//!
//! Neither talks to a model or touches the filesystem; they exist so a
//! workflow definition can be exercised end to end from the command line.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use agents::{AgentError, Decision, DecisionContext, DecisionOracle, RunContext, Worker, WorkerRequest};

/// Worker type the autopilot delegates to.
pub const ECHO_WORKER: &str = "echo";

/// Delegates once per stage, then follows the stage's first declared
/// transition; completes as soon as it reaches a final stage or a dead end.
pub struct AutopilotOracle;

#[async_trait]
impl DecisionOracle for AutopilotOracle {
    async fn decide(&self, ctx: &DecisionContext) -> Result<Option<Decision>, AgentError> {
        if ctx.pending_result.is_none() {
            return Ok(Some(Decision::Delegate {
                worker_type: ECHO_WORKER.into(),
                instructions: ctx.goal.clone(),
            }));
        }

        if ctx.is_final {
            return Ok(Some(Decision::Complete {
                summary: format!("reached final stage '{}'", ctx.stage_id),
            }));
        }

        let decision = match ctx.transitions.first() {
            Some(next) => Decision::Transition {
                from: ctx.stage_id.clone(),
                to: next.target.clone(),
                reason: if next.condition.is_empty() {
                    "first declared transition".to_string()
                } else {
                    next.condition.clone()
                },
                summary: format!("left '{}'", ctx.stage_id),
            },
            None => Decision::Complete {
                summary: format!("no way out of '{}'", ctx.stage_id),
            },
        };
        debug!(stage = %ctx.stage_id, ?decision, "autopilot decision");
        Ok(Some(decision))
    }
}

/// Echoes the assignment back as its result.
pub struct EchoWorker;

#[async_trait]
impl Worker for EchoWorker {
    async fn run(&self, request: &WorkerRequest, ctx: &RunContext) -> Result<Value, AgentError> {
        Ok(json!({
            "run_id": ctx.run_id,
            "stage": request.stage,
            "instructions": request.instructions,
            "tools": request.tools,
            "inputs": request.prior_results.keys().collect::<Vec<_>>(),
        }))
    }
}
