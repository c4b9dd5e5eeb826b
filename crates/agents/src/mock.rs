//! Test doubles for [`DecisionOracle`] and [`Worker`].
//!
//! Useful in unit and integration tests where a real model-backed oracle or
//! tool-running worker is either unavailable or irrelevant.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{AgentError, Decision, DecisionContext, DecisionOracle, RunContext, Worker, WorkerRequest};

/// An oracle that replays a fixed script of decisions, one per call.
///
/// `None` entries simulate turns with no recognized outcome. Once the script
/// runs dry every further call fails with [`AgentError::Oracle`].
pub struct ScriptedOracle {
    script: Mutex<VecDeque<Option<Decision>>>,
    /// All contexts seen by this oracle (in call order).
    pub seen: Arc<Mutex<Vec<DecisionContext>>>,
}

impl ScriptedOracle {
    pub fn new(script: Vec<Option<Decision>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience for scripts without empty turns.
    pub fn from_decisions(decisions: Vec<Decision>) -> Self {
        Self::new(decisions.into_iter().map(Some).collect())
    }

    /// Number of times the oracle has been consulted.
    pub fn call_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// Decisions not yet handed out.
    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn decide(&self, ctx: &DecisionContext) -> Result<Option<Decision>, AgentError> {
        self.seen.lock().unwrap().push(ctx.clone());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(decision) => {
                debug!(stage = %ctx.stage_id, ?decision, "scripted decision");
                Ok(decision)
            }
            None => Err(AgentError::Oracle("script exhausted".into())),
        }
    }
}

/// Behaviour injected into `MockWorker` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value, merged with the request's stage name.
    ReturnValue(Value),
    /// Return these values in order, one per call; the last one repeats.
    Sequence(Vec<Value>),
    /// Fail with a worker error.
    Fail(String),
}

/// A mock worker that records every request it receives and returns a
/// programmer-specified result.
pub struct MockWorker {
    /// What the worker will do when `run` is called.
    pub behaviour: MockBehaviour,
    /// Artificial latency, per stage id; unmatched stages return immediately.
    pub delays: Vec<(String, Duration)>,
    /// All requests seen by this worker (in call order).
    pub calls: Arc<Mutex<Vec<WorkerRequest>>>,
}

impl MockWorker {
    /// Create a mock that always succeeds with the given value.
    pub fn returning(value: Value) -> Self {
        Self::with_behaviour(MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that hands out `values` one call at a time.
    pub fn sequence(values: Vec<Value>) -> Self {
        Self::with_behaviour(MockBehaviour::Sequence(values))
    }

    /// Create a mock that always fails.
    pub fn failing(msg: impl Into<String>) -> Self {
        Self::with_behaviour(MockBehaviour::Fail(msg.into()))
    }

    fn with_behaviour(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour,
            delays: Vec::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make requests for `stage` take `delay` before answering.
    pub fn with_delay(mut self, stage: impl Into<String>, delay: Duration) -> Self {
        self.delays.push((stage.into(), delay));
        self
    }

    /// Number of times this worker has been run.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Stage ids of every request, in call order.
    pub fn stages_called(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.stage.clone())
            .collect()
    }
}

#[async_trait]
impl Worker for MockWorker {
    async fn run(&self, request: &WorkerRequest, _ctx: &RunContext) -> Result<Value, AgentError> {
        let call_index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.len() - 1
        };

        if let Some((_, delay)) = self.delays.iter().find(|(s, _)| *s == request.stage) {
            tokio::time::sleep(*delay).await;
        }

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => {
                // Tag the output with the stage so tests can trace where it came from.
                let mut out = json!({ "stage": request.stage });
                if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
                    for (k, val) in v_obj {
                        out_obj.insert(k.clone(), val.clone());
                    }
                }
                Ok(out)
            }
            MockBehaviour::Sequence(values) => values
                .get(call_index)
                .or_else(|| values.last())
                .cloned()
                .ok_or_else(|| AgentError::Worker("empty sequence".into())),
            MockBehaviour::Fail(msg) => Err(AgentError::Worker(msg.clone())),
        }
    }
}
