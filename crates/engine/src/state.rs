//! Sequential run state: one current stage, moved only through declared
//! transitions.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use agents::{DecisionContext, RunContext, TransitionOption, TransitionRecord};

use crate::models::{Stage, Workflow};
use crate::{validate_workflow, EngineError};

/// Mutable state of one sequential run.
///
/// Only [`WorkflowState::transition_to`] moves the current stage, and it
/// either applies completely or not at all.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    workflow: Arc<Workflow>,
    current: String,
    results: BTreeMap<String, Value>,
    history: Vec<TransitionRecord>,
    transition_count: u64,
    complete: bool,
    summary: Option<String>,
}

impl WorkflowState {
    /// Start a run at the workflow's initial stage.
    ///
    /// # Errors
    /// Any configuration error reported by [`validate_workflow`].
    pub fn new(workflow: Arc<Workflow>) -> Result<Self, EngineError> {
        validate_workflow(&workflow)?;
        let current = workflow.initial_stage.clone();
        Ok(Self {
            workflow,
            current,
            results: BTreeMap::new(),
            history: Vec::new(),
            transition_count: 0,
            complete: false,
            summary: None,
        })
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// The stage the run is in.
    pub fn current_stage(&self) -> &Stage {
        // `current` only ever holds the validated initial stage or a declared
        // transition target, both of which exist.
        &self.workflow.stages[&self.current]
    }

    pub fn current_stage_id(&self) -> &str {
        &self.current
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Move to `target`, recording `result` for the stage being left.
    ///
    /// The result overwrites anything previously recorded for that stage.
    /// Reaching a final stage does not complete the run.
    ///
    /// # Errors
    /// [`EngineError::InvalidTransition`] if `target` is not one of the
    /// current stage's transitions. Nothing is changed in that case.
    pub fn transition_to(
        &mut self,
        target: &str,
        reason: impl Into<String>,
        result: Value,
    ) -> Result<(), EngineError> {
        let stage = self.current_stage();
        if !stage.allows(target) {
            return Err(EngineError::InvalidTransition {
                from: self.current.clone(),
                to: target.to_owned(),
                allowed: stage.targets(),
            });
        }

        let from = std::mem::replace(&mut self.current, target.to_owned());
        self.results.insert(from.clone(), result);
        self.history.push(TransitionRecord {
            from: from.clone(),
            to: target.to_owned(),
            reason: reason.into(),
            at: Utc::now(),
        });
        self.transition_count += 1;

        debug!(%from, to = %target, count = self.transition_count, "transition applied");
        Ok(())
    }

    /// Flag the run as complete. Calling it again is a no-op.
    ///
    /// The current stage does not have to be final.
    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    /// Attach the closing summary; the last call wins.
    pub fn set_summary(&mut self, summary: impl Into<String>) {
        self.summary = Some(summary.into());
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Last recorded result per stage.
    pub fn results(&self) -> &BTreeMap<String, Value> {
        &self.results
    }

    pub fn result_for(&self, stage: &str) -> Option<&Value> {
        self.results.get(stage)
    }

    /// Applied transitions, oldest first.
    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Snapshot the run for the decision oracle.
    pub fn decision_context(&self, run: &RunContext, pending_result: Option<Value>) -> DecisionContext {
        let stage = self.current_stage();
        DecisionContext {
            run: run.clone(),
            stage_id: stage.id.clone(),
            stage_name: stage.name.clone(),
            goal: stage.goal.clone(),
            tools: stage.tools.clone(),
            transitions: stage
                .transitions
                .iter()
                .map(|t| TransitionOption {
                    target: t.target.clone(),
                    condition: t.condition.clone(),
                })
                .collect(),
            is_final: stage.is_final,
            results: self.results.clone(),
            history: self.history.clone(),
            pending_result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// analyze -> {security, style}, security -> {reject, style},
    /// style -> {suggest, approve}, suggest -> approve.
    fn review() -> Arc<Workflow> {
        Arc::new(Workflow::new(
            "code-review",
            "review a change",
            "analyze",
            vec![
                Stage::new("analyze", "Analyze")
                    .with_transition("security", "touches sensitive code")
                    .with_transition("style", "otherwise"),
                Stage::new("security", "Security review")
                    .with_transition("reject", "vulnerability found")
                    .with_transition("style", "clean"),
                Stage::new("style", "Style review")
                    .with_transition("suggest", "nits")
                    .with_transition("approve", "clean"),
                Stage::new("suggest", "Suggest").with_transition("approve", "posted"),
                Stage::new("reject", "Reject").terminal(),
                Stage::new("approve", "Approve").terminal(),
            ],
        ))
    }

    #[test]
    fn walks_declared_path_without_completing() {
        let mut state = WorkflowState::new(review()).unwrap();
        assert_eq!(state.current_stage().id, "analyze");

        state.transition_to("security", "auth touched", json!("a")).unwrap();
        state.transition_to("style", "no findings", json!("s")).unwrap();
        state.transition_to("approve", "clean", json!("st")).unwrap();

        assert_eq!(state.current_stage_id(), "approve");
        assert!(state.current_stage().is_final);
        assert_eq!(state.history().len(), 3);
        assert_eq!(state.transition_count(), 3);
        assert!(!state.is_complete());

        state.mark_complete();
        assert!(state.is_complete());
    }

    #[test]
    fn undeclared_target_is_rejected_without_mutation() {
        let mut state = WorkflowState::new(review()).unwrap();
        let err = state
            .transition_to("approve", "skip everything", json!(null))
            .unwrap_err();

        assert_eq!(
            err,
            EngineError::InvalidTransition {
                from: "analyze".into(),
                to: "approve".into(),
                allowed: vec!["security".into(), "style".into()],
            }
        );
        assert_eq!(state.current_stage_id(), "analyze");
        assert!(state.results().is_empty());
        assert!(state.history().is_empty());
        assert_eq!(state.transition_count(), 0);
    }

    #[test]
    fn unknown_target_is_an_invalid_transition() {
        let mut state = WorkflowState::new(review()).unwrap();
        assert!(matches!(
            state.transition_to("nowhere", "", json!(null)),
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn transition_acceptance_matches_declared_targets_for_every_stage() {
        let wf = review();
        for from in wf.stage_ids() {
            // Start directly in `from`.
            let mut local = (*wf).clone();
            local.initial_stage = from.clone();
            let local = Arc::new(local);

            for to in wf.stage_ids() {
                let mut state = WorkflowState::new(local.clone()).unwrap();
                let allowed = wf.stage(&from).unwrap().allows(&to);
                let outcome = state.transition_to(&to, "probe", json!(null));
                assert_eq!(outcome.is_ok(), allowed, "{from} -> {to}");
                assert_eq!(state.history().len() as u64, state.transition_count());
                if !allowed {
                    assert_eq!(state.current_stage_id(), from);
                }
            }
        }
    }

    #[test]
    fn results_use_last_write_wins() {
        let wf = Arc::new(Workflow::new(
            "loop",
            "",
            "draft",
            vec![
                Stage::new("draft", "Draft").with_transition("review", ""),
                Stage::new("review", "Review").with_transition("draft", "changes requested"),
            ],
        ));
        let mut state = WorkflowState::new(wf).unwrap();
        state.transition_to("review", "v1", json!({ "v": 1 })).unwrap();
        state.transition_to("draft", "nits", json!("fix")).unwrap();
        state.transition_to("review", "v2", json!({ "v": 2 })).unwrap();

        assert_eq!(state.result_for("draft"), Some(&json!({ "v": 2 })));
        assert_eq!(state.result_for("review"), Some(&json!("fix")));
        assert_eq!(state.transition_count(), 3);
    }

    #[test]
    fn mark_complete_is_idempotent_and_allowed_anywhere() {
        let mut state = WorkflowState::new(review()).unwrap();
        state.mark_complete();
        state.mark_complete();
        assert!(state.is_complete());
        assert_eq!(state.current_stage_id(), "analyze");
    }

    #[test]
    fn decision_context_reflects_current_stage() {
        let mut state = WorkflowState::new(review()).unwrap();
        state.transition_to("style", "fast path", json!("ok")).unwrap();

        let run = RunContext::new("code-review", json!({}));
        let ctx = state.decision_context(&run, Some(json!("draft")));
        assert_eq!(ctx.stage_id, "style");
        assert_eq!(ctx.stage_name, "Style review");
        assert_eq!(
            ctx.transitions.iter().map(|t| t.target.as_str()).collect::<Vec<_>>(),
            vec!["suggest", "approve"]
        );
        assert_eq!(ctx.results.get("analyze"), Some(&json!("ok")));
        assert_eq!(ctx.history.len(), 1);
        assert_eq!(ctx.pending_result, Some(json!("draft")));
        assert_eq!(ctx.run.run_id, run.run_id);
    }

    #[test]
    fn invalid_workflow_cannot_start() {
        let wf = Workflow::new("bad", "", "a", vec![Stage::new("a", "A").with_transition("b", "")]);
        assert!(matches!(
            WorkflowState::new(Arc::new(wf)),
            Err(EngineError::UnknownTransitionTarget { .. })
        ));
    }
}
