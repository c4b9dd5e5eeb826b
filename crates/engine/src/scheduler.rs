//! Concurrent scheduler: eligibility bookkeeping for dependency-driven runs.
//!
//! The scheduler never performs work.  A driving executor asks it which
//! stages are runnable, starts them wherever it likes, and reports each
//! completion back as it arrives.  Runnability depends only on the set of
//! completed stages, never on the order they completed in.
//!
//! The mutating operations take `&mut self`; a multi-threaded driver must
//! put the scheduler behind a single lock.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::dag::topological_order;
use crate::models::Workflow;
use crate::EngineError;

/// Lifecycle position of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
}

impl StageStatus {
    fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Complete,
}

/// One entry in the append-only lifecycle log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub stage: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Wall-clock bounds of a stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Tracks pending, running and completed stages of one concurrent run.
#[derive(Debug, Clone)]
pub struct ConcurrentScheduler {
    workflow: Arc<Workflow>,
    running: BTreeSet<String>,
    completed: BTreeSet<String>,
    results: BTreeMap<String, Value>,
    timings: BTreeMap<String, StageTiming>,
    events: Vec<LifecycleEvent>,
}

impl ConcurrentScheduler {
    /// # Errors
    /// Any configuration error, including [`EngineError::DependencyCycle`]:
    /// a cyclic graph could never finish.
    pub fn new(workflow: Arc<Workflow>) -> Result<Self, EngineError> {
        topological_order(&workflow)?;
        Ok(Self {
            workflow,
            running: BTreeSet::new(),
            completed: BTreeSet::new(),
            results: BTreeMap::new(),
            timings: BTreeMap::new(),
            events: Vec::new(),
        })
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Stages that are neither running nor completed and whose dependencies
    /// have all completed, in lexicographic order.
    ///
    /// An empty list means nothing can start right now; it does not mean the
    /// run is over (see [`ConcurrentScheduler::is_complete`]).
    pub fn runnable_stages(&self) -> Vec<String> {
        self.workflow
            .stages
            .values()
            .filter(|s| self.status(&s.id) == Some(StageStatus::Pending))
            .filter(|s| s.depends_on.is_subset(&self.completed))
            .map(|s| s.id.clone())
            .collect()
    }

    /// Move a runnable stage into the running set.
    ///
    /// # Errors
    /// [`EngineError::SchedulerPrecondition`] unless `id` is currently runnable.
    pub fn start_stage(&mut self, id: &str) -> Result<(), EngineError> {
        self.start_stage_with_reason(id, None)
    }

    /// Like [`start_stage`](Self::start_stage), annotating the event.
    pub fn start_stage_with_reason(
        &mut self,
        id: &str,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        let status = self.status(id);
        let runnable = status == Some(StageStatus::Pending)
            && self
                .workflow
                .stage(id)
                .map(|s| s.depends_on.is_subset(&self.completed))
                .unwrap_or(false);

        if !runnable {
            return Err(EngineError::SchedulerPrecondition {
                stage: id.to_owned(),
                operation: "start",
                state: match status {
                    Some(StageStatus::Pending) => "waiting on dependencies",
                    Some(s) => s.as_str(),
                    None => "unknown",
                },
            });
        }

        let now = Utc::now();
        self.running.insert(id.to_owned());
        self.timings.insert(
            id.to_owned(),
            StageTiming {
                started_at: now,
                ended_at: None,
            },
        );
        self.events.push(LifecycleEvent {
            kind: EventKind::Start,
            stage: id.to_owned(),
            at: now,
            reason,
        });

        debug!(stage = %id, running = self.running.len(), "stage started");
        Ok(())
    }

    /// Record a running stage's result and return the stages this completion
    /// unblocked: runnable now, not runnable before the call.
    ///
    /// # Errors
    /// [`EngineError::SchedulerPrecondition`] unless `id` is running.
    pub fn complete_stage(&mut self, id: &str, result: Value) -> Result<Vec<String>, EngineError> {
        self.complete_stage_with_reason(id, result, None)
    }

    /// Like [`complete_stage`](Self::complete_stage), annotating the event.
    pub fn complete_stage_with_reason(
        &mut self,
        id: &str,
        result: Value,
        reason: Option<String>,
    ) -> Result<Vec<String>, EngineError> {
        let status = self.status(id);
        if status != Some(StageStatus::Running) {
            return Err(EngineError::SchedulerPrecondition {
                stage: id.to_owned(),
                operation: "complete",
                state: status.map_or("unknown", StageStatus::as_str),
            });
        }

        let before: BTreeSet<String> = self.runnable_stages().into_iter().collect();

        let now = Utc::now();
        self.running.remove(id);
        self.completed.insert(id.to_owned());
        self.results.insert(id.to_owned(), result);
        if let Some(timing) = self.timings.get_mut(id) {
            timing.ended_at = Some(now);
        }
        self.events.push(LifecycleEvent {
            kind: EventKind::Complete,
            stage: id.to_owned(),
            at: now,
            reason,
        });

        let unlocked: Vec<String> = self
            .runnable_stages()
            .into_iter()
            .filter(|s| !before.contains(s))
            .collect();

        debug!(
            stage = %id,
            completed = self.completed.len(),
            total = self.workflow.len(),
            ?unlocked,
            "stage completed"
        );
        Ok(unlocked)
    }

    /// Every stage of the workflow has completed.
    pub fn is_complete(&self) -> bool {
        self.completed.len() == self.workflow.len()
    }

    /// Lifecycle position of `id`, or `None` if the workflow has no such stage.
    pub fn status(&self, id: &str) -> Option<StageStatus> {
        if !self.workflow.stages.contains_key(id) {
            None
        } else if self.completed.contains(id) {
            Some(StageStatus::Completed)
        } else if self.running.contains(id) {
            Some(StageStatus::Running)
        } else {
            Some(StageStatus::Pending)
        }
    }

    pub fn running(&self) -> &BTreeSet<String> {
        &self.running
    }

    pub fn completed(&self) -> &BTreeSet<String> {
        &self.completed
    }

    /// Stages neither running nor completed, runnable or not.
    pub fn pending(&self) -> Vec<String> {
        self.workflow
            .stages
            .keys()
            .filter(|id| !self.running.contains(*id) && !self.completed.contains(*id))
            .cloned()
            .collect()
    }

    pub fn results(&self) -> &BTreeMap<String, Value> {
        &self.results
    }

    pub fn timings(&self) -> &BTreeMap<String, StageTiming> {
        &self.timings
    }

    /// Start/complete events in arrival order.
    pub fn events(&self) -> &[LifecycleEvent] {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Stage;
    use serde_json::json;

    fn make_scheduler(stages: Vec<Stage>) -> ConcurrentScheduler {
        let initial = stages[0].id.clone();
        ConcurrentScheduler::new(Arc::new(Workflow::new("test", "", initial, stages))).unwrap()
    }

    /// a, b independent; c waits on both.
    fn fan_in() -> ConcurrentScheduler {
        make_scheduler(vec![
            Stage::new("a", "A"),
            Stage::new("b", "B"),
            Stage::new("c", "C").with_dependencies(["a", "b"]),
        ])
    }

    #[test]
    fn fan_in_unlocks_only_after_last_dependency() {
        let mut s = fan_in();
        assert_eq!(s.runnable_stages(), vec!["a", "b"]);

        s.start_stage("a").unwrap();
        s.start_stage("b").unwrap();
        assert!(s.runnable_stages().is_empty());

        assert!(s.complete_stage("a", json!("A")).unwrap().is_empty());
        assert!(s.runnable_stages().is_empty());
        assert!(!s.is_complete());

        assert_eq!(s.complete_stage("b", json!("B")).unwrap(), vec!["c"]);
        s.start_stage("c").unwrap();
        assert!(s.complete_stage("c", json!("C")).unwrap().is_empty());
        assert!(s.is_complete());
        assert_eq!(s.results().len(), 3);
    }

    #[test]
    fn one_completion_can_unlock_several_siblings() {
        let mut s = make_scheduler(vec![
            Stage::new("root", "Root"),
            Stage::new("x", "X").with_dependencies(["root"]),
            Stage::new("y", "Y").with_dependencies(["root"]),
            Stage::new("z", "Z").with_dependencies(["root"]),
        ]);
        s.start_stage("root").unwrap();
        assert_eq!(s.complete_stage("root", json!(null)).unwrap(), vec!["x", "y", "z"]);
    }

    #[test]
    fn runnable_but_unstarted_stages_are_not_reported_again() {
        let mut s = make_scheduler(vec![
            Stage::new("a", "A"),
            Stage::new("b", "B"),
            Stage::new("c", "C").with_dependencies(["a"]),
        ]);
        // b stays runnable but never starts; completing a must only report c.
        s.start_stage("a").unwrap();
        assert_eq!(s.complete_stage("a", json!(1)).unwrap(), vec!["c"]);
        assert_eq!(s.runnable_stages(), vec!["b", "c"]);
    }

    #[test]
    fn start_requires_runnable_stage() {
        let mut s = fan_in();

        assert_eq!(
            s.start_stage("c"),
            Err(EngineError::SchedulerPrecondition {
                stage: "c".into(),
                operation: "start",
                state: "waiting on dependencies",
            })
        );
        assert!(matches!(
            s.start_stage("ghost"),
            Err(EngineError::SchedulerPrecondition { state: "unknown", .. })
        ));

        s.start_stage("a").unwrap();
        assert!(matches!(
            s.start_stage("a"),
            Err(EngineError::SchedulerPrecondition { state: "running", .. })
        ));

        s.complete_stage("a", json!(null)).unwrap();
        assert!(matches!(
            s.start_stage("a"),
            Err(EngineError::SchedulerPrecondition { state: "completed", .. })
        ));
    }

    #[test]
    fn complete_requires_running_stage() {
        let mut s = fan_in();
        assert!(matches!(
            s.complete_stage("a", json!(null)),
            Err(EngineError::SchedulerPrecondition { operation: "complete", state: "pending", .. })
        ));

        s.start_stage("a").unwrap();
        s.complete_stage("a", json!(1)).unwrap();
        assert!(matches!(
            s.complete_stage("a", json!(2)),
            Err(EngineError::SchedulerPrecondition { state: "completed", .. })
        ));
        // The rejected second completion did not overwrite anything.
        assert_eq!(s.results().get("a"), Some(&json!(1)));
        assert_eq!(s.events().len(), 2);
    }

    #[test]
    fn events_and_timings_follow_arrival_order() {
        let mut s = fan_in();
        s.start_stage("b").unwrap();
        s.start_stage_with_reason("a", Some("second".into())).unwrap();
        s.complete_stage("a", json!(null)).unwrap();

        let kinds: Vec<(EventKind, &str)> =
            s.events().iter().map(|e| (e.kind, e.stage.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                (EventKind::Start, "b"),
                (EventKind::Start, "a"),
                (EventKind::Complete, "a"),
            ]
        );
        assert_eq!(s.events()[1].reason.as_deref(), Some("second"));

        let a = s.timings()["a"];
        assert!(a.ended_at.is_some_and(|end| end >= a.started_at));
        assert!(s.timings()["b"].ended_at.is_none());
        assert_eq!(s.pending(), vec!["c"]);
    }

    #[test]
    fn cyclic_dependencies_are_rejected() {
        let wf = Workflow::new(
            "cyclic",
            "",
            "a",
            vec![
                Stage::new("a", "A").with_dependencies(["b"]),
                Stage::new("b", "B").with_dependencies(["a"]),
            ],
        );
        assert!(matches!(
            ConcurrentScheduler::new(Arc::new(wf)),
            Err(EngineError::DependencyCycle(_))
        ));
    }

    /// Every interleaving of sibling completions ends with the same unlocks.
    #[test]
    fn unlocks_are_independent_of_completion_order() {
        let orders = [["a", "b", "c"], ["a", "c", "b"], ["b", "a", "c"], ["b", "c", "a"], ["c", "a", "b"], ["c", "b", "a"]];
        for order in orders {
            let mut s = make_scheduler(vec![
                Stage::new("a", "A"),
                Stage::new("b", "B"),
                Stage::new("c", "C"),
                Stage::new("join", "Join").with_dependencies(["a", "b", "c"]),
                Stage::new("after_a", "After A").with_dependencies(["a"]),
            ]);
            for id in ["a", "b", "c"] {
                s.start_stage(id).unwrap();
            }

            let mut unlocked = Vec::new();
            for id in order {
                unlocked.extend(s.complete_stage(id, json!(id)).unwrap());
            }
            unlocked.sort();
            assert_eq!(unlocked, vec!["after_a", "join"], "order {order:?}");
        }
    }
}
