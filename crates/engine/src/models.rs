//! Core domain models for the workflow engine.
//!
//! A [`Workflow`] is immutable once built.  Runs share it through an
//! `Arc` and never mutate it; all run-time bookkeeping lives in
//! [`crate::WorkflowState`] and [`crate::ConcurrentScheduler`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::EngineError;

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// A declared, directed edge out of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Advisory text shown to the oracle; the engine never evaluates it.
    #[serde(default)]
    pub condition: String,
    /// Stage ID this transition leads to.
    pub target: String,
}

impl Transition {
    pub fn new(target: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            target: target.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// A single named step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Unique identifier within this workflow (referenced by transitions and dependencies).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Opaque guidance for whoever performs the stage.
    #[serde(default)]
    pub goal: String,
    /// Permitted tool identifiers, in declaration order.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Outgoing transitions, in declaration order.
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default, rename = "final")]
    pub is_final: bool,
    /// Stages that must complete before this one is runnable (concurrent mode).
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
}

impl Stage {
    /// Create a stage with no goal, tools, transitions or dependencies.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            goal: String::new(),
            tools: Vec::new(),
            transitions: Vec::new(),
            is_final: false,
            depends_on: BTreeSet::new(),
        }
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Append a transition to `target`.
    pub fn with_transition(mut self, target: impl Into<String>, condition: impl Into<String>) -> Self {
        self.transitions.push(Transition::new(target, condition));
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Mark the stage as final.
    pub fn terminal(mut self) -> Self {
        self.is_final = true;
        self
    }

    /// Transition targets, in declaration order.
    pub fn targets(&self) -> Vec<String> {
        self.transitions.iter().map(|t| t.target.clone()).collect()
    }

    /// Whether `target` is one of this stage's declared transitions.
    pub fn allows(&self, target: &str) -> bool {
        self.transitions.iter().any(|t| t.target == target)
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Where a sequential run starts.
    pub initial_stage: String,
    pub stages: BTreeMap<String, Stage>,
}

impl Workflow {
    /// Build a workflow from a list of stages, keyed by their IDs.
    ///
    /// No validation happens here; run [`crate::validate_workflow`] before use.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        initial_stage: impl Into<String>,
        stages: Vec<Stage>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            initial_stage: initial_stage.into(),
            stages: stages.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    /// Resolve a stage by ID.
    ///
    /// # Errors
    /// [`EngineError::UnknownStage`] if no stage has that ID.
    pub fn stage(&self, id: &str) -> Result<&Stage, EngineError> {
        self.stages
            .get(id)
            .ok_or_else(|| EngineError::UnknownStage(id.to_owned()))
    }

    /// All stage IDs, in lexicographic order.
    pub fn stage_ids(&self) -> Vec<String> {
        self.stages.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review() -> Workflow {
        Workflow::new(
            "review",
            "code review",
            "analyze",
            vec![
                Stage::new("analyze", "Analyze")
                    .with_tools(["read_file", "grep"])
                    .with_transition("security", "touches auth code")
                    .with_transition("style", "otherwise"),
                Stage::new("security", "Security").with_transition("style", "clean"),
                Stage::new("style", "Style").terminal(),
            ],
        )
    }

    #[test]
    fn stage_lookup() {
        let wf = review();
        assert_eq!(wf.stage("analyze").unwrap().name, "Analyze");
        assert_eq!(
            wf.stage("missing"),
            Err(EngineError::UnknownStage("missing".into()))
        );
    }

    #[test]
    fn stage_ids_are_sorted() {
        assert_eq!(review().stage_ids(), vec!["analyze", "security", "style"]);
    }

    #[test]
    fn targets_keep_declaration_order() {
        let wf = review();
        let analyze = wf.stage("analyze").unwrap();
        assert_eq!(analyze.targets(), vec!["security", "style"]);
        assert!(analyze.allows("style"));
        assert!(!analyze.allows("analyze"));
        assert_eq!(analyze.tools, vec!["read_file", "grep"]);
    }

    #[test]
    fn json_uses_final_key() {
        let json = r#"{
            "name": "tiny",
            "initial_stage": "only",
            "stages": {
                "only": { "id": "only", "name": "Only", "final": true }
            }
        }"#;
        let wf: Workflow = serde_json::from_str(json).unwrap();
        let only = wf.stage("only").unwrap();
        assert!(only.is_final);
        assert!(only.transitions.is_empty());
        assert!(only.depends_on.is_empty());
    }
}
