//! Workflow validation. Run this before executing a workflow.
//!
//! Rules enforced by [`validate_workflow`]:
//! 1. The workflow has at least one stage and every map key equals its stage's ID.
//! 2. The initial stage exists.
//! 3. Every transition target exists.
//! 4. Every dependency references an existing stage.
//!
//! [`topological_order`] additionally requires the dependency graph to be
//! acyclic (Kahn's algorithm).  Transitions may form cycles; only
//! dependencies must not.

use std::collections::{BTreeMap, BTreeSet};

use crate::{models::Workflow, EngineError};

/// Check the structural invariants of a workflow definition.
///
/// # Errors
/// - [`EngineError::EmptyWorkflow`] if there are no stages.
/// - [`EngineError::StageIdMismatch`] if a stage is stored under the wrong key.
/// - [`EngineError::UnknownStage`] if the initial stage is missing.
/// - [`EngineError::UnknownTransitionTarget`] if a transition leads nowhere.
/// - [`EngineError::UnknownDependency`] if a dependency is missing.
pub fn validate_workflow(workflow: &Workflow) -> Result<(), EngineError> {
    if workflow.is_empty() {
        return Err(EngineError::EmptyWorkflow(workflow.name.clone()));
    }

    for (key, stage) in &workflow.stages {
        if *key != stage.id {
            return Err(EngineError::StageIdMismatch {
                key: key.clone(),
                id: stage.id.clone(),
            });
        }
    }

    workflow.stage(&workflow.initial_stage)?;

    for stage in workflow.stages.values() {
        for transition in &stage.transitions {
            if !workflow.stages.contains_key(&transition.target) {
                return Err(EngineError::UnknownTransitionTarget {
                    stage: stage.id.clone(),
                    target: transition.target.clone(),
                });
            }
        }
        for dep in &stage.depends_on {
            if !workflow.stages.contains_key(dep) {
                return Err(EngineError::UnknownDependency {
                    stage: stage.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Validate the workflow and return its stages in dependency order.
///
/// Ties are broken lexicographically, so the result is deterministic.
///
/// # Errors
/// Everything [`validate_workflow`] reports, plus
/// [`EngineError::DependencyCycle`] if dependencies are not acyclic.
pub fn topological_order(workflow: &Workflow) -> Result<Vec<String>, EngineError> {
    Ok(execution_waves(workflow)?.into_iter().flatten().collect())
}

/// Validate the workflow and group its stages into waves: every stage in a
/// wave depends only on stages in earlier waves.
///
/// The waves are what an executor without admission limits would run side
/// by side if every stage took the same time.
pub fn execution_waves(workflow: &Workflow) -> Result<Vec<Vec<String>>, EngineError> {
    validate_workflow(workflow)?;

    // dependency -> stages waiting on it, and each stage's outstanding count.
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();

    for stage in workflow.stages.values() {
        in_degree.insert(stage.id.as_str(), stage.depends_on.len());
        for dep in &stage.depends_on {
            dependents.entry(dep.as_str()).or_default().push(stage.id.as_str());
        }
    }

    let mut wave: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut waves: Vec<Vec<String>> = Vec::new();
    let mut visited = 0usize;

    while !wave.is_empty() {
        let mut next: BTreeSet<&str> = BTreeSet::new();
        for &stage_id in &wave {
            visited += 1;
            for &dependent in dependents.get(stage_id).into_iter().flatten() {
                if let Some(deg) = in_degree.get_mut(dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        next.insert(dependent);
                    }
                }
            }
        }
        waves.push(wave.iter().map(|s| (*s).to_owned()).collect());
        wave = next;
    }

    // If we didn't visit every stage the graph contains a cycle.
    if visited != workflow.len() {
        let stuck = in_degree
            .into_iter()
            .filter(|(_, d)| *d > 0)
            .map(|(id, _)| id.to_owned())
            .collect();
        return Err(EngineError::DependencyCycle(stuck));
    }

    Ok(waves)
}
