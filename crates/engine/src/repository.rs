// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plan materialization: scaffold, add-job, finalize, and `build_plan`.
//!
//! A plan instance is always rebuilt from its definition as a whole; the
//! runner swaps the rebuilt topology in atomically so the pump never
//! observes a partially-applied graph.

use crate::branch::ResolvedBranches;
use fm_core::{
    dag, CommandError, ExecutionState, JobSpec, Node, NodeId, Plan, PlanDefinition, PlanId,
    PlanLifecycle,
};
use indexmap::IndexMap;
use std::collections::BTreeMap;

/// Producer ID of the auto-managed validation node injected over the leaves.
pub const SNAPSHOT_VALIDATION_PRODUCER: &str = "snapshot-validation";

/// Materialize a definition into a live plan.
///
/// `existing_ids` pins node IDs across rebuilds so execution state survives
/// definition mutations; unknown producers get fresh IDs.
pub fn build_plan(
    id: PlanId,
    definition: PlanDefinition,
    branches: &ResolvedBranches,
    worktree_root: String,
    existing_ids: &BTreeMap<String, NodeId>,
    created_at_ms: u64,
    lifecycle: PlanLifecycle,
) -> Result<Plan, CommandError> {
    definition.validate()?;

    let mut jobs: Vec<JobSpec> = definition.jobs.clone();
    if definition.validate_snapshot {
        jobs.retain(|j| j.producer_id != SNAPSHOT_VALIDATION_PRODUCER);
        jobs.push(snapshot_validation_job(&jobs));
    }

    // Assign IDs first so dependency strings can resolve either way.
    let mut producer_index: BTreeMap<String, NodeId> = BTreeMap::new();
    for job in &jobs {
        let node_id =
            existing_ids.get(&job.producer_id).copied().unwrap_or_else(NodeId::new);
        producer_index.insert(job.producer_id.clone(), node_id);
    }
    let known_ids: std::collections::HashSet<NodeId> =
        producer_index.values().copied().collect();

    let mut nodes: IndexMap<NodeId, Node> = IndexMap::new();
    for job in &jobs {
        let node_id = producer_index[&job.producer_id];
        let mut dependencies = Vec::with_capacity(job.dependencies.len());
        for dep in &job.dependencies {
            let dep_id = if NodeId::is_id_str(dep) {
                let dep_id = NodeId::from_string(dep);
                known_ids.contains(&dep_id).then_some(dep_id)
            } else {
                producer_index.get(dep.as_str()).copied()
            };
            match dep_id {
                Some(d) => dependencies.push(d),
                None => {
                    return Err(CommandError::validation(format!(
                        "job {} depends on unknown job {dep:?}",
                        job.producer_id
                    )))
                }
            }
        }
        nodes.insert(
            node_id,
            Node {
                id: node_id,
                producer_id: job.producer_id.clone(),
                name: job.name.clone(),
                task: job.task.clone(),
                work: job.work.clone(),
                prechecks: job.prechecks.clone(),
                postchecks: job.postchecks.clone(),
                dependencies,
                dependents: Vec::new(),
                group: job.group.clone(),
                auto_heal: job.auto_heal,
                expects_no_changes: job.expects_no_changes,
                on_failure: job.on_failure.clone(),
                auto_managed: job.producer_id == SNAPSHOT_VALIDATION_PRODUCER
                    && definition.validate_snapshot,
            },
        );
    }

    dag::derive_dependents(&mut nodes)
        .map_err(|e| CommandError::validation(e.to_string()))?;
    if let Some(cycle) = dag::find_cycle(&nodes) {
        return Err(CommandError::validation(format!(
            "dependency cycle: {}",
            cycle.iter().map(|n| n.as_str()).collect::<Vec<_>>().join(" -> ")
        )));
    }

    let exec: BTreeMap<NodeId, ExecutionState> =
        nodes.keys().map(|id| (*id, ExecutionState::default())).collect();

    let plan = Plan {
        id,
        definition,
        base_branch: branches.base.clone(),
        target_branch: branches.target.clone(),
        worktree_root,
        lifecycle,
        is_paused: false,
        canceled: false,
        created_at_ms,
        started_at_ms: None,
        ended_at_ms: None,
        state_version: 0,
        nodes,
        producer_index,
        exec,
        attempts: BTreeMap::new(),
    };
    plan.check_bijection()?;
    Ok(plan)
}

/// The auto-managed leaf-aggregating validation job: depends on every
/// current leaf and asserts the integrated target state needs no further
/// changes.
fn snapshot_validation_job(jobs: &[JobSpec]) -> JobSpec {
    let depended_on: std::collections::HashSet<&str> = jobs
        .iter()
        .flat_map(|j| j.dependencies.iter().map(String::as_str))
        .collect();
    let leaves: Vec<String> = jobs
        .iter()
        .filter(|j| !depended_on.contains(j.producer_id.as_str()))
        .map(|j| j.producer_id.clone())
        .collect();
    JobSpec {
        producer_id: SNAPSHOT_VALIDATION_PRODUCER.to_string(),
        name: "Snapshot Validation".to_string(),
        task: "Validate the integrated target state".to_string(),
        work: None,
        prechecks: None,
        postchecks: None,
        dependencies: leaves,
        group: None,
        auto_heal: false,
        expects_no_changes: true,
        on_failure: None,
    }
}

/// Rebuild a plan after a definition mutation, preserving execution state
/// and attempt history for nodes that survive.
pub fn rebuild(plan: &Plan, new_definition: PlanDefinition) -> Result<Plan, CommandError> {
    let branches = ResolvedBranches {
        base: plan.base_branch.clone(),
        target: plan.target_branch.clone(),
    };
    let mut rebuilt = build_plan(
        plan.id,
        new_definition,
        &branches,
        plan.worktree_root.clone(),
        &plan.producer_index,
        plan.created_at_ms,
        plan.lifecycle,
    )?;
    rebuilt.is_paused = plan.is_paused;
    rebuilt.canceled = plan.canceled;
    rebuilt.started_at_ms = plan.started_at_ms;
    rebuilt.ended_at_ms = plan.ended_at_ms;
    rebuilt.state_version = plan.state_version;
    for (node_id, state) in &plan.exec {
        if rebuilt.nodes.contains_key(node_id) {
            rebuilt.exec.insert(*node_id, state.clone());
        }
    }
    for (node_id, history) in &plan.attempts {
        if rebuilt.nodes.contains_key(node_id) {
            rebuilt.attempts.insert(*node_id, history.clone());
        }
    }
    Ok(rebuilt)
}

/// Append a job to a plan's definition and rebuild.
pub fn add_job(plan: &Plan, job: JobSpec) -> Result<Plan, CommandError> {
    if plan.producer_index.contains_key(&job.producer_id)
        && plan.definition.jobs.iter().any(|j| j.producer_id == job.producer_id)
    {
        return Err(CommandError::conflict(format!(
            "job {:?} already exists in plan",
            job.producer_id
        )));
    }
    let mut definition = plan.definition.clone();
    definition.jobs.push(job);
    rebuild(plan, definition)
}

#[cfg(test)]
#[path = "repository_tests.rs"]
pub(crate) mod tests;
