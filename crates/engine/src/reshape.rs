// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime topology mutation.
//!
//! Ops are applied in order against a working copy of the definition. Each
//! op is independent: a failed op is reported and skipped, later ops still
//! run. After the sequence the plan is rebuilt once; if the result is
//! cyclic (or otherwise invalid) the whole reshape rolls back.

use crate::repository;
use fm_core::{CommandError, JobSpec, NodeId, Plan, PlanDefinition, ReshapeOp};
use serde::{Deserialize, Serialize};

/// Outcome of one reshape op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

impl OpResult {
    fn ok() -> Self {
        Self { success: true, error: None }
    }

    fn err(error: CommandError) -> Self {
        Self { success: false, error: Some(error) }
    }
}

/// Apply `ops` to a copy of the plan's definition. Returns per-op results
/// plus the rebuilt plan; `Err` means nothing was applied.
pub fn apply_reshape(
    plan: &Plan,
    ops: &[ReshapeOp],
) -> (Vec<OpResult>, Result<Plan, CommandError>) {
    let mut definition = plan.definition.clone();
    let mut results = Vec::with_capacity(ops.len());

    for op in ops {
        let result = apply_op(plan, &mut definition, op);
        if let Err(e) = &result {
            tracing::warn!(plan = %plan.id, error = %e, "reshape op rejected");
        }
        results.push(match result {
            Ok(()) => OpResult::ok(),
            Err(e) => OpResult::err(e),
        });
    }

    let rebuilt = repository::rebuild(plan, definition);
    (results, rebuilt)
}

/// Resolve a node reference against the working definition.
fn find_job<'a>(
    plan: &Plan,
    definition: &'a PlanDefinition,
    node_ref: &str,
) -> Option<&'a JobSpec> {
    let producer: &str = if NodeId::is_id_str(node_ref) {
        let id = NodeId::from_string(node_ref);
        plan.nodes.get(&id).map(|n| n.producer_id.as_str())?
    } else {
        node_ref
    };
    definition.jobs.iter().find(|j| j.producer_id == producer)
}

fn apply_op(
    plan: &Plan,
    definition: &mut PlanDefinition,
    op: &ReshapeOp,
) -> Result<(), CommandError> {
    match op {
        ReshapeOp::AddNode { job } => {
            insert_job(definition, job.clone())?;
            Ok(())
        }
        ReshapeOp::RemoveNode { node } => {
            let producer = {
                let job = find_job(plan, definition, node).ok_or_else(|| {
                    CommandError::not_found(format!("no job {node:?} in plan"))
                })?;
                job.producer_id.clone()
            };
            guard_auto_managed(plan, &producer, "remove")?;
            guard_not_active(plan, &producer, "remove")?;
            if let Some(dependent) = definition
                .jobs
                .iter()
                .find(|j| j.producer_id != producer && depends_on(j, &producer, plan))
            {
                return Err(CommandError::conflict(format!(
                    "cannot remove {producer:?}: {:?} depends on it",
                    dependent.producer_id
                )));
            }
            definition.jobs.retain(|j| j.producer_id != producer);
            Ok(())
        }
        ReshapeOp::UpdateDeps { node, dependencies } => {
            let producer = {
                let job = find_job(plan, definition, node).ok_or_else(|| {
                    CommandError::not_found(format!("no job {node:?} in plan"))
                })?;
                job.producer_id.clone()
            };
            guard_auto_managed(plan, &producer, "edit dependencies of")?;
            guard_not_active(plan, &producer, "edit")?;
            for dep in dependencies {
                if find_job(plan, definition, dep).is_none() {
                    return Err(CommandError::validation(format!(
                        "dependency {dep:?} does not exist"
                    )));
                }
            }
            if let Some(job) =
                definition.jobs.iter_mut().find(|j| j.producer_id == producer)
            {
                job.dependencies = dependencies.clone();
            }
            Ok(())
        }
        ReshapeOp::AddBefore { job, before } => {
            let before_producer = {
                let target = find_job(plan, definition, before).ok_or_else(|| {
                    CommandError::not_found(format!("no job {before:?} in plan"))
                })?;
                target.producer_id.clone()
            };
            guard_auto_managed(plan, &before_producer, "insert before")?;
            guard_not_active(plan, &before_producer, "insert before")?;
            insert_job(definition, job.clone())?;
            if let Some(target) =
                definition.jobs.iter_mut().find(|j| j.producer_id == before_producer)
            {
                target.dependencies.push(job.producer_id.clone());
            }
            Ok(())
        }
        ReshapeOp::AddAfter { job, after } => {
            let after_producer = {
                let target = find_job(plan, definition, after).ok_or_else(|| {
                    CommandError::not_found(format!("no job {after:?} in plan"))
                })?;
                target.producer_id.clone()
            };
            let mut job = job.clone();
            if !job.dependencies.contains(&after_producer) {
                job.dependencies.push(after_producer);
            }
            insert_job(definition, job)?;
            Ok(())
        }
    }
}

/// Does `job` depend on `producer`, under either reference form?
fn depends_on(job: &JobSpec, producer: &str, plan: &Plan) -> bool {
    job.dependencies.iter().any(|dep| {
        if NodeId::is_id_str(dep) {
            plan.nodes
                .get(&NodeId::from_string(dep))
                .is_some_and(|n| n.producer_id == producer)
        } else {
            dep == producer
        }
    })
}

fn insert_job(definition: &mut PlanDefinition, job: JobSpec) -> Result<(), CommandError> {
    job.validate()?;
    if job.producer_id == repository::SNAPSHOT_VALIDATION_PRODUCER {
        return Err(CommandError::validation(format!(
            "{:?} is reserved for the auto-managed validation node",
            job.producer_id
        )));
    }
    if definition.jobs.iter().any(|j| j.producer_id == job.producer_id) {
        return Err(CommandError::conflict(format!(
            "job {:?} already exists in plan",
            job.producer_id
        )));
    }
    definition.jobs.push(job);
    Ok(())
}

fn guard_auto_managed(plan: &Plan, producer: &str, verb: &str) -> Result<(), CommandError> {
    let auto_managed = plan
        .producer_index
        .get(producer)
        .and_then(|id| plan.nodes.get(id))
        .is_some_and(|n| n.auto_managed)
        || producer == repository::SNAPSHOT_VALIDATION_PRODUCER;
    if auto_managed {
        return Err(CommandError::validation(format!(
            "cannot {verb} auto-managed job {producer:?}"
        )));
    }
    Ok(())
}

fn guard_not_active(plan: &Plan, producer: &str, verb: &str) -> Result<(), CommandError> {
    let active = plan
        .producer_index
        .get(producer)
        .and_then(|id| plan.status_of(id))
        .is_some_and(|s| s.is_active());
    if active {
        return Err(CommandError::state_transition(format!(
            "cannot {verb} job {producer:?} while it is running"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "reshape_tests.rs"]
mod tests;
