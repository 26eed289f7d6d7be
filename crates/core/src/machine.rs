// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure scheduling decisions over a plan.
//!
//! Nothing here performs I/O or mutates state; the pump applies the
//! transitions these functions compute.

use crate::dag;
use crate::id::NodeId;
use crate::plan::Plan;
use crate::status::{NodeStatus, PlanStatus};

/// What a non-terminal, non-active node's status should be, given its deps.
pub fn node_readiness(plan: &Plan, id: &NodeId) -> NodeStatus {
    let Some(node) = plan.nodes.get(id) else {
        return NodeStatus::Pending;
    };
    let mut all_succeeded = true;
    for dep in &node.dependencies {
        match plan.status_of(dep) {
            Some(NodeStatus::Failed) | Some(NodeStatus::Canceled) | Some(NodeStatus::Blocked) => {
                return NodeStatus::Blocked;
            }
            Some(NodeStatus::Succeeded) => {}
            _ => all_succeeded = false,
        }
    }
    if all_succeeded {
        NodeStatus::Ready
    } else {
        NodeStatus::Pending
    }
}

/// Aggregate plan status.
pub fn plan_status(plan: &Plan) -> PlanStatus {
    if plan.canceled {
        return PlanStatus::Canceled;
    }
    let counts = plan.counts();
    if counts.scheduled + counts.running > 0 {
        return PlanStatus::Running;
    }
    if counts.total() > 0 && counts.succeeded == counts.total() {
        return PlanStatus::Succeeded;
    }
    // No active work and nothing ready: failure modes.
    if counts.ready == 0 && counts.failed + counts.blocked + counts.canceled > 0 {
        if counts.succeeded > 0 {
            return PlanStatus::Partial;
        }
        if counts.failed > 0 {
            return PlanStatus::Failed;
        }
        if counts.terminal() == counts.total() {
            return PlanStatus::Canceled;
        }
    }
    PlanStatus::Pending
}

/// Ready nodes to schedule this cycle, in deterministic order: depth from
/// root ascending, then producer ID lexicographic; capped to the remaining
/// parallelism budget.
pub fn compute_ready(plan: &Plan, implementation_cap: u32) -> Vec<NodeId> {
    let cap = plan.effective_max_parallel(implementation_cap);
    let running = plan.running_count();
    if running >= cap {
        return Vec::new();
    }
    let budget = (cap - running) as usize;

    let depths = dag::depths(&plan.nodes);
    let mut ready: Vec<&crate::node::Node> = plan
        .nodes
        .values()
        .filter(|n| plan.status_of(&n.id) == Some(NodeStatus::Ready))
        .collect();
    ready.sort_by(|a, b| {
        let da = depths.get(&a.id).copied().unwrap_or(0);
        let db = depths.get(&b.id).copied().unwrap_or(0);
        da.cmp(&db).then_with(|| a.producer_id.cmp(&b.producer_id))
    });
    ready.into_iter().take(budget).map(|n| n.id).collect()
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
