// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup reconciliation.
//!
//! A job persisted as scheduled/running means the previous process died
//! mid-attempt. The subprocess is gone, so the node is converted to failed
//! with the last known phase recorded; the operator (or retry-plan) takes
//! it from there. Never silently dropped.

use fm_core::{NodeStatus, Phase, Plan, StepStatus};
use tracing::warn;

/// Convert orphaned in-flight nodes to failed. Returns how many were hit.
pub fn reconcile_plan(plan: &mut Plan) -> usize {
    let mut orphaned = 0;
    let node_ids: Vec<_> = plan.nodes.keys().copied().collect();
    for node_id in node_ids {
        let Some(state) = plan.exec.get_mut(&node_id) else { continue };
        if !state.status.is_active() {
            continue;
        }
        orphaned += 1;
        let phase = state.last_attempt.as_ref().map(|a| a.phase).unwrap_or(Phase::MergeFi);
        state.transition(NodeStatus::Failed);
        state.error = Some("orphaned: process exited".to_string());
        state.step_statuses.insert(phase, StepStatus::Failed);
        // The interrupted phase is where a retry should pick up.
        if state.resume_from_phase.is_none() && phase.is_resumable() {
            state.resume_from_phase = Some(phase);
        }
        if let Some(attempt) = plan.attempts.get_mut(&node_id).and_then(|a| a.last_mut()) {
            if attempt.ended_at_ms.is_none() {
                attempt.status = NodeStatus::Failed;
                attempt.phase = phase;
            }
        }
        warn!(plan = %plan.id, node = %node_id, %phase, "orphaned attempt marked failed");
    }
    orphaned
}

#[cfg(test)]
#[path = "recover_tests.rs"]
mod tests;
