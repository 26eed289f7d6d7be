// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Failure-context assembly for operator diagnosis.

use fm_core::{CommandError, LastAttempt, NodeId, NodeStatus, Phase, Plan, PlanId, WorkSpec};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything needed to understand and retry a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureContext {
    pub plan_id: PlanId,
    pub node_id: NodeId,
    pub producer_id: String,
    pub attempt_number: u32,
    /// Phase the failure surfaced in.
    pub phase: Phase,
    pub error_message: String,
    /// Agent session that can be resumed, when the work spec carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<LastAttempt>,
    /// Content of the failing attempt's log.
    #[serde(default)]
    pub logs: String,
}

/// Build the context for a failed node; rejected for any other status.
pub fn build_context(plan: &Plan, node_id: NodeId) -> Result<FailureContext, CommandError> {
    let node = plan
        .nodes
        .get(&node_id)
        .ok_or_else(|| CommandError::not_found(format!("no node {node_id}")))?;
    let state = plan
        .exec
        .get(&node_id)
        .ok_or_else(|| CommandError::internal(format!("no execution state for {node_id}")))?;
    if state.status != NodeStatus::Failed {
        return Err(CommandError::state_transition(format!(
            "failure context requires a failed job, {} is {}",
            node.producer_id, state.status
        )));
    }
    let phase = state
        .last_attempt
        .as_ref()
        .map(|a| a.phase)
        .or(state.resume_from_phase)
        .unwrap_or(Phase::Work);
    let session_id = match &node.work {
        Some(WorkSpec::Agent(agent)) => agent.resume_session.clone(),
        _ => None,
    };
    Ok(FailureContext {
        plan_id: plan.id,
        node_id,
        producer_id: node.producer_id.clone(),
        attempt_number: state.attempts.max(1),
        phase,
        error_message: state.error.clone().unwrap_or_else(|| "unknown failure".to_string()),
        session_id,
        worktree_path: state.worktree_path.clone(),
        last_attempt: state.last_attempt.clone(),
        logs: String::new(),
    })
}

#[cfg(test)]
#[path = "failure_tests.rs"]
mod tests;
