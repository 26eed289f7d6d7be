// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted documents: the definition and the execution-state snapshot.

use chrono::{DateTime, Utc};
use fm_core::{
    Attempt, ExecutionState, GroupState, NodeId, Plan, PlanDefinition, PlanId, PlanLifecycle,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Format marker for both persisted documents.
pub const SNAPSHOT_FORMAT: u32 = 1;

/// `definition.json`: the declarative spec plus the node IDs assigned on
/// build, so a reload materializes the same graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDefinition {
    pub format: u32,
    pub plan_id: PlanId,
    pub definition: PlanDefinition,
    /// producer_id -> node_id assignments.
    pub node_ids: BTreeMap<String, NodeId>,
}

impl StoredDefinition {
    pub fn of(plan: &Plan) -> Self {
        Self {
            format: SNAPSHOT_FORMAT,
            plan_id: plan.id,
            definition: plan.definition.clone(),
            node_ids: plan.producer_index.clone(),
        }
    }
}

/// `state.json`: everything that changes as the plan runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub format: u32,
    /// Monotonic counter; bumped by every save. Detects concurrent writers.
    pub state_version: u64,
    /// Wall-clock save time, informational only.
    pub saved_at: DateTime<Utc>,
    pub lifecycle: PlanLifecycle,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub canceled: bool,
    pub base_branch: String,
    pub target_branch: String,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<u64>,
    pub nodes: BTreeMap<NodeId, ExecutionState>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attempts: BTreeMap<NodeId, Vec<Attempt>>,
    /// Derived group statuses at save time, for cheap external display.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupState>,
}

impl StateSnapshot {
    pub fn of(plan: &Plan, saved_at: DateTime<Utc>) -> Self {
        Self {
            format: SNAPSHOT_FORMAT,
            state_version: plan.state_version,
            saved_at,
            lifecycle: plan.lifecycle,
            is_paused: plan.is_paused,
            canceled: plan.canceled,
            base_branch: plan.base_branch.clone(),
            target_branch: plan.target_branch.clone(),
            created_at_ms: plan.created_at_ms,
            started_at_ms: plan.started_at_ms,
            ended_at_ms: plan.ended_at_ms,
            nodes: plan.exec.clone(),
            attempts: plan.attempts.clone(),
            groups: plan.group_states(),
        }
    }

    /// Overwrite a plan's mutable state from this snapshot. The plan's
    /// topology must already match the definition the snapshot was saved
    /// against.
    pub fn apply_to(&self, plan: &mut Plan) {
        plan.state_version = self.state_version;
        plan.lifecycle = self.lifecycle;
        plan.is_paused = self.is_paused;
        plan.canceled = self.canceled;
        plan.base_branch = self.base_branch.clone();
        plan.target_branch = self.target_branch.clone();
        plan.created_at_ms = self.created_at_ms;
        plan.started_at_ms = self.started_at_ms;
        plan.ended_at_ms = self.ended_at_ms;
        for (node_id, state) in &self.nodes {
            if plan.nodes.contains_key(node_id) {
                plan.exec.insert(*node_id, state.clone());
            }
        }
        plan.attempts = self.attempts.clone();
    }
}
