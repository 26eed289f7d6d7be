// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plan definition and the live plan instance.

use crate::error::CommandError;
use crate::group::{derive_group_states, GroupState};
use crate::id::{NodeId, PlanId};
use crate::node::{Attempt, ExecutionState, JobSpec, Node, NAME_MAX};
use crate::status::{NodeStatus, PlanLifecycle};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

pub const MAX_PARALLEL_LIMIT: u32 = 1024;

/// Declarative plan spec as submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDefinition {
    pub name: String,
    /// Absolute path to the repository the plan operates on.
    pub repo_path: PathBuf,
    /// Requested base branch; resolution falls back to the current branch,
    /// then `main`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
    /// Requested target branch; never allowed to resolve to a default branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_branch: Option<String>,
    /// Directory under the repo root holding per-job worktrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_root: Option<String>,
    /// 0 means "implementation cap".
    #[serde(default)]
    pub max_parallel: u32,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Inject the auto-managed snapshot-validation node over the leaves.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub validate_snapshot: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<JobSpec>,
}

impl PlanDefinition {
    pub fn validate(&self) -> Result<(), CommandError> {
        if self.name.is_empty() || self.name.len() > NAME_MAX {
            return Err(CommandError::validation(format!(
                "plan name must be 1..={NAME_MAX} chars"
            )));
        }
        if !self.repo_path.is_absolute() {
            return Err(CommandError::validation(format!(
                "repo_path must be absolute: {}",
                self.repo_path.display()
            )));
        }
        if self.max_parallel > MAX_PARALLEL_LIMIT {
            return Err(CommandError::validation(format!(
                "max_parallel must be 0..={MAX_PARALLEL_LIMIT}, got {}",
                self.max_parallel
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for job in &self.jobs {
            job.validate()?;
            if !seen.insert(job.producer_id.as_str()) {
                return Err(CommandError::validation(format!(
                    "duplicate producer_id {:?}",
                    job.producer_id
                )));
            }
        }
        Ok(())
    }
}

crate::builder! {
    pub struct PlanDefinitionBuilder => PlanDefinition {
        into {
            name: String = "plan under test",
            repo_path: PathBuf = PathBuf::from("/repo"),
        }
        set {
            max_parallel: u32 = 0,
            env: HashMap<String, String> = HashMap::new(),
            validate_snapshot: bool = false,
            jobs: Vec<JobSpec> = Vec::new(),
        }
        option {
            base_branch: String = None,
            target_branch: String = None,
            worktree_root: String = None,
        }
    }
}

/// Node counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u32,
    pub ready: u32,
    pub scheduled: u32,
    pub running: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub blocked: u32,
    pub canceled: u32,
}

impl StatusCounts {
    pub fn total(&self) -> u32 {
        self.pending
            + self.ready
            + self.scheduled
            + self.running
            + self.succeeded
            + self.failed
            + self.blocked
            + self.canceled
    }

    pub fn terminal(&self) -> u32 {
        self.succeeded + self.failed + self.blocked + self.canceled
    }
}

/// A live plan: definition materialized into nodes plus execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub definition: PlanDefinition,
    /// Resolved branches; `target_branch` is never a repo default branch.
    pub base_branch: String,
    pub target_branch: String,
    pub worktree_root: String,
    pub lifecycle: PlanLifecycle,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub canceled: bool,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<u64>,
    /// Monotonic snapshot counter for optimistic concurrency.
    #[serde(default)]
    pub state_version: u64,
    pub nodes: IndexMap<NodeId, Node>,
    /// producer_id -> node_id. Bijective with `nodes` by construction.
    pub producer_index: BTreeMap<String, NodeId>,
    pub exec: BTreeMap<NodeId, ExecutionState>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attempts: BTreeMap<NodeId, Vec<Attempt>>,
}

impl Plan {
    /// Resolve a node reference: either a producer ID or a node ID string.
    pub fn resolve_node(&self, node_ref: &str) -> Option<NodeId> {
        if NodeId::is_id_str(node_ref) {
            let id = NodeId::from_string(node_ref);
            return self.nodes.contains_key(&id).then_some(id);
        }
        self.producer_index.get(node_ref).copied()
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn exec_state(&self, id: &NodeId) -> Option<&ExecutionState> {
        self.exec.get(id)
    }

    pub fn status_of(&self, id: &NodeId) -> Option<NodeStatus> {
        self.exec.get(id).map(|e| e.status)
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for state in self.exec.values() {
            match state.status {
                NodeStatus::Pending => counts.pending += 1,
                NodeStatus::Ready => counts.ready += 1,
                NodeStatus::Scheduled => counts.scheduled += 1,
                NodeStatus::Running => counts.running += 1,
                NodeStatus::Succeeded => counts.succeeded += 1,
                NodeStatus::Failed => counts.failed += 1,
                NodeStatus::Blocked => counts.blocked += 1,
                NodeStatus::Canceled => counts.canceled += 1,
            }
        }
        counts
    }

    /// Fraction of nodes in a terminal status, in [0, 1].
    pub fn progress(&self) -> f64 {
        let counts = self.counts();
        if counts.total() == 0 {
            return 0.0;
        }
        f64::from(counts.terminal()) / f64::from(counts.total())
    }

    pub fn running_count(&self) -> u32 {
        self.exec.values().filter(|e| e.status.is_active()).count() as u32
    }

    /// `max_parallel` with 0 mapped to the implementation cap.
    pub fn effective_max_parallel(&self, implementation_cap: u32) -> u32 {
        match self.definition.max_parallel {
            0 => implementation_cap.max(1),
            n => n,
        }
    }

    /// All nodes in a terminal status and nothing active.
    pub fn all_terminal(&self) -> bool {
        !self.exec.is_empty() && self.exec.values().all(|e| e.status.is_terminal())
    }

    pub fn group_states(&self) -> Vec<GroupState> {
        derive_group_states(self.nodes.values().map(|n| {
            let status =
                self.exec.get(&n.id).map(|e| e.status).unwrap_or(NodeStatus::Pending);
            (n.group.as_deref(), status)
        }))
    }

    /// Worktree directory for one node: `<repo>/<worktreeRoot>/<planId>/<nodeId>`.
    pub fn worktree_path(&self, node_id: &NodeId) -> PathBuf {
        self.definition
            .repo_path
            .join(&self.worktree_root)
            .join(self.id.as_str())
            .join(node_id.as_str())
    }

    /// Branch a node's worktree runs on. Dot-separated: a `/` here would
    /// nest the ref under the target branch ref, which git refuses.
    pub fn node_branch(&self, node: &Node) -> String {
        format!("{}.{}", self.target_branch, node.producer_id)
    }

    /// Check the producer-id map and node map agree in both directions.
    pub fn check_bijection(&self) -> Result<(), CommandError> {
        if self.producer_index.len() != self.nodes.len() {
            return Err(CommandError::internal(format!(
                "producer index has {} entries for {} nodes",
                self.producer_index.len(),
                self.nodes.len()
            )));
        }
        for (producer_id, node_id) in &self.producer_index {
            match self.nodes.get(node_id) {
                Some(node) if node.producer_id == *producer_id => {}
                _ => {
                    return Err(CommandError::internal(format!(
                        "producer index entry {producer_id} -> {node_id} has no matching node"
                    )))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "plan_tests.rs"]
pub(crate) mod tests;
