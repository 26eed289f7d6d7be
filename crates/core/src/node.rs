// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job nodes: declarative specs, materialized nodes, and execution state.

use crate::error::CommandError;
use crate::id::{AttemptId, NodeId};
use crate::phase::Phase;
use crate::status::{NodeStatus, StepStatus};
use crate::work::{OnFailure, WorkSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const PRODUCER_ID_MIN: usize = 3;
pub const PRODUCER_ID_MAX: usize = 64;
pub const NAME_MAX: usize = 200;

/// Producer IDs are lowercase alphanumeric plus hyphen, 3–64 chars.
pub fn validate_producer_id(id: &str) -> Result<(), CommandError> {
    let len_ok = (PRODUCER_ID_MIN..=PRODUCER_ID_MAX).contains(&id.len());
    let chars_ok = id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !len_ok || !chars_ok {
        return Err(CommandError::validation(format!(
            "producer_id must match [a-z0-9-]{{{PRODUCER_ID_MIN},{PRODUCER_ID_MAX}}}: {id:?}"
        )));
    }
    Ok(())
}

/// Declarative job spec as authored. Dependencies may reference either a
/// producer ID or a node ID; resolution happens when the plan is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub producer_id: String,
    pub name: String,
    /// Short description of the unit of work.
    #[serde(default)]
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work: Option<WorkSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prechecks: Option<WorkSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postchecks: Option<WorkSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Hierarchical group path with `/` separators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_heal: bool,
    /// The job must produce no diff to succeed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub expects_no_changes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<OnFailure>,
}

impl JobSpec {
    pub fn validate(&self) -> Result<(), CommandError> {
        validate_producer_id(&self.producer_id)?;
        if self.name.is_empty() || self.name.len() > NAME_MAX {
            return Err(CommandError::validation(format!(
                "job name must be 1..={NAME_MAX} chars: {:?}",
                crate::id::short(&self.name, 40)
            )));
        }
        if let Some(w) = &self.work {
            w.validate("work")?;
        }
        if let Some(w) = &self.prechecks {
            w.validate("prechecks")?;
        }
        if let Some(w) = &self.postchecks {
            w.validate("postchecks")?;
        }
        if let Some(f) = &self.on_failure {
            f.validate()?;
        }
        Ok(())
    }
}

crate::builder! {
    pub struct JobSpecBuilder => JobSpec {
        into {
            producer_id: String = "job-under-test",
            name: String = "job under test",
            task: String = "",
        }
        set {
            dependencies: Vec<String> = Vec::new(),
            auto_heal: bool = false,
            expects_no_changes: bool = false,
        }
        option {
            work: WorkSpec = Some(WorkSpec::shell("true")),
            prechecks: WorkSpec = None,
            postchecks: WorkSpec = None,
            group: String = None,
            on_failure: OnFailure = None,
        }
    }
}

/// A materialized node: spec with resolved edges and a generated ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub producer_id: String,
    pub name: String,
    #[serde(default)]
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work: Option<WorkSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prechecks: Option<WorkSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postchecks: Option<WorkSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<NodeId>,
    /// Derived from `dependencies` on build; never stored independently.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependents: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_heal: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub expects_no_changes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<OnFailure>,
    /// Auto-managed node (snapshot validation): reshape may not remove it
    /// or edit its dependencies.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_managed: bool,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        self.dependents.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.dependencies.is_empty()
    }
}

/// Phase, timing, and exit code of the most recent attempt activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastAttempt {
    pub phase: Phase,
    pub started_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Mutable per-node execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub status: NodeStatus,
    /// Monotonic attempt counter.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub step_statuses: BTreeMap<Phase, StepStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<LastAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_from_phase: Option<Phase>,
    /// Leaves only: the squash merge onto the target branch landed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub merged_to_target: bool,
    /// Optimistic concurrency counter, bumped on every mutation.
    #[serde(default)]
    pub version: u64,
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self {
            status: NodeStatus::Pending,
            attempts: 0,
            step_statuses: BTreeMap::new(),
            started_at_ms: None,
            ended_at_ms: None,
            base_commit: None,
            completed_commit: None,
            worktree_path: None,
            error: None,
            last_attempt: None,
            resume_from_phase: None,
            merged_to_target: false,
            version: 0,
        }
    }
}

impl ExecutionState {
    /// Record a status change and bump the version.
    pub fn transition(&mut self, status: NodeStatus) {
        self.status = status;
        self.version += 1;
    }

    /// Clear step statuses from `stage` onward so a resumed attempt re-runs
    /// them; earlier phases keep their recorded results.
    pub fn reset_steps_from(&mut self, stage: Phase) {
        self.step_statuses.retain(|phase, _| *phase < stage);
        self.resume_from_phase = Some(stage);
        self.version += 1;
    }
}

/// Append-only record of one execution try.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub attempt_id: AttemptId,
    /// Ordinal of this attempt for the node, starting at 1.
    pub number: u32,
    pub started_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<u64>,
    pub status: NodeStatus,
    /// Last phase the attempt reached.
    pub phase: Phase,
    /// Human label of what the work phase ran.
    #[serde(default)]
    pub work_instruction: String,
    pub log_file: PathBuf,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub step_statuses: BTreeMap<Phase, StepStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_summary: Option<String>,
}
