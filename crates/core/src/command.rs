// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Validated command structs consumed by the plan runner.
//!
//! Transport (RPC framing, schema checks) lives outside the core; by the
//! time one of these structs reaches the runner it has passed `validate()`.
//! Validation rejects at the boundary and never touches state.

use crate::error::CommandError;
use crate::id::PlanId;
use crate::node::JobSpec;
use crate::phase::Phase;
use crate::plan::PlanDefinition;
use crate::work::WorkSpec;
use serde::{Deserialize, Serialize};

/// Submit a full plan definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePlan {
    pub definition: PlanDefinition,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub start_paused: bool,
}

impl CreatePlan {
    pub fn validate(&self) -> Result<(), CommandError> {
        self.definition.validate()
    }
}

/// Create an empty plan to be populated with `AddJob` and then finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaffoldPlan {
    pub definition: PlanDefinition,
}

impl ScaffoldPlan {
    pub fn validate(&self) -> Result<(), CommandError> {
        if !self.definition.jobs.is_empty() {
            return Err(CommandError::validation(
                "scaffold takes an empty job list; use add_job",
            ));
        }
        self.definition.validate()
    }
}

/// Append one job to a scaffolding plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddJob {
    pub plan_id: PlanId,
    pub job: JobSpec,
}

impl AddJob {
    pub fn validate(&self) -> Result<(), CommandError> {
        self.job.validate()
    }
}

/// Activate a scaffolding plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizePlan {
    pub plan_id: PlanId,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub start_paused: bool,
}

/// Retry one terminal-failed (or canceled) node, optionally replacing specs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryJob {
    pub plan_id: PlanId,
    /// Producer ID or node ID.
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_work: Option<WorkSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_prechecks: Option<WorkSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_postchecks: Option<WorkSpec>,
    /// Remove the node's worktree before the new attempt.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub clear_worktree: bool,
}

impl RetryJob {
    pub fn validate(&self) -> Result<(), CommandError> {
        if let Some(w) = &self.new_work {
            w.validate("new_work")?;
        }
        if let Some(w) = &self.new_prechecks {
            w.validate("new_prechecks")?;
        }
        if let Some(w) = &self.new_postchecks {
            w.validate("new_postchecks")?;
        }
        Ok(())
    }
}

/// Edit a node that is not currently running or already succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateJob {
    pub plan_id: PlanId,
    /// Producer ID or node ID.
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work: Option<WorkSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prechecks: Option<WorkSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postchecks: Option<WorkSpec>,
    /// Clear step statuses from this stage onward and resume there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_to_stage: Option<Phase>,
}

impl UpdateJob {
    pub fn validate(&self) -> Result<(), CommandError> {
        if let Some(w) = &self.work {
            w.validate("work")?;
        }
        if let Some(w) = &self.prechecks {
            w.validate("prechecks")?;
        }
        if let Some(w) = &self.postchecks {
            w.validate("postchecks")?;
        }
        if let Some(stage) = self.reset_to_stage {
            if !stage.is_resumable() {
                return Err(CommandError::validation(format!(
                    "reset_to_stage may not be {stage}"
                )));
            }
        }
        Ok(())
    }
}

/// One topology mutation. Ops are applied in order and report per-op results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReshapeOp {
    AddNode {
        job: JobSpec,
    },
    RemoveNode {
        node: String,
    },
    UpdateDeps {
        node: String,
        dependencies: Vec<String>,
    },
    /// Insert a new job as a dependency of `before`.
    AddBefore {
        job: JobSpec,
        before: String,
    },
    /// Insert a new job depending on `after`.
    AddAfter {
        job: JobSpec,
        after: String,
    },
}

impl ReshapeOp {
    pub fn validate(&self) -> Result<(), CommandError> {
        match self {
            ReshapeOp::AddNode { job }
            | ReshapeOp::AddBefore { job, .. }
            | ReshapeOp::AddAfter { job, .. } => job.validate(),
            ReshapeOp::RemoveNode { node } | ReshapeOp::UpdateDeps { node, .. } => {
                if node.is_empty() {
                    Err(CommandError::validation("empty node reference"))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Apply an ordered sequence of topology mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReshapePlan {
    pub plan_id: PlanId,
    pub ops: Vec<ReshapeOp>,
}

impl ReshapePlan {
    pub fn validate(&self) -> Result<(), CommandError> {
        if self.ops.is_empty() {
            return Err(CommandError::validation("reshape requires at least one op"));
        }
        for op in &self.ops {
            op.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
