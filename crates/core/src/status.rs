// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Status enums for nodes, steps, plans, and the plan lifecycle.

use serde::{Deserialize, Serialize};

/// Status of a single job node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Waiting for dependencies
    Pending,
    /// All dependencies succeeded; eligible for scheduling
    Ready,
    /// Picked by the scheduler, executor not yet acknowledged
    Scheduled,
    /// Executor is driving the attempt
    Running,
    Succeeded,
    Failed,
    /// A dependency failed or was canceled; this node will never run
    Blocked,
    Canceled,
}

crate::simple_display! {
    NodeStatus {
        Pending => "pending",
        Ready => "ready",
        Scheduled => "scheduled",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
        Blocked => "blocked",
        Canceled => "canceled",
    }
}

impl NodeStatus {
    /// Terminal statuses: the node will not run again without operator action.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Blocked | NodeStatus::Canceled
        )
    }

    /// The node occupies (or is about to occupy) an executor slot.
    pub fn is_active(self) -> bool {
        matches!(self, NodeStatus::Scheduled | NodeStatus::Running)
    }

    /// Retry is only valid from these statuses.
    pub fn is_retryable(self) -> bool {
        matches!(self, NodeStatus::Failed | NodeStatus::Canceled)
    }
}

/// Status of one phase within an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

crate::simple_display! {
    StepStatus {
        Pending => "pending",
        Running => "running",
        Success => "success",
        Failed => "failed",
        Skipped => "skipped",
    }
}

/// Aggregate status of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Terminal with a mix of succeeded and failed/canceled nodes
    Partial,
    Canceled,
}

crate::simple_display! {
    PlanStatus {
        Pending => "pending",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
        Partial => "partial",
        Canceled => "canceled",
    }
}

impl PlanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlanStatus::Succeeded | PlanStatus::Failed | PlanStatus::Partial | PlanStatus::Canceled
        )
    }
}

/// Administrative lifecycle of a plan, orthogonal to its run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanLifecycle {
    /// Created via scaffold; accepts add-job, does not schedule
    Scaffolding,
    /// Finalized (or directly created); the pump may schedule work
    Active,
    /// Reached a terminal run status
    Finalized,
    /// Removed; retained only until the in-memory handle drops
    Deleted,
}

crate::simple_display! {
    PlanLifecycle {
        Scaffolding => "scaffolding",
        Active => "active",
        Finalized => "finalized",
        Deleted => "deleted",
    }
}

impl PlanLifecycle {
    /// Whether the pump may schedule new work in this lifecycle.
    pub fn schedulable(self) -> bool {
        matches!(self, PlanLifecycle::Active | PlanLifecycle::Finalized)
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
