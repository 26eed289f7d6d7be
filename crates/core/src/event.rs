// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Events emitted by executors and the runner.

use crate::id::{AttemptId, NodeId, PlanId};
use crate::phase::Phase;
use crate::status::{NodeStatus, PlanStatus, StepStatus};
use serde::{Deserialize, Serialize};

/// Which output stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

crate::simple_display! {
    OutputStream {
        Stdout => "stdout",
        Stderr => "stderr",
    }
}

/// Events one executor emits while driving a single attempt.
///
/// Per-attempt events are observed in emission order; the runner folds them
/// into step statuses and the attempt log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorEvent {
    PhaseStarted {
        node_id: NodeId,
        attempt_id: AttemptId,
        phase: Phase,
    },
    OutputChunk {
        node_id: NodeId,
        attempt_id: AttemptId,
        phase: Phase,
        stream: OutputStream,
        chunk: String,
    },
    PhaseEnded {
        node_id: NodeId,
        attempt_id: AttemptId,
        phase: Phase,
        status: StepStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    WorkSummary {
        node_id: NodeId,
        attempt_id: AttemptId,
        summary: String,
    },
    AttemptEnded {
        node_id: NodeId,
        attempt_id: AttemptId,
        status: NodeStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_commit: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completed_commit: Option<String>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        merged_to_target: bool,
    },
}

impl ExecutorEvent {
    pub fn node_id(&self) -> NodeId {
        match self {
            ExecutorEvent::PhaseStarted { node_id, .. }
            | ExecutorEvent::OutputChunk { node_id, .. }
            | ExecutorEvent::PhaseEnded { node_id, .. }
            | ExecutorEvent::WorkSummary { node_id, .. }
            | ExecutorEvent::AttemptEnded { node_id, .. } => *node_id,
        }
    }
}

/// Notifications for observers (the embedding host).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanEvent {
    PlanUpdated {
        plan_id: PlanId,
    },
    NodeStatusChanged {
        plan_id: PlanId,
        node_id: NodeId,
        status: NodeStatus,
    },
    PhaseChanged {
        plan_id: PlanId,
        node_id: NodeId,
        phase: Phase,
        status: StepStatus,
    },
    PlanFinished {
        plan_id: PlanId,
        status: PlanStatus,
    },
}
