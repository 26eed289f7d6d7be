// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The work adapter contract: run one phase's work spec to completion.

use crate::subprocess::SpawnError;
use async_trait::async_trait;
use fm_core::{AttemptId, NodeId, Phase, PlanId, WorkSpec};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Everything a runner needs to execute one work spec.
#[derive(Debug, Clone)]
pub struct WorkRequest {
    pub plan_id: PlanId,
    pub node_id: NodeId,
    pub producer_id: String,
    pub attempt_id: AttemptId,
    pub phase: Phase,
    pub spec: WorkSpec,
    /// Working directory (the job's worktree).
    pub cwd: PathBuf,
    /// Plan env overlaid with job env, already merged.
    pub env: Vec<(String, String)>,
}

/// Streamed output from a running work spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkEvent {
    Stdout(String),
    Stderr(String),
}

/// Terminal result of a work spec run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkOutcome {
    /// None when the process died to a signal.
    pub exit_code: Option<i32>,
    /// Trailing summary line from agent runs.
    pub summary: Option<String>,
    pub canceled: bool,
}

impl WorkOutcome {
    pub fn success(&self) -> bool {
        !self.canceled && self.exit_code == Some(0)
    }
}

/// Runs work specs. One implementation spawns real subprocesses; tests
/// script outcomes.
#[async_trait]
pub trait WorkAdapter: Send + Sync + 'static {
    /// Run the spec to completion, streaming output through `events`.
    /// Cancellation must tear down the whole process tree within the
    /// adapter's grace window and report `canceled = true`.
    async fn run(
        &self,
        request: WorkRequest,
        events: mpsc::Sender<WorkEvent>,
        cancel: CancellationToken,
    ) -> Result<WorkOutcome, SpawnError>;
}
