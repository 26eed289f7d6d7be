// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job executor: drives one attempt through its phases inside a worktree.
//!
//! Phase order: merge-fi, setup, prechecks, work, commit, postchecks,
//! merge-ri. The executor owns no plan state; it emits events and the
//! runner folds them into execution state and the attempt log.

use crate::config::RunnerConfig;
use fm_adapters::{WorkAdapter, WorkEvent, WorkRequest};
use fm_core::{
    AttemptId, Clock, ExecutorEvent, Node, NodeId, NodeStatus, OutputStream, Phase, PlanId,
    StepStatus, WorkSpec,
};
use fm_gitops::{GitGateway, MergeOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Shared executor dependencies.
pub struct ExecutorDeps<G, W, C> {
    pub git: Arc<G>,
    pub work: Arc<W>,
    pub clock: C,
    pub config: Arc<RunnerConfig>,
}

impl<G, W, C: Clone> Clone for ExecutorDeps<G, W, C> {
    fn clone(&self) -> Self {
        Self {
            git: self.git.clone(),
            work: self.work.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
        }
    }
}

/// Immutable inputs for one attempt.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub plan_id: PlanId,
    pub repo_path: PathBuf,
    pub target_branch: String,
    pub worktree_path: PathBuf,
    /// Branch the worktree runs on.
    pub branch: String,
    pub node: Node,
    pub attempt_id: AttemptId,
    pub attempt_number: u32,
    pub resume_from: Option<Phase>,
    /// Base commit recorded by a previous attempt, if resuming.
    pub base_commit: Option<String>,
    /// Commit produced by a previous attempt, if resuming past `commit`.
    pub completed_commit: Option<String>,
    /// Plan-level env, already merged for subprocesses.
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct PhaseOutcome {
    status: StepStatus,
    exit_code: Option<i32>,
    error: Option<String>,
    /// Candidate for the single auto-heal retry.
    transient: bool,
    canceled: bool,
}

impl PhaseOutcome {
    fn success() -> Self {
        Self { status: StepStatus::Success, exit_code: None, error: None, transient: false, canceled: false }
    }

    fn skipped() -> Self {
        Self { status: StepStatus::Skipped, ..Self::success() }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            exit_code: None,
            error: Some(error.into()),
            transient: false,
            canceled: false,
        }
    }

    fn canceled() -> Self {
        Self { status: StepStatus::Failed, error: Some("canceled".into()), canceled: true, ..Self::success() }
    }
}

/// Run one attempt to completion, emitting [`ExecutorEvent`]s.
///
/// `merge_lock` serializes merge-ri across the plan: the target branch is
/// written by at most one job at a time even when work ran in parallel.
pub async fn run_attempt<G, W, C>(
    deps: ExecutorDeps<G, W, C>,
    ctx: AttemptContext,
    merge_lock: Arc<tokio::sync::Mutex<()>>,
    events: mpsc::Sender<ExecutorEvent>,
    cancel: CancellationToken,
) where
    G: GitGateway,
    W: WorkAdapter,
    C: Clock,
{
    let mut run = AttemptRun {
        deps,
        ctx,
        merge_lock,
        events,
        cancel,
        base_commit: None,
        completed_commit: None,
        merged_to_target: false,
    };
    run.base_commit = run.ctx.base_commit.clone();
    run.completed_commit = run.ctx.completed_commit.clone();
    run.drive().await;
}

struct AttemptRun<G, W, C> {
    deps: ExecutorDeps<G, W, C>,
    ctx: AttemptContext,
    merge_lock: Arc<tokio::sync::Mutex<()>>,
    events: mpsc::Sender<ExecutorEvent>,
    cancel: CancellationToken,
    base_commit: Option<String>,
    completed_commit: Option<String>,
    merged_to_target: bool,
}

impl<G, W, C> AttemptRun<G, W, C>
where
    G: GitGateway,
    W: WorkAdapter,
    C: Clock,
{
    fn node_id(&self) -> NodeId {
        self.ctx.node.id
    }

    async fn emit(&self, event: ExecutorEvent) {
        let _ = self.events.send(event).await;
    }

    async fn drive(&mut self) {
        for phase in Phase::sequence_from(self.ctx.resume_from) {
            if self.cancel.is_cancelled() {
                self.finish(NodeStatus::Canceled).await;
                return;
            }
            self.emit(ExecutorEvent::PhaseStarted {
                node_id: self.node_id(),
                attempt_id: self.ctx.attempt_id,
                phase,
            })
            .await;

            let mut outcome = self.run_phase(phase).await;
            if outcome.status == StepStatus::Failed
                && !outcome.canceled
                && outcome.transient
                && self.ctx.node.auto_heal
                && !self.ctx.node.on_failure.as_ref().is_some_and(|f| f.no_auto_heal)
            {
                tracing::info!(
                    plan = %self.ctx.plan_id,
                    node = %self.ctx.node.producer_id,
                    %phase,
                    "transient failure, auto-heal retry"
                );
                outcome = self.run_phase(phase).await;
            }

            self.emit(ExecutorEvent::PhaseEnded {
                node_id: self.node_id(),
                attempt_id: self.ctx.attempt_id,
                phase,
                status: outcome.status,
                exit_code: outcome.exit_code,
                error: outcome.error.clone(),
            })
            .await;

            if outcome.canceled {
                self.finish(NodeStatus::Canceled).await;
                return;
            }
            if outcome.status == StepStatus::Failed {
                self.finish(NodeStatus::Failed).await;
                return;
            }
        }
        self.finish(NodeStatus::Succeeded).await;
    }

    async fn finish(&self, status: NodeStatus) {
        self.emit(ExecutorEvent::AttemptEnded {
            node_id: self.node_id(),
            attempt_id: self.ctx.attempt_id,
            status,
            base_commit: self.base_commit.clone(),
            completed_commit: self.completed_commit.clone().or_else(|| self.base_commit.clone()),
            merged_to_target: self.merged_to_target,
        })
        .await;
    }

    async fn run_phase(&mut self, phase: Phase) -> PhaseOutcome {
        match phase {
            Phase::MergeFi => self.merge_fi().await,
            Phase::Setup => self.setup().await,
            Phase::Prechecks => self.checks(phase, self.ctx.node.prechecks.clone()).await,
            Phase::Work => self.checks(phase, self.ctx.node.work.clone()).await,
            Phase::Commit => self.commit().await,
            Phase::Postchecks => self.checks(phase, self.ctx.node.postchecks.clone()).await,
            Phase::MergeRi => self.merge_ri().await,
        }
    }

    /// Forward-integrate the worktree branch with the target branch.
    async fn merge_fi(&mut self) -> PhaseOutcome {
        let git = &self.deps.git;
        let worktree = &self.ctx.worktree_path;
        // Nothing to integrate before the worktree exists.
        let Ok(worktree_head) = git.head_commit(worktree).await else {
            return PhaseOutcome::skipped();
        };
        let target_head =
            match git.resolve_ref(&self.ctx.target_branch, &self.ctx.repo_path).await {
                Ok(head) => head,
                Err(e) => return git_failure(e),
            };
        if worktree_head == target_head {
            return PhaseOutcome::skipped();
        }
        match git.merge_into_worktree(worktree, &self.ctx.target_branch).await {
            Ok(MergeOutcome { conflicts, .. }) if conflicts.is_empty() => {
                PhaseOutcome::success()
            }
            Ok(MergeOutcome { conflicts, .. }) => PhaseOutcome::failed(format!(
                "merge conflicts with {}: {}",
                self.ctx.target_branch,
                conflicts.join(", ")
            )),
            Err(e) => git_failure(e),
        }
    }

    /// Provision the worktree and symlink shared directories.
    async fn setup(&mut self) -> PhaseOutcome {
        let git = &self.deps.git;
        if git.head_commit(&self.ctx.worktree_path).await.is_ok() {
            if self.base_commit.is_none() {
                self.base_commit = git
                    .resolve_ref(&self.ctx.target_branch, &self.ctx.repo_path)
                    .await
                    .ok();
            }
            return PhaseOutcome::skipped();
        }
        let base = match git
            .resolve_ref(&self.ctx.target_branch, &self.ctx.repo_path)
            .await
        {
            Ok(commit) => commit,
            Err(e) => return git_failure(e),
        };
        if let Err(e) = git
            .add_worktree(&self.ctx.repo_path, &self.ctx.worktree_path, &self.ctx.branch, &base)
            .await
        {
            return git_failure(e);
        }
        self.base_commit = Some(base);
        self.link_shared_dirs();
        PhaseOutcome::success()
    }

    /// Symlink configured directories (package caches) from the main repo.
    fn link_shared_dirs(&self) {
        #[cfg(unix)]
        for dir in &self.deps.config.symlink_dirs {
            let source = self.ctx.repo_path.join(dir);
            let dest = self.ctx.worktree_path.join(dir);
            if source.is_dir() && !dest.exists() {
                if let Err(e) = std::os::unix::fs::symlink(&source, &dest) {
                    tracing::warn!(
                        dir = %dir,
                        error = %e,
                        "failed to symlink shared directory"
                    );
                }
            }
        }
    }

    /// Run a prechecks/work/postchecks spec; absent specs are skipped.
    async fn checks(&mut self, phase: Phase, spec: Option<WorkSpec>) -> PhaseOutcome {
        let Some(spec) = spec else {
            return PhaseOutcome::skipped();
        };
        let request = WorkRequest {
            plan_id: self.ctx.plan_id,
            node_id: self.node_id(),
            producer_id: self.ctx.node.producer_id.clone(),
            attempt_id: self.ctx.attempt_id,
            phase,
            spec,
            cwd: self.ctx.worktree_path.clone(),
            env: self.ctx.env.clone(),
        };

        let (work_tx, mut work_rx) = mpsc::channel::<WorkEvent>(64);
        let forwarder = {
            let events = self.events.clone();
            let node_id = self.node_id();
            let attempt_id = self.ctx.attempt_id;
            tokio::spawn(async move {
                while let Some(event) = work_rx.recv().await {
                    let (stream, chunk) = match event {
                        WorkEvent::Stdout(line) => (OutputStream::Stdout, line),
                        WorkEvent::Stderr(line) => (OutputStream::Stderr, line),
                    };
                    let _ = events
                        .send(ExecutorEvent::OutputChunk {
                            node_id,
                            attempt_id,
                            phase,
                            stream,
                            chunk,
                        })
                        .await;
                }
            })
        };

        let result = self.deps.work.run(request, work_tx, self.cancel.clone()).await;
        let _ = forwarder.await;

        match result {
            Ok(outcome) if outcome.canceled => PhaseOutcome::canceled(),
            Ok(outcome) => {
                if let Some(summary) = &outcome.summary {
                    self.emit(ExecutorEvent::WorkSummary {
                        node_id: self.node_id(),
                        attempt_id: self.ctx.attempt_id,
                        summary: summary.clone(),
                    })
                    .await;
                }
                if outcome.success() {
                    PhaseOutcome::success()
                } else {
                    PhaseOutcome {
                        status: StepStatus::Failed,
                        exit_code: outcome.exit_code,
                        error: Some(match outcome.exit_code {
                            Some(code) => format!("exit code {code}"),
                            None => "terminated by signal".to_string(),
                        }),
                        transient: false,
                        canceled: false,
                    }
                }
            }
            Err(e) => PhaseOutcome::failed(format!("spawn failed: {e}")),
        }
    }

    /// Stage and commit; enforces `expects_no_changes`.
    async fn commit(&mut self) -> PhaseOutcome {
        let git = &self.deps.git;
        let worktree = &self.ctx.worktree_path;
        if let Err(e) = git.stage_all(worktree).await {
            return git_failure(e);
        }
        let staged = match git.has_staged_changes(worktree).await {
            Ok(staged) => staged,
            Err(e) => return git_failure(e),
        };
        if self.ctx.node.expects_no_changes {
            if staged {
                return PhaseOutcome::failed(
                    "expected no changes but the worktree has a diff",
                );
            }
            self.completed_commit = git.head_commit(worktree).await.ok();
            return PhaseOutcome::success();
        }
        if !staged {
            // Nothing new: the attempt completes at the current head.
            self.completed_commit = git.head_commit(worktree).await.ok();
            return PhaseOutcome::skipped();
        }
        let message = format!(
            "{}: {}",
            self.ctx.node.producer_id,
            if self.ctx.node.task.is_empty() { &self.ctx.node.name } else { &self.ctx.node.task }
        );
        match git.commit(worktree, &message).await {
            Ok(commit) => {
                self.completed_commit = Some(commit);
                PhaseOutcome::success()
            }
            Err(e) => git_failure(e),
        }
    }

    /// Squash-merge the job branch onto the target branch, serialized.
    async fn merge_ri(&mut self) -> PhaseOutcome {
        // No commit beyond the base means the target already holds this
        // job's state; nothing to integrate.
        if self.completed_commit.is_none() || self.completed_commit == self.base_commit {
            self.merged_to_target = true;
            return PhaseOutcome::skipped();
        }
        let _guard = self.merge_lock.lock().await;
        let message = format!(
            "{}: {} (plan {})",
            self.ctx.node.producer_id,
            self.ctx.node.name,
            self.ctx.plan_id.short(8)
        );
        match self
            .deps
            .git
            .squash_merge(
                &self.ctx.repo_path,
                &self.ctx.branch,
                &self.ctx.target_branch,
                &message,
            )
            .await
        {
            Ok(outcome) if outcome.is_clean() => {
                self.merged_to_target = true;
                PhaseOutcome::success()
            }
            Ok(outcome) => PhaseOutcome::failed(format!(
                "merge conflicts onto {}: {}",
                self.ctx.target_branch,
                outcome.conflicts.join(", ")
            )),
            Err(e) => git_failure(e),
        }
    }
}

fn git_failure(e: fm_gitops::GitError) -> PhaseOutcome {
    PhaseOutcome {
        status: StepStatus::Failed,
        exit_code: None,
        error: Some(e.to_string()),
        transient: e.is_transient(),
        canceled: false,
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
