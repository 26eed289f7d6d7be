// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::repository::tests::{build, job};
use fm_adapters::fake::{FakeWorkAdapter, ScriptedRun};
use fm_core::{FakeClock, JobSpec, Plan, PlanDefinition};
use fm_gitops::fake::FakeGit;
use fm_gitops::{GitError, GitErrorKind};

struct Fixture {
    git: Arc<FakeGit>,
    work: Arc<FakeWorkAdapter>,
    plan: Plan,
    repo: tempfile::TempDir,
}

fn fixture(jobs: Vec<JobSpec>) -> Fixture {
    let repo = tempfile::tempdir().unwrap();
    let mut def = PlanDefinition::builder()
        .repo_path(repo.path().to_path_buf())
        .build();
    def.jobs = jobs;
    let plan = build(def);
    let git = Arc::new(FakeGit::new());
    git.put_branch(&plan.target_branch);
    Fixture { git, work: Arc::new(FakeWorkAdapter::new()), plan, repo }
}

impl Fixture {
    fn context(&self, producer: &str) -> AttemptContext {
        let node_id = self.plan.resolve_node(producer).unwrap();
        let node = self.plan.nodes[&node_id].clone();
        AttemptContext {
            plan_id: self.plan.id,
            repo_path: self.repo.path().to_path_buf(),
            target_branch: self.plan.target_branch.clone(),
            worktree_path: self.plan.worktree_path(&node_id),
            branch: self.plan.node_branch(&node),
            node,
            attempt_id: AttemptId::from_string("att-test"),
            attempt_number: 1,
            resume_from: None,
            base_commit: None,
            completed_commit: None,
            env: vec![],
        }
    }

    async fn run(&self, ctx: AttemptContext, cancel: CancellationToken) -> Vec<ExecutorEvent> {
        let deps = ExecutorDeps {
            git: self.git.clone(),
            work: self.work.clone(),
            clock: FakeClock::new(),
            config: Arc::new(crate::config::RunnerConfig::default()),
        };
        let (tx, mut rx) = mpsc::channel(256);
        run_attempt(
            deps,
            ctx,
            Arc::new(tokio::sync::Mutex::new(())),
            tx,
            cancel,
        )
        .await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }
}

fn phase_status(events: &[ExecutorEvent], phase: Phase) -> Option<StepStatus> {
    events.iter().find_map(|e| match e {
        ExecutorEvent::PhaseEnded { phase: p, status, .. } if *p == phase => Some(*status),
        _ => None,
    })
}

fn ended(events: &[ExecutorEvent]) -> (NodeStatus, Option<String>, bool) {
    events
        .iter()
        .find_map(|e| match e {
            ExecutorEvent::AttemptEnded { status, completed_commit, merged_to_target, .. } => {
                Some((*status, completed_commit.clone(), *merged_to_target))
            }
            _ => None,
        })
        .unwrap()
}

#[tokio::test]
async fn clean_run_with_no_diff_keeps_base_commit() {
    let fx = fixture(vec![job("solo-job", &[])]);
    let base = fx.git.branch_head(&fx.plan.target_branch).unwrap();
    let events = fx.run(fx.context("solo-job"), CancellationToken::new()).await;

    assert_eq!(phase_status(&events, Phase::MergeFi), Some(StepStatus::Skipped));
    assert_eq!(phase_status(&events, Phase::Setup), Some(StepStatus::Success));
    assert_eq!(phase_status(&events, Phase::Prechecks), Some(StepStatus::Skipped));
    assert_eq!(phase_status(&events, Phase::Work), Some(StepStatus::Success));
    assert_eq!(phase_status(&events, Phase::Commit), Some(StepStatus::Skipped));
    assert_eq!(phase_status(&events, Phase::MergeRi), Some(StepStatus::Skipped));

    let (status, completed, merged) = ended(&events);
    assert_eq!(status, NodeStatus::Succeeded);
    assert_eq!(completed, Some(base.clone()));
    assert!(merged);
    // Nothing landed on the target.
    assert_eq!(fx.git.branch_head(&fx.plan.target_branch), Some(base));
}

#[tokio::test]
async fn dirty_worktree_commits_and_merges() {
    let fx = fixture(vec![job("solo-job", &[])]);
    let ctx = fx.context("solo-job");
    let worktree = ctx.worktree_path.clone();
    let base = fx.git.branch_head(&fx.plan.target_branch).unwrap();

    // Dirty the worktree as soon as the work phase runs.
    fx.work.script("solo-job", Phase::Work, ScriptedRun::ok());
    let git = fx.git.clone();
    let events = {
        // Pre-provision so we can mark it dirty before the run.
        git.add_worktree(fx.repo.path(), &worktree, &ctx.branch, &base).await.unwrap();
        git.set_worktree_dirty(&worktree);
        fx.run(ctx, CancellationToken::new()).await
    };

    assert_eq!(phase_status(&events, Phase::Setup), Some(StepStatus::Skipped));
    assert_eq!(phase_status(&events, Phase::Commit), Some(StepStatus::Success));
    assert_eq!(phase_status(&events, Phase::MergeRi), Some(StepStatus::Success));
    let (status, completed, merged) = ended(&events);
    assert_eq!(status, NodeStatus::Succeeded);
    assert!(merged);
    assert_ne!(completed, Some(base.clone()));
    assert_ne!(fx.git.branch_head(&fx.plan.target_branch), Some(base));
}

#[tokio::test]
async fn failing_work_stops_the_attempt() {
    let fx = fixture(vec![job("solo-job", &[])]);
    fx.work.script("solo-job", Phase::Work, ScriptedRun::failing(2));
    let events = fx.run(fx.context("solo-job"), CancellationToken::new()).await;

    let failed = events.iter().any(|e| matches!(
        e,
        ExecutorEvent::PhaseEnded { phase: Phase::Work, status: StepStatus::Failed, exit_code: Some(2), .. }
    ));
    assert!(failed, "{events:?}");
    assert_eq!(phase_status(&events, Phase::Commit), None);
    assert_eq!(phase_status(&events, Phase::MergeRi), None);
    assert_eq!(ended(&events).0, NodeStatus::Failed);
}

#[tokio::test]
async fn expects_no_changes_fails_on_diff() {
    let mut spec = job("quiet-job", &[]);
    spec.expects_no_changes = true;
    let fx = fixture(vec![spec]);
    let ctx = fx.context("quiet-job");
    let base = fx.git.branch_head(&fx.plan.target_branch).unwrap();
    fx.git.add_worktree(fx.repo.path(), &ctx.worktree_path, &ctx.branch, &base).await.unwrap();
    fx.git.set_worktree_dirty(&ctx.worktree_path);

    let events = fx.run(ctx, CancellationToken::new()).await;
    assert_eq!(phase_status(&events, Phase::Commit), Some(StepStatus::Failed));
    assert_eq!(ended(&events).0, NodeStatus::Failed);
}

#[tokio::test]
async fn expects_no_changes_succeeds_on_clean_tree() {
    let mut spec = job("quiet-job", &[]);
    spec.expects_no_changes = true;
    let fx = fixture(vec![spec]);
    let events = fx.run(fx.context("quiet-job"), CancellationToken::new()).await;
    assert_eq!(phase_status(&events, Phase::Commit), Some(StepStatus::Success));
    assert_eq!(ended(&events).0, NodeStatus::Succeeded);
}

#[tokio::test]
async fn resume_skips_earlier_phases() {
    let fx = fixture(vec![job("solo-job", &[])]);
    let mut ctx = fx.context("solo-job");
    let base = fx.git.branch_head(&fx.plan.target_branch).unwrap();
    fx.git.add_worktree(fx.repo.path(), &ctx.worktree_path, &ctx.branch, &base).await.unwrap();
    ctx.resume_from = Some(Phase::Work);
    ctx.base_commit = Some(base);

    let events = fx.run(ctx, CancellationToken::new()).await;
    assert_eq!(phase_status(&events, Phase::MergeFi), None);
    assert_eq!(phase_status(&events, Phase::Prechecks), None);
    assert_eq!(phase_status(&events, Phase::Setup), Some(StepStatus::Skipped));
    assert_eq!(phase_status(&events, Phase::Work), Some(StepStatus::Success));
    assert_eq!(ended(&events).0, NodeStatus::Succeeded);
}

#[tokio::test]
async fn merge_conflict_fails_with_file_list() {
    let fx = fixture(vec![job("solo-job", &[])]);
    let ctx = fx.context("solo-job");
    let base = fx.git.branch_head(&fx.plan.target_branch).unwrap();
    fx.git.add_worktree(fx.repo.path(), &ctx.worktree_path, &ctx.branch, &base).await.unwrap();
    fx.git.set_worktree_dirty(&ctx.worktree_path);
    fx.git.script_squash_conflict(&ctx.branch, vec!["src/main.rs".into()]);

    let events = fx.run(ctx, CancellationToken::new()).await;
    let (status, _, merged) = ended(&events);
    assert_eq!(status, NodeStatus::Failed);
    assert!(!merged);
    let error = events.iter().find_map(|e| match e {
        ExecutorEvent::PhaseEnded { phase: Phase::MergeRi, error, .. } => error.clone(),
        _ => None,
    });
    assert!(error.unwrap().contains("src/main.rs"));
}

#[tokio::test]
async fn pre_canceled_attempt_ends_immediately() {
    let fx = fixture(vec![job("solo-job", &[])]);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let events = fx.run(fx.context("solo-job"), cancel).await;
    assert_eq!(events.len(), 1);
    assert_eq!(ended(&events).0, NodeStatus::Canceled);
}

#[tokio::test]
async fn auto_heal_retries_transient_git_failure_once() {
    let mut spec = job("healing-job", &[]);
    spec.auto_heal = true;
    let fx = fixture(vec![spec]);
    fx.git.fail_next(
        "resolve_ref",
        GitError::new(GitErrorKind::Transport, "could not read from remote"),
    );

    let events = fx.run(fx.context("healing-job"), CancellationToken::new()).await;
    assert_eq!(phase_status(&events, Phase::Setup), Some(StepStatus::Success));
    assert_eq!(ended(&events).0, NodeStatus::Succeeded);
}

#[tokio::test]
async fn non_transient_failure_is_not_healed() {
    let mut spec = job("healing-job", &[]);
    spec.auto_heal = true;
    let fx = fixture(vec![spec]);
    fx.git.fail_next("resolve_ref", GitError::io("disk on fire"));

    let events = fx.run(fx.context("healing-job"), CancellationToken::new()).await;
    assert_eq!(phase_status(&events, Phase::Setup), Some(StepStatus::Failed));
    assert_eq!(ended(&events).0, NodeStatus::Failed);
}

#[tokio::test]
async fn work_summary_is_forwarded() {
    let fx = fixture(vec![job("solo-job", &[])]);
    fx.work.script(
        "solo-job",
        Phase::Work,
        ScriptedRun::ok().with_stdout(&["working"]).with_summary("refactored 3 files"),
    );
    let events = fx.run(fx.context("solo-job"), CancellationToken::new()).await;
    assert!(events.iter().any(|e| matches!(
        e,
        ExecutorEvent::WorkSummary { summary, .. } if summary == "refactored 3 files"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        ExecutorEvent::OutputChunk { chunk, stream: OutputStream::Stdout, .. } if chunk == "working"
    )));
}
