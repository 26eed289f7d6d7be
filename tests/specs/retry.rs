// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry and recovery flows.

use super::support::harness;
use fm_adapters::fake::ScriptedRun;
use fm_core::{NodeStatus, Phase, PlanStatus, RetryJob, WorkSpec};
use std::time::Duration;

#[tokio::test]
async fn retry_with_cleared_worktree_and_new_work() {
    let h = harness();
    h.work.script("flaky-job", Phase::Work, ScriptedRun::failing(2));
    let plan_id = h.create(vec![h.shell_job("flaky-job", "exit 2", &[])]).await;
    h.wait_plan(plan_id, PlanStatus::Failed).await;
    assert_eq!(h.git.worktree_count(), 1);

    h.runner
        .retry_job(RetryJob {
            plan_id,
            node: "flaky-job".into(),
            new_work: Some(WorkSpec::shell("exit 0")),
            new_prechecks: None,
            new_postchecks: None,
            clear_worktree: true,
        })
        .await
        .expect("retry");
    h.wait_plan(plan_id, PlanStatus::Succeeded).await;

    // Prior attempt preserved in history, new attempt recorded.
    let attempts = h.runner.get_job_attempts(plan_id, "flaky-job").expect("attempts");
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].status, NodeStatus::Failed);
    assert_eq!(attempts[1].status, NodeStatus::Succeeded);
    assert_eq!(attempts[0].number, 1);
    assert_eq!(attempts[1].number, 2);
}

#[tokio::test]
async fn retry_unblocks_downstream_jobs() {
    let h = harness();
    h.work.script("root-job", Phase::Work, ScriptedRun::failing(1));
    let plan_id = h
        .create(vec![
            h.shell_job("root-job", "exit 1", &[]),
            h.shell_job("leaf-job", "exit 0", &["root-job"]),
        ])
        .await;
    h.wait_plan(plan_id, PlanStatus::Failed).await;
    assert_eq!(h.node_status(plan_id, "leaf-job"), NodeStatus::Blocked);

    h.runner
        .retry_job(RetryJob {
            plan_id,
            node: "root-job".into(),
            new_work: None,
            new_prechecks: None,
            new_postchecks: None,
            clear_worktree: false,
        })
        .await
        .expect("retry");
    h.wait_plan(plan_id, PlanStatus::Succeeded).await;
    assert_eq!(h.node_status(plan_id, "leaf-job"), NodeStatus::Succeeded);
}

#[tokio::test]
async fn retry_rejected_while_running() {
    let h = harness();
    h.work.script("busy-job", Phase::Work, ScriptedRun::sleeping(Duration::from_secs(30)));
    let plan_id = h.create(vec![h.shell_job("busy-job", "sleep 30", &[])]).await;
    h.wait_node(plan_id, "busy-job", NodeStatus::Running).await;

    let err = h
        .runner
        .retry_job(RetryJob {
            plan_id,
            node: "busy-job".into(),
            new_work: None,
            new_prechecks: None,
            new_postchecks: None,
            clear_worktree: false,
        })
        .await
        .expect_err("retry must be rejected");
    assert_eq!(err.kind, fm_core::ErrorKind::StateTransition);
    h.runner.cancel_plan(plan_id).await.expect("cancel");
}

#[tokio::test]
async fn force_fail_enables_retry() {
    let h = harness();
    h.work.script("stuck-job", Phase::Work, ScriptedRun::sleeping(Duration::from_secs(60)));
    let plan_id = h.create(vec![h.shell_job("stuck-job", "sleep 60", &[])]).await;
    h.wait_node(plan_id, "stuck-job", NodeStatus::Running).await;

    h.runner.force_fail_job(plan_id, "stuck-job").await.expect("force-fail");
    h.wait_plan(plan_id, PlanStatus::Failed).await;
    let (_, state) = h.runner.get_job(plan_id, "stuck-job").expect("job");
    assert_eq!(state.error.as_deref(), Some("force-failed"));

    h.runner
        .retry_job(RetryJob {
            plan_id,
            node: "stuck-job".into(),
            new_work: None,
            new_prechecks: None,
            new_postchecks: None,
            clear_worktree: false,
        })
        .await
        .expect("retry");
    h.wait_plan(plan_id, PlanStatus::Succeeded).await;
}
