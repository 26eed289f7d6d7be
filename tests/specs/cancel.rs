// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cancellation semantics.

use super::support::harness;
use fm_adapters::fake::ScriptedRun;
use fm_core::{NodeStatus, Phase, PlanStatus};
use std::time::{Duration, Instant};

#[tokio::test]
async fn cancel_mid_run_settles_within_grace_window() {
    let h = harness();
    h.work.script("long-job", Phase::Work, ScriptedRun::sleeping(Duration::from_secs(60)));
    let plan_id = h.create(vec![h.shell_job("long-job", "sleep 60", &[])]).await;
    h.wait_node(plan_id, "long-job", NodeStatus::Running).await;

    let start = Instant::now();
    h.runner.cancel_plan(plan_id).await.expect("cancel");
    h.wait_plan(plan_id, PlanStatus::Canceled).await;
    h.wait_node(plan_id, "long-job", NodeStatus::Canceled).await;
    assert!(start.elapsed() < Duration::from_secs(5), "{:?}", start.elapsed());

    // The worktree is left in place for inspection.
    assert_eq!(h.git.worktree_count(), 1);
}

#[tokio::test]
async fn cancel_marks_unstarted_jobs_canceled() {
    let h = harness();
    h.work.script("gate-job", Phase::Work, ScriptedRun::sleeping(Duration::from_secs(60)));
    let plan_id = h
        .create(vec![
            h.shell_job("gate-job", "sleep 60", &[]),
            h.shell_job("later-job", "exit 0", &["gate-job"]),
        ])
        .await;
    h.wait_node(plan_id, "gate-job", NodeStatus::Running).await;

    h.runner.cancel_plan(plan_id).await.expect("cancel");
    h.wait_plan(plan_id, PlanStatus::Canceled).await;
    assert_eq!(h.node_status(plan_id, "later-job"), NodeStatus::Canceled);
    assert_eq!(h.work.calls_for("later-job"), 0);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let h = harness();
    let plan_id = h.create(vec![h.shell_job("done-job", "exit 0", &[])]).await;
    h.wait_plan(plan_id, PlanStatus::Succeeded).await;

    h.runner.delete_plan(plan_id).await.expect("first delete");
    assert!(h.runner.get(plan_id).is_none());
    assert!(!h.runner.store().exists(plan_id));
    h.runner.delete_plan(plan_id).await.expect("second delete");
}
