// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parallelism caps and scheduling bounds.

use super::support::harness;
use fm_adapters::fake::ScriptedRun;
use fm_core::{CreatePlan, PlanStatus};
use std::time::{Duration, Instant};

#[tokio::test]
async fn three_jobs_capped_at_two_finish_in_two_waves() {
    let h = harness();
    h.work.set_default(ScriptedRun::sleeping(Duration::from_secs(1)));
    let mut definition = h.definition(vec![
        h.shell_job("sleep-one", "sleep 1", &[]),
        h.shell_job("sleep-two", "sleep 1", &[]),
        h.shell_job("sleep-three", "sleep 1", &[]),
    ]);
    definition.max_parallel = 2;

    let start = Instant::now();
    let plan_id = h
        .runner
        .create_plan(CreatePlan { definition, start_paused: false })
        .await
        .expect("create");
    h.wait_plan(plan_id, PlanStatus::Succeeded).await;
    let elapsed = start.elapsed();

    // Two waves: never more than two at once, so the wall clock is at
    // least two sleep periods and well under three-plus-overhead.
    assert!(h.work.max_concurrency() <= 2, "{}", h.work.max_concurrency());
    assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(3_500), "{elapsed:?}");
    assert_eq!(h.runner.get_status(plan_id).expect("status").counts.succeeded, 3);
}

#[tokio::test]
async fn max_parallel_zero_uses_implementation_cap() {
    let h = harness();
    h.work.set_default(ScriptedRun::sleeping(Duration::from_millis(200)));
    let jobs = (1..=6)
        .map(|i| h.shell_job(&format!("job-{i}"), "exit 0", &[]))
        .collect();
    let plan_id = h.create(jobs).await;
    h.wait_plan(plan_id, PlanStatus::Succeeded).await;

    // Default implementation cap is 4.
    assert!(h.work.max_concurrency() <= 4, "{}", h.work.max_concurrency());
    assert_eq!(h.runner.get_status(plan_id).expect("status").counts.succeeded, 6);
}

#[tokio::test]
async fn independent_jobs_are_ready_immediately() {
    let h = harness();
    let plan_id = h.create(vec![
        h.shell_job("free-one", "exit 0", &[]),
        h.shell_job("free-two", "exit 0", &[]),
    ])
    .await;
    h.wait_plan(plan_id, PlanStatus::Succeeded).await;
    assert_eq!(h.work.calls_for("free-one"), 1);
    assert_eq!(h.work.calls_for("free-two"), 1);
}
