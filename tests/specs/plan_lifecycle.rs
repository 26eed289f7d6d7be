// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end happy paths and persistence guarantees.

use super::support::harness;
use fm_adapters::fake::ScriptedRun;
use fm_core::{AddJob, FinalizePlan, NodeStatus, Phase, PlanStatus, ScaffoldPlan};

#[tokio::test]
async fn single_shell_job_succeeds_without_diff() {
    let h = harness();
    let plan_id = h.create(vec![h.shell_job("only-job", "exit 0", &[])]).await;
    h.wait_plan(plan_id, PlanStatus::Succeeded).await;

    let attempts = h.runner.get_job_attempts(plan_id, "only-job").expect("attempts");
    assert_eq!(attempts.len(), 1);

    let (_, state) = h.runner.get_job(plan_id, "only-job").expect("job");
    assert_eq!(state.status, NodeStatus::Succeeded);
    assert_eq!(state.completed_commit, state.base_commit);
    assert!(state.base_commit.is_some());
}

#[tokio::test]
async fn failed_root_blocks_dependent_and_fails_plan() {
    let h = harness();
    h.work.script("job-a", Phase::Work, ScriptedRun::failing(2));
    let plan_id = h
        .create(vec![
            h.shell_job("job-a", "exit 2", &[]),
            h.shell_job("job-b", "exit 0", &["job-a"]),
        ])
        .await;
    h.wait_plan(plan_id, PlanStatus::Failed).await;

    assert_eq!(h.node_status(plan_id, "job-a"), NodeStatus::Failed);
    assert_eq!(h.node_status(plan_id, "job-b"), NodeStatus::Blocked);
    assert_eq!(h.work.calls_for("job-b"), 0);

    let (_, state) = h.runner.get_job(plan_id, "job-a").expect("job");
    assert_eq!(state.error.as_deref(), Some("exit code 2"));
    assert_eq!(
        state.step_statuses.get(&Phase::Work),
        Some(&fm_core::StepStatus::Failed)
    );
}

#[tokio::test]
async fn scaffold_add_finalize_equals_direct_submission() {
    let h = harness();

    let scaffolded = h
        .runner
        .scaffold_plan(ScaffoldPlan { definition: h.definition(vec![]) })
        .await
        .expect("scaffold");
    h.runner
        .add_job(AddJob { plan_id: scaffolded, job: h.shell_job("job-a", "exit 0", &[]) })
        .await
        .expect("add job-a");
    h.runner
        .add_job(AddJob {
            plan_id: scaffolded,
            job: h.shell_job("job-b", "exit 0", &["job-a"]),
        })
        .await
        .expect("add job-b");
    h.runner
        .finalize_plan(FinalizePlan { plan_id: scaffolded, start_paused: false })
        .await
        .expect("finalize");
    h.wait_plan(scaffolded, PlanStatus::Succeeded).await;

    let direct = h
        .create(vec![
            h.shell_job("job-a", "exit 0", &[]),
            h.shell_job("job-b", "exit 0", &["job-a"]),
        ])
        .await;
    h.wait_plan(direct, PlanStatus::Succeeded).await;

    let a = h.runner.get_status(scaffolded).expect("status");
    let b = h.runner.get_status(direct).expect("status");
    assert_eq!(a.counts, b.counts);
    assert_eq!(a.status, b.status);
}

#[tokio::test]
async fn persisted_state_round_trips_through_the_store() {
    let h = harness();
    let plan_id = h
        .create(vec![
            h.shell_job("job-a", "exit 0", &[]),
            h.shell_job("job-b", "exit 0", &["job-a"]),
        ])
        .await;
    h.wait_plan(plan_id, PlanStatus::Succeeded).await;

    let live = h.runner.get(plan_id).expect("plan snapshot");
    let (stored, state) = h.runner.store().load(plan_id).expect("load");
    assert_eq!(stored.definition, live.definition);
    assert_eq!(stored.node_ids, live.producer_index);
    assert_eq!(state.nodes, live.exec);
    assert_eq!(state.attempts, live.attempts);
    assert_eq!(state.target_branch, live.target_branch);
}

#[tokio::test]
async fn target_branch_is_never_the_default_branch() {
    let h = harness();
    let mut definition = h.definition(vec![h.shell_job("only-job", "exit 0", &[])]);
    definition.target_branch = Some("main".to_string());
    let plan_id = h
        .runner
        .create_plan(fm_core::CreatePlan { definition, start_paused: false })
        .await
        .expect("create");
    h.wait_plan(plan_id, PlanStatus::Succeeded).await;

    let report = h.runner.get_status(plan_id).expect("status");
    assert_ne!(report.target_branch, "main");
    assert!(report.target_branch.starts_with("copilot_plan/"), "{}", report.target_branch);
}
