// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime topology mutation.

use super::support::harness;
use fm_core::{PlanStatus, ReshapeOp, ReshapePlan};

#[tokio::test]
async fn dependent_add_then_remove_keeps_only_the_add() {
    let h = harness();
    let plan_id = h.create(vec![h.shell_job("job-a", "exit 0", &[])]).await;
    h.wait_plan(plan_id, PlanStatus::Succeeded).await;

    let results = h
        .runner
        .reshape_plan(ReshapePlan {
            plan_id,
            ops: vec![
                ReshapeOp::AddNode { job: h.shell_job("job-b", "exit 0", &["job-a"]) },
                ReshapeOp::RemoveNode { node: "job-a".into() },
            ],
        })
        .await
        .expect("reshape");

    assert!(results[0].success);
    assert!(!results[1].success, "remove must fail while job-b depends on job-a");

    let jobs = h.runner.list_jobs(plan_id).expect("jobs");
    let producers: Vec<String> =
        jobs.iter().map(|(n, _)| n.producer_id.clone()).collect();
    assert!(producers.contains(&"job-a".to_string()));
    assert!(producers.contains(&"job-b".to_string()));

    // The added job runs now that its dependency already succeeded.
    h.wait_plan(plan_id, PlanStatus::Succeeded).await;
    assert_eq!(h.runner.get_status(plan_id).expect("status").counts.succeeded, 2);
}

#[tokio::test]
async fn cyclic_reshape_rolls_back() {
    let h = harness();
    let plan_id = h
        .create(vec![
            h.shell_job("job-a", "exit 0", &[]),
            h.shell_job("job-b", "exit 0", &["job-a"]),
        ])
        .await;
    h.wait_plan(plan_id, PlanStatus::Succeeded).await;

    let err = h
        .runner
        .reshape_plan(ReshapePlan {
            plan_id,
            ops: vec![ReshapeOp::UpdateDeps {
                node: "job-a".into(),
                dependencies: vec!["job-b".into()],
            }],
        })
        .await
        .expect_err("cycle must be rejected");
    assert!(err.message.contains("cycle"), "{}", err.message);

    // Topology unchanged.
    let jobs = h.runner.list_jobs(plan_id).expect("jobs");
    assert_eq!(jobs.len(), 2);
    let plan = h.runner.get(plan_id).expect("plan");
    let a = plan.resolve_node("job-a").expect("job-a");
    assert!(plan.nodes[&a].dependencies.is_empty());
}
