// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::repository::tests::{build, job};
use crate::repository::SNAPSHOT_VALIDATION_PRODUCER;
use fm_core::{NodeStatus, PlanDefinition};

fn two_job_plan() -> Plan {
    let mut def = PlanDefinition::builder().build();
    def.jobs = vec![job("job-a", &[]), job("job-b", &["job-a"])];
    build(def)
}

#[test]
fn add_then_remove_dependency_keeps_the_add() {
    // Spec scenario: add B depending on A, then try to remove A.
    let mut def = PlanDefinition::builder().build();
    def.jobs = vec![job("job-a", &[])];
    let plan = build(def);

    let ops = vec![
        ReshapeOp::AddNode { job: job("job-b", &["job-a"]) },
        ReshapeOp::RemoveNode { node: "job-a".into() },
    ];
    let (results, rebuilt) = apply_reshape(&plan, &ops);
    let rebuilt = rebuilt.unwrap();

    assert!(results[0].success);
    assert!(!results[1].success);
    assert_eq!(results[1].error.as_ref().unwrap().kind, fm_core::ErrorKind::Conflict);
    assert!(rebuilt.resolve_node("job-a").is_some());
    assert!(rebuilt.resolve_node("job-b").is_some());
}

#[test]
fn remove_leaf_succeeds() {
    let plan = two_job_plan();
    let (results, rebuilt) =
        apply_reshape(&plan, &[ReshapeOp::RemoveNode { node: "job-b".into() }]);
    assert!(results[0].success);
    let rebuilt = rebuilt.unwrap();
    assert!(rebuilt.resolve_node("job-b").is_none());
    assert_eq!(rebuilt.nodes.len(), 1);
}

#[test]
fn remove_running_node_is_rejected() {
    let mut plan = two_job_plan();
    let b = plan.resolve_node("job-b").unwrap();
    plan.exec.get_mut(&b).unwrap().transition(NodeStatus::Running);

    let (results, rebuilt) =
        apply_reshape(&plan, &[ReshapeOp::RemoveNode { node: "job-b".into() }]);
    assert!(!results[0].success);
    assert_eq!(
        results[0].error.as_ref().unwrap().kind,
        fm_core::ErrorKind::StateTransition
    );
    // Nothing changed.
    assert!(rebuilt.unwrap().resolve_node("job-b").is_some());
}

#[test]
fn cyclic_result_rolls_back_everything() {
    let plan = two_job_plan();
    let ops = vec![
        ReshapeOp::AddNode { job: job("job-c", &[]) },
        ReshapeOp::UpdateDeps {
            node: "job-a".into(),
            dependencies: vec!["job-b".into()],
        },
    ];
    let (results, rebuilt) = apply_reshape(&plan, &ops);
    assert!(results[0].success);
    assert!(results[1].success);
    let err = rebuilt.unwrap_err();
    assert!(err.message.contains("cycle"), "{}", err.message);
}

#[test]
fn update_deps_validates_references() {
    let plan = two_job_plan();
    let (results, rebuilt) = apply_reshape(
        &plan,
        &[ReshapeOp::UpdateDeps { node: "job-b".into(), dependencies: vec!["ghost".into()] }],
    );
    assert!(!results[0].success);
    let rebuilt = rebuilt.unwrap();
    let b = rebuilt.resolve_node("job-b").unwrap();
    assert_eq!(rebuilt.nodes[&b].dependencies.len(), 1);
}

#[test]
fn add_before_wires_new_dependency() {
    let plan = two_job_plan();
    let (results, rebuilt) = apply_reshape(
        &plan,
        &[ReshapeOp::AddBefore { job: job("job-pre", &[]), before: "job-b".into() }],
    );
    assert!(results[0].success);
    let rebuilt = rebuilt.unwrap();
    let b = rebuilt.resolve_node("job-b").unwrap();
    let pre = rebuilt.resolve_node("job-pre").unwrap();
    assert!(rebuilt.nodes[&b].dependencies.contains(&pre));
}

#[test]
fn add_after_depends_on_target() {
    let plan = two_job_plan();
    let (results, rebuilt) = apply_reshape(
        &plan,
        &[ReshapeOp::AddAfter { job: job("job-post", &[]), after: "job-b".into() }],
    );
    assert!(results[0].success);
    let rebuilt = rebuilt.unwrap();
    let b = rebuilt.resolve_node("job-b").unwrap();
    let post = rebuilt.resolve_node("job-post").unwrap();
    assert!(rebuilt.nodes[&post].dependencies.contains(&b));
}

#[test]
fn auto_managed_node_is_protected() {
    let mut def = PlanDefinition::builder().build();
    def.jobs = vec![job("job-a", &[])];
    def.validate_snapshot = true;
    let plan = build(def);

    let (results, _) = apply_reshape(
        &plan,
        &[
            ReshapeOp::RemoveNode { node: SNAPSHOT_VALIDATION_PRODUCER.into() },
            ReshapeOp::UpdateDeps {
                node: SNAPSHOT_VALIDATION_PRODUCER.into(),
                dependencies: vec![],
            },
            ReshapeOp::AddNode { job: job(SNAPSHOT_VALIDATION_PRODUCER, &[]) },
        ],
    );
    assert!(results.iter().all(|r| !r.success), "{results:?}");
}

#[test]
fn node_id_references_resolve() {
    let plan = two_job_plan();
    let b = plan.resolve_node("job-b").unwrap();
    let (results, rebuilt) =
        apply_reshape(&plan, &[ReshapeOp::RemoveNode { node: b.as_str().into() }]);
    assert!(results[0].success);
    assert!(rebuilt.unwrap().resolve_node("job-b").is_none());
}
