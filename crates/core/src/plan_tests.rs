// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::dag;
use crate::node::JobSpec;
use crate::status::NodeStatus;
use crate::work::WorkSpec;

pub(crate) fn plan_with(jobs: &[(&str, &[&str], NodeStatus)]) -> Plan {
    let mut nodes: IndexMap<NodeId, Node> = IndexMap::new();
    let mut producer_index = BTreeMap::new();
    let mut exec = BTreeMap::new();
    for (producer, deps, status) in jobs {
        let id = NodeId::from_string(format!("nod-{producer}"));
        let node = Node {
            id,
            producer_id: producer.to_string(),
            name: producer.to_string(),
            task: String::new(),
            work: Some(WorkSpec::shell("true")),
            prechecks: None,
            postchecks: None,
            dependencies: deps
                .iter()
                .map(|d| NodeId::from_string(format!("nod-{d}")))
                .collect(),
            dependents: Vec::new(),
            group: None,
            auto_heal: false,
            expects_no_changes: false,
            on_failure: None,
            auto_managed: false,
        };
        producer_index.insert(producer.to_string(), id);
        let mut state = ExecutionState::default();
        state.status = *status;
        exec.insert(id, state);
        nodes.insert(id, node);
    }
    dag::derive_dependents(&mut nodes).unwrap();

    let definition = PlanDefinition {
        name: "test plan".into(),
        repo_path: PathBuf::from("/repo"),
        base_branch: None,
        target_branch: None,
        worktree_root: None,
        max_parallel: 0,
        env: HashMap::new(),
        validate_snapshot: false,
        jobs: Vec::new(),
    };
    Plan {
        id: PlanId::from_string("pln-test"),
        definition,
        base_branch: "main".into(),
        target_branch: "feature/test".into(),
        worktree_root: ".worktrees".into(),
        lifecycle: PlanLifecycle::Active,
        is_paused: false,
        canceled: false,
        created_at_ms: 1_000_000,
        started_at_ms: None,
        ended_at_ms: None,
        state_version: 0,
        nodes,
        producer_index,
        exec,
        attempts: BTreeMap::new(),
    }
}

#[test]
fn resolve_node_accepts_both_id_forms() {
    let plan = plan_with(&[("alpha", &[], NodeStatus::Pending)]);
    let id = plan.resolve_node("alpha").unwrap();
    assert_eq!(plan.resolve_node("nod-alpha"), Some(id));
    assert_eq!(plan.resolve_node("beta"), None);
    assert_eq!(plan.resolve_node("nod-beta"), None);
}

#[test]
fn counts_and_progress() {
    let plan = plan_with(&[
        ("a", &[], NodeStatus::Succeeded),
        ("b", &["a"], NodeStatus::Failed),
        ("c", &["b"], NodeStatus::Blocked),
        ("d", &[], NodeStatus::Running),
    ]);
    let counts = plan.counts();
    assert_eq!(counts.succeeded, 1);
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.blocked, 1);
    assert_eq!(counts.running, 1);
    assert_eq!(counts.total(), 4);
    assert!((plan.progress() - 0.75).abs() < f64::EPSILON);
    assert!(!plan.all_terminal());
}

#[test]
fn effective_max_parallel_maps_zero_to_cap() {
    let mut plan = plan_with(&[("a", &[], NodeStatus::Pending)]);
    assert_eq!(plan.effective_max_parallel(4), 4);
    plan.definition.max_parallel = 2;
    assert_eq!(plan.effective_max_parallel(4), 2);
}

#[test]
fn worktree_path_layout() {
    let plan = plan_with(&[("a", &[], NodeStatus::Pending)]);
    let id = plan.resolve_node("a").unwrap();
    assert_eq!(
        plan.worktree_path(&id),
        PathBuf::from("/repo/.worktrees/pln-test/nod-a")
    );
}

#[test]
fn bijection_check_catches_drift() {
    let mut plan = plan_with(&[("a", &[], NodeStatus::Pending)]);
    plan.check_bijection().unwrap();
    plan.producer_index.insert("ghost".into(), NodeId::from_string("nod-ghost"));
    assert!(plan.check_bijection().is_err());
}

#[test]
fn definition_rejects_duplicate_producers() {
    let job = |p: &str| JobSpec {
        producer_id: p.into(),
        name: p.into(),
        task: String::new(),
        work: Some(WorkSpec::shell("true")),
        prechecks: None,
        postchecks: None,
        dependencies: vec![],
        group: None,
        auto_heal: false,
        expects_no_changes: false,
        on_failure: None,
    };
    let def = PlanDefinition {
        name: "p".into(),
        repo_path: PathBuf::from("/repo"),
        base_branch: None,
        target_branch: None,
        worktree_root: None,
        max_parallel: 0,
        env: HashMap::new(),
        validate_snapshot: false,
        jobs: vec![job("same-name"), job("same-name")],
    };
    let err = def.validate().unwrap_err();
    assert!(err.message.contains("duplicate"), "{}", err.message);
}

#[test]
fn definition_rejects_relative_repo_path() {
    let def = PlanDefinition {
        name: "p".into(),
        repo_path: PathBuf::from("repo"),
        base_branch: None,
        target_branch: None,
        worktree_root: None,
        max_parallel: 0,
        env: HashMap::new(),
        validate_snapshot: false,
        jobs: vec![],
    };
    assert!(def.validate().is_err());
}

#[test]
fn plan_serde_round_trip() {
    let plan = plan_with(&[
        ("a", &[], NodeStatus::Succeeded),
        ("b", &["a"], NodeStatus::Pending),
    ]);
    let json = serde_json::to_string(&plan).unwrap();
    let back: Plan = serde_json::from_str(&json).unwrap();
    assert_eq!(back, plan);
}
