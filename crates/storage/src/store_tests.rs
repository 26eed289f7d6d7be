// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::Utc;
use fm_core::{
    dag, Attempt, AttemptId, ExecutionState, NodeStatus, Phase, Plan, PlanDefinition,
    PlanLifecycle, StepStatus, WorkSpec,
};
use indexmap::IndexMap;
use std::collections::BTreeMap;

fn sample_plan() -> Plan {
    let mut nodes: IndexMap<NodeId, fm_core::Node> = IndexMap::new();
    let mut producer_index = BTreeMap::new();
    let mut exec = BTreeMap::new();
    for (producer, deps) in [("job-a", vec![]), ("job-b", vec!["job-a"])] {
        let id = NodeId::from_string(format!("nod-{producer}"));
        nodes.insert(
            id,
            fm_core::Node {
                id,
                producer_id: producer.to_string(),
                name: producer.to_string(),
                task: "unit of work".into(),
                work: Some(WorkSpec::shell("cargo test")),
                prechecks: None,
                postchecks: None,
                dependencies: deps
                    .iter()
                    .map(|d: &&str| NodeId::from_string(format!("nod-{d}")))
                    .collect(),
                dependents: Vec::new(),
                group: Some("checks".into()),
                auto_heal: false,
                expects_no_changes: false,
                on_failure: None,
                auto_managed: false,
            },
        );
        producer_index.insert(producer.to_string(), id);
        exec.insert(id, ExecutionState::default());
    }
    dag::derive_dependents(&mut nodes).unwrap();

    let a = NodeId::from_string("nod-job-a");
    if let Some(state) = exec.get_mut(&a) {
        state.status = NodeStatus::Succeeded;
        state.attempts = 1;
        state.step_statuses.insert(Phase::Work, StepStatus::Success);
        state.completed_commit = Some("c7".into());
    }

    let definition = PlanDefinition::builder().name("storage plan").build();
    let mut plan = Plan {
        id: PlanId::from_string("pln-storage"),
        definition,
        base_branch: "main".into(),
        target_branch: "copilot_plan/storage-plan".into(),
        worktree_root: ".worktrees".into(),
        lifecycle: PlanLifecycle::Active,
        is_paused: false,
        canceled: false,
        created_at_ms: 1_000_000,
        started_at_ms: Some(1_000_100),
        ended_at_ms: None,
        state_version: 0,
        nodes,
        producer_index,
        exec,
        attempts: BTreeMap::new(),
    };
    plan.attempts.entry(a).or_default().push(Attempt {
        attempt_id: AttemptId::from_string("att-1"),
        number: 1,
        started_at_ms: 1_000_050,
        ended_at_ms: Some(1_000_090),
        status: NodeStatus::Succeeded,
        phase: Phase::MergeRi,
        work_instruction: "shell: cargo test".into(),
        log_file: PathBuf::from("logs/nod-job-a/attempt-1.log"),
        step_statuses: BTreeMap::new(),
        work_summary: None,
    });
    plan
}

#[test]
fn definition_and_state_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let store = PlanStore::new(tmp.path());
    let plan = sample_plan();

    store.save_definition(&StoredDefinition::of(&plan)).unwrap();
    let mut snapshot = StateSnapshot::of(&plan, Utc::now());
    store.save_state(plan.id, &mut snapshot).unwrap();

    let (def, state) = store.load(plan.id).unwrap();
    assert_eq!(def, StoredDefinition::of(&plan));
    assert_eq!(state, snapshot);

    // Reapplying the snapshot reproduces the plan's mutable state.
    let mut reloaded = sample_plan();
    state.apply_to(&mut reloaded);
    assert_eq!(reloaded.state_version, snapshot.state_version);
    assert_eq!(reloaded.exec, plan.exec);
    assert_eq!(reloaded.attempts, plan.attempts);
}

#[test]
fn save_state_bumps_version_monotonically() {
    let tmp = tempfile::tempdir().unwrap();
    let store = PlanStore::new(tmp.path());
    let plan = sample_plan();
    store.save_definition(&StoredDefinition::of(&plan)).unwrap();

    let mut snapshot = StateSnapshot::of(&plan, Utc::now());
    assert_eq!(store.save_state(plan.id, &mut snapshot).unwrap(), 1);
    assert_eq!(store.save_state(plan.id, &mut snapshot).unwrap(), 2);
    assert_eq!(store.state_version_on_disk(plan.id), Some(2));
}

#[test]
fn no_tmp_files_survive_a_save() {
    let tmp = tempfile::tempdir().unwrap();
    let store = PlanStore::new(tmp.path());
    let plan = sample_plan();
    store.save_definition(&StoredDefinition::of(&plan)).unwrap();
    let mut snapshot = StateSnapshot::of(&plan, Utc::now());
    store.save_state(plan.id, &mut snapshot).unwrap();

    let leftovers: Vec<_> = walk(tmp.path())
        .into_iter()
        .filter(|p| p.extension().is_some_and(|e| e == "tmp"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

fn walk(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else { return out };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            out.extend(walk(&path));
        } else {
            out.push(path);
        }
    }
    out
}

#[test]
fn list_plan_ids_ignores_foreign_entries() {
    let tmp = tempfile::tempdir().unwrap();
    let store = PlanStore::new(tmp.path());
    let plan = sample_plan();
    store.save_definition(&StoredDefinition::of(&plan)).unwrap();

    // Directories without a definition or without the ID prefix are skipped.
    std::fs::create_dir_all(tmp.path().join("pln-empty")).unwrap();
    std::fs::create_dir_all(tmp.path().join("lost+found")).unwrap();
    std::fs::write(tmp.path().join("stray.txt"), b"x").unwrap();

    assert_eq!(store.list_plan_ids().unwrap(), vec![plan.id]);
}

#[test]
fn logs_append_and_read_back() {
    let tmp = tempfile::tempdir().unwrap();
    let store = PlanStore::new(tmp.path());
    let plan = sample_plan();
    let node = NodeId::from_string("nod-job-a");

    store.append_log(plan.id, node, 1, b"[work] line one\n").unwrap();
    store.append_log(plan.id, node, 1, b"[work] line two\n").unwrap();
    let content = store.read_log(plan.id, node, 1).unwrap();
    assert_eq!(content, "[work] line one\n[work] line two\n");

    let path = store.log_path(plan.id, node, 1);
    assert!(path.ends_with("pln-storage/logs/nod-job-a/attempt-1.log"));
}

#[test]
fn delete_is_recursive_and_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let store = PlanStore::new(tmp.path());
    let plan = sample_plan();
    store.save_definition(&StoredDefinition::of(&plan)).unwrap();
    store.append_log(plan.id, NodeId::from_string("nod-job-a"), 1, b"x").unwrap();

    store.delete(plan.id).unwrap();
    assert!(!store.exists(plan.id));
    store.delete(plan.id).unwrap();
    assert_eq!(store.list_plan_ids().unwrap(), Vec::<PlanId>::new());
}

#[test]
fn load_missing_plan_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let store = PlanStore::new(tmp.path());
    let err = store.load(PlanId::from_string("pln-ghost")).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)), "{err}");
}

#[test]
fn node_spec_lands_under_specs_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let store = PlanStore::new(tmp.path());
    let plan = sample_plan();
    let node = plan.nodes.values().next().unwrap();
    store.save_node_spec(plan.id, node).unwrap();
    let path = tmp.path().join("pln-storage/specs/nod-job-a.json");
    assert!(path.is_file());
    let parsed: fm_core::Node =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(&parsed, node);
}
