// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixture: a plan runner wired to fake gateways.

use fm_adapters::fake::FakeWorkAdapter;
use fm_core::{
    CreatePlan, FakeClock, JobSpec, NodeStatus, PlanDefinition, PlanId, PlanStatus, WorkSpec,
};
use fm_engine::{PlanRunner, RunnerConfig};
use fm_gitops::fake::FakeGit;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub(crate) type TestRunner = PlanRunner<FakeGit, FakeWorkAdapter, FakeClock>;

pub(crate) struct Harness {
    pub runner: TestRunner,
    pub git: Arc<FakeGit>,
    pub work: Arc<FakeWorkAdapter>,
    pub repo: tempfile::TempDir,
    _store: tempfile::TempDir,
}

pub(crate) fn harness() -> Harness {
    let repo = tempfile::tempdir().expect("repo dir");
    let store = tempfile::tempdir().expect("store dir");
    let git = Arc::new(FakeGit::new());
    let work = Arc::new(FakeWorkAdapter::new());
    let config = RunnerConfig {
        storage_root: store.path().to_path_buf(),
        tick_ms: 20,
        grace_window_ms: 1_000,
        cleanup_delay_ms: 10,
        ..RunnerConfig::default()
    };
    let runner = PlanRunner::new(config, git.clone(), work.clone(), FakeClock::new());
    Harness { runner, git, work, repo, _store: store }
}

impl Harness {
    pub fn shell_job(&self, producer: &str, command: &str, deps: &[&str]) -> JobSpec {
        JobSpec {
            producer_id: producer.to_string(),
            name: producer.to_string(),
            task: String::new(),
            work: Some(WorkSpec::shell(command)),
            prechecks: None,
            postchecks: None,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            group: None,
            auto_heal: false,
            expects_no_changes: false,
            on_failure: None,
        }
    }

    pub fn definition(&self, jobs: Vec<JobSpec>) -> PlanDefinition {
        PlanDefinition {
            name: "integration plan".to_string(),
            repo_path: self.repo.path().to_path_buf(),
            base_branch: None,
            target_branch: None,
            worktree_root: None,
            max_parallel: 0,
            env: HashMap::new(),
            validate_snapshot: false,
            jobs,
        }
    }

    pub async fn create(&self, jobs: Vec<JobSpec>) -> PlanId {
        self.runner
            .create_plan(CreatePlan { definition: self.definition(jobs), start_paused: false })
            .await
            .expect("create plan")
    }

    pub async fn wait_plan(&self, plan_id: PlanId, expected: PlanStatus) {
        self.wait(|| {
            self.runner
                .get_status(plan_id)
                .map(|r| r.status == expected)
                .unwrap_or(false)
        })
        .await;
    }

    pub async fn wait_node(&self, plan_id: PlanId, node: &str, expected: NodeStatus) {
        self.wait(|| {
            self.runner
                .get_job(plan_id, node)
                .map(|(_, state)| state.status == expected)
                .unwrap_or(false)
        })
        .await;
    }

    pub async fn wait(&self, check: impl Fn() -> bool) {
        for _ in 0..1_000 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 10s");
    }

    pub fn node_status(&self, plan_id: PlanId, node: &str) -> NodeStatus {
        let (_, state) = self.runner.get_job(plan_id, node).expect("job exists");
        state.status
    }
}
