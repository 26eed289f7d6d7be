// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The plan runner: owns all live plans and their supervisor tasks.
//!
//! Every mutating command is forwarded into the target plan's mailbox and
//! answered only after the resulting state has been persisted. Queries read
//! a shared snapshot without touching the mailbox.

use crate::branch;
use crate::config::RunnerConfig;
use crate::executor::ExecutorDeps;
use crate::failure::{self, FailureContext};
use crate::pump::{Ack, PlanCommand, PlanTask};
use crate::recover;
use crate::repository;
use crate::reshape::OpResult;
use fm_adapters::WorkAdapter;
use fm_core::{
    AddJob, Attempt, Clock, CommandError, CreatePlan, ExecutionState, FinalizePlan, GroupState,
    Node, NodeId, NodeStatus, Plan, PlanEvent, PlanId, PlanLifecycle, PlanStatus, ReshapePlan,
    RetryJob, ScaffoldPlan, StatusCounts, UpdateJob, machine,
};
use fm_gitops::GitGateway;
use fm_storage::{PlanStore, StateSnapshot, StoredDefinition};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

const MAILBOX_DEPTH: usize = 64;
const EVENT_BUS_DEPTH: usize = 256;

/// Aggregate view returned by `get_status`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlanStatusReport {
    pub plan_id: PlanId,
    pub status: PlanStatus,
    pub counts: StatusCounts,
    /// Fraction of nodes in a terminal status, in [0, 1].
    pub progress: f64,
    pub groups: Vec<GroupState>,
    pub is_paused: bool,
    pub lifecycle: PlanLifecycle,
    pub target_branch: String,
}

struct PlanHandle {
    cmd_tx: mpsc::Sender<PlanCommand>,
    shared: Arc<Mutex<Plan>>,
}

/// Process-wide plan orchestrator, generic over its gateways so tests can
/// script them.
pub struct PlanRunner<G, W, C: Clock> {
    config: Arc<RunnerConfig>,
    store: Arc<PlanStore>,
    git: Arc<G>,
    work: Arc<W>,
    clock: C,
    plans: Arc<Mutex<HashMap<PlanId, PlanHandle>>>,
    events: broadcast::Sender<PlanEvent>,
}

impl<G, W, C> PlanRunner<G, W, C>
where
    G: GitGateway,
    W: WorkAdapter,
    C: Clock,
{
    pub fn new(config: RunnerConfig, git: Arc<G>, work: Arc<W>, clock: C) -> Self {
        let store = Arc::new(PlanStore::new(config.storage_root.clone()));
        let (events, _) = broadcast::channel(EVENT_BUS_DEPTH);
        Self {
            config: Arc::new(config),
            store,
            git,
            work,
            clock,
            plans: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn store(&self) -> &PlanStore {
        &self.store
    }

    /// Observer feed for the embedding host.
    pub fn subscribe(&self) -> broadcast::Receiver<PlanEvent> {
        self.events.subscribe()
    }

    fn deps(&self) -> ExecutorDeps<G, W, C> {
        ExecutorDeps {
            git: self.git.clone(),
            work: self.work.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
        }
    }

    /// Admit a plan: share it, persist it, and start its supervisor task.
    fn admit(&self, plan: Plan, persist: bool) -> Result<PlanId, CommandError> {
        let plan_id = plan.id;
        let shared = Arc::new(Mutex::new(plan));
        if persist {
            let (definition, mut snapshot) = {
                let plan = shared.lock();
                (
                    StoredDefinition::of(&plan),
                    StateSnapshot::of(&plan, chrono::Utc::now()),
                )
            };
            self.store.save_definition(&definition)?;
            let version = self.store.save_state(plan_id, &mut snapshot)?;
            shared.lock().state_version = version;
            let nodes: Vec<Node> = shared.lock().nodes.values().cloned().collect();
            for node in &nodes {
                self.store.save_node_spec(plan_id, node)?;
            }
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(MAILBOX_DEPTH);
        let task = PlanTask::new(
            self.deps(),
            self.store.clone(),
            shared.clone(),
            self.events.clone(),
            cmd_rx,
        );
        tokio::spawn(task.run());
        self.plans.lock().insert(plan_id, PlanHandle { cmd_tx, shared });
        tracing::info!(plan = %plan_id, "plan admitted");
        Ok(plan_id)
    }

    /// Load persisted plans, reconcile orphaned attempts, restart pumps,
    /// and schedule the delayed orphaned-worktree sweep.
    pub async fn load_all(&self) -> Result<Vec<PlanId>, CommandError> {
        let mut loaded = Vec::new();
        for plan_id in self.store.list_plan_ids()? {
            match self.load_one(plan_id) {
                Ok(()) => loaded.push(plan_id),
                Err(e) => {
                    tracing::error!(plan = %plan_id, error = %e, "failed to load plan");
                }
            }
        }
        self.spawn_cleanup_sweep();
        Ok(loaded)
    }

    fn load_one(&self, plan_id: PlanId) -> Result<(), CommandError> {
        let (stored, snapshot) = self.store.load(plan_id)?;
        let branches = branch::ResolvedBranches {
            base: snapshot.base_branch.clone(),
            target: snapshot.target_branch.clone(),
        };
        let worktree_root = stored
            .definition
            .worktree_root
            .clone()
            .unwrap_or_else(|| self.config.worktree_root.clone());
        let mut plan = repository::build_plan(
            plan_id,
            stored.definition,
            &branches,
            worktree_root,
            &stored.node_ids,
            snapshot.created_at_ms,
            snapshot.lifecycle,
        )?;
        snapshot.apply_to(&mut plan);
        let orphaned = recover::reconcile_plan(&mut plan);
        self.admit(plan, orphaned > 0)?;
        Ok(())
    }

    /// Best-effort startup sweep for worktrees nothing references anymore.
    fn spawn_cleanup_sweep(&self) {
        let git = self.git.clone();
        let plans = self.plans.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            tokio::time::sleep(config.cleanup_delay()).await;
            let (repos, live) = {
                let plans = plans.lock();
                let mut repos = Vec::new();
                let mut live = std::collections::HashSet::new();
                for handle in plans.values() {
                    let plan = handle.shared.lock();
                    repos.push((
                        plan.definition.repo_path.clone(),
                        plan.worktree_root.clone(),
                    ));
                    for state in plan.exec.values() {
                        if let Some(path) = &state.worktree_path {
                            live.insert(path.clone());
                        }
                    }
                }
                (repos, live)
            };
            let report = crate::cleanup::sweep_orphaned_worktrees(&*git, &repos, &live).await;
            if !report.removed.is_empty() || !report.errors.is_empty() {
                tracing::info!(
                    removed = report.removed.len(),
                    errors = report.errors.len(),
                    "orphaned worktree sweep finished"
                );
            }
        });
    }

    // --- plan creation ---------------------------------------------------

    pub async fn create_plan(&self, cmd: CreatePlan) -> Result<PlanId, CommandError> {
        cmd.validate()?;
        let mut plan = self.materialize(cmd.definition, PlanLifecycle::Active).await?;
        plan.is_paused = cmd.start_paused;
        self.admit(plan, true)
    }

    pub async fn scaffold_plan(&self, cmd: ScaffoldPlan) -> Result<PlanId, CommandError> {
        cmd.validate()?;
        let plan = self.materialize(cmd.definition, PlanLifecycle::Scaffolding).await?;
        self.admit(plan, true)
    }

    async fn materialize(
        &self,
        definition: fm_core::PlanDefinition,
        lifecycle: PlanLifecycle,
    ) -> Result<Plan, CommandError> {
        let branches = branch::resolve_branches(
            &*self.git,
            &definition.repo_path,
            definition.base_branch.as_deref(),
            definition.target_branch.as_deref(),
            &definition.name,
            &self.config.branch_prefix,
            &self.clock,
        )
        .await?;
        let worktree_root = definition
            .worktree_root
            .clone()
            .unwrap_or_else(|| self.config.worktree_root.clone());
        repository::build_plan(
            PlanId::new(),
            definition,
            &branches,
            worktree_root,
            &Default::default(),
            self.clock.epoch_ms(),
            lifecycle,
        )
    }

    // --- command surface -------------------------------------------------

    async fn send<T>(
        &self,
        plan_id: PlanId,
        make: impl FnOnce(Ack<T>) -> PlanCommand,
    ) -> Result<T, CommandError> {
        let cmd_tx = {
            let plans = self.plans.lock();
            let handle = plans
                .get(&plan_id)
                .ok_or_else(|| CommandError::not_found(format!("no plan {plan_id}")))?;
            handle.cmd_tx.clone()
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        cmd_tx
            .send(make(ack_tx))
            .await
            .map_err(|_| CommandError::internal(format!("plan {plan_id} task is gone")))?;
        ack_rx
            .await
            .map_err(|_| CommandError::internal(format!("plan {plan_id} dropped the command")))?
    }

    pub async fn add_job(&self, cmd: AddJob) -> Result<(), CommandError> {
        cmd.validate()?;
        self.send(cmd.plan_id, |ack| PlanCommand::AddJob { job: cmd.job.clone(), ack }).await
    }

    pub async fn finalize_plan(&self, cmd: FinalizePlan) -> Result<(), CommandError> {
        self.send(cmd.plan_id, |ack| PlanCommand::Finalize {
            start_paused: cmd.start_paused,
            ack,
        })
        .await
    }

    pub async fn pause_plan(&self, plan_id: PlanId) -> Result<(), CommandError> {
        self.send(plan_id, PlanCommand::Pause).await
    }

    pub async fn resume_plan(&self, plan_id: PlanId) -> Result<(), CommandError> {
        self.send(plan_id, PlanCommand::Resume).await
    }

    pub async fn cancel_plan(&self, plan_id: PlanId) -> Result<(), CommandError> {
        self.send(plan_id, PlanCommand::Cancel).await
    }

    pub async fn retry_job(&self, cmd: RetryJob) -> Result<(), CommandError> {
        cmd.validate()?;
        let plan_id = cmd.plan_id;
        self.send(plan_id, move |ack| PlanCommand::RetryNode { cmd, ack }).await
    }

    pub async fn retry_plan(&self, plan_id: PlanId) -> Result<(), CommandError> {
        self.send(plan_id, |ack| PlanCommand::RetryPlan { ack }).await
    }

    pub async fn force_fail_job(
        &self,
        plan_id: PlanId,
        node: &str,
    ) -> Result<(), CommandError> {
        let node = node.to_string();
        self.send(plan_id, move |ack| PlanCommand::ForceFail { node, ack }).await
    }

    pub async fn update_job(&self, cmd: UpdateJob) -> Result<(), CommandError> {
        cmd.validate()?;
        let plan_id = cmd.plan_id;
        self.send(plan_id, move |ack| PlanCommand::UpdateNode { cmd, ack }).await
    }

    pub async fn reshape_plan(&self, cmd: ReshapePlan) -> Result<Vec<OpResult>, CommandError> {
        cmd.validate()?;
        let plan_id = cmd.plan_id;
        self.send(plan_id, move |ack| PlanCommand::Reshape { ops: cmd.ops, ack }).await
    }

    pub async fn cleanup_worktrees(&self, plan_id: PlanId) -> Result<(), CommandError> {
        self.send(plan_id, |ack| PlanCommand::CleanupWorktrees { ack }).await
    }

    /// Cancel, stop the pump, remove on-disk artifacts and (by policy)
    /// worktrees. Idempotent: deleting an unknown plan succeeds.
    pub async fn delete_plan(&self, plan_id: PlanId) -> Result<(), CommandError> {
        let handle = self.plans.lock().remove(&plan_id);
        if let Some(handle) = handle {
            let plan = handle.shared.lock().clone();
            // Stop scheduling and kill running subprocesses first.
            let (ack_tx, ack_rx) = oneshot::channel();
            if handle.cmd_tx.send(PlanCommand::Cancel(ack_tx)).await.is_ok() {
                let _ = ack_rx.await;
            }
            let (ack_tx, ack_rx) = oneshot::channel();
            if handle.cmd_tx.send(PlanCommand::Shutdown { ack: ack_tx }).await.is_ok() {
                let _ = ack_rx.await;
            }
            if self.config.remove_worktrees_on_delete {
                for state in plan.exec.values() {
                    if let Some(path) = &state.worktree_path {
                        if let Err(e) = self
                            .git
                            .remove_worktree(&plan.definition.repo_path, path, true)
                            .await
                        {
                            tracing::warn!(plan = %plan_id, error = %e, "worktree removal failed");
                        }
                        if path.exists() {
                            let _ = std::fs::remove_dir_all(path);
                        }
                    }
                }
            }
        }
        self.store.delete(plan_id)?;
        tracing::info!(plan = %plan_id, "plan deleted");
        Ok(())
    }

    // --- queries ---------------------------------------------------------

    fn with_plan<T>(
        &self,
        plan_id: PlanId,
        f: impl FnOnce(&Plan) -> T,
    ) -> Result<T, CommandError> {
        let plans = self.plans.lock();
        let handle = plans
            .get(&plan_id)
            .ok_or_else(|| CommandError::not_found(format!("no plan {plan_id}")))?;
        let plan = handle.shared.lock();
        Ok(f(&plan))
    }

    /// Read-only snapshot of one plan.
    pub fn get(&self, plan_id: PlanId) -> Option<Plan> {
        self.with_plan(plan_id, |plan| plan.clone()).ok()
    }

    /// Read-only snapshots of every live plan.
    pub fn get_all(&self) -> Vec<Plan> {
        let plans = self.plans.lock();
        let mut all: Vec<Plan> =
            plans.values().map(|handle| handle.shared.lock().clone()).collect();
        all.sort_by_key(|p| p.created_at_ms);
        all
    }

    pub fn get_status(&self, plan_id: PlanId) -> Result<PlanStatusReport, CommandError> {
        self.with_plan(plan_id, |plan| PlanStatusReport {
            plan_id: plan.id,
            status: machine::plan_status(plan),
            counts: plan.counts(),
            progress: plan.progress(),
            groups: plan.group_states(),
            is_paused: plan.is_paused,
            lifecycle: plan.lifecycle,
            target_branch: plan.target_branch.clone(),
        })
    }

    pub fn get_job(
        &self,
        plan_id: PlanId,
        node: &str,
    ) -> Result<(Node, ExecutionState), CommandError> {
        self.with_plan(plan_id, |plan| {
            let node_id = plan.resolve_node(node).ok_or_else(|| {
                CommandError::not_found(format!("no job {node:?} in plan {plan_id}"))
            })?;
            let spec = plan.nodes[&node_id].clone();
            let state = plan.exec.get(&node_id).cloned().unwrap_or_default();
            Ok((spec, state))
        })?
    }

    pub fn list_jobs(&self, plan_id: PlanId) -> Result<Vec<(Node, NodeStatus)>, CommandError> {
        self.with_plan(plan_id, |plan| {
            plan.nodes
                .values()
                .map(|n| {
                    (n.clone(), plan.status_of(&n.id).unwrap_or(NodeStatus::Pending))
                })
                .collect()
        })
    }

    /// Log of one attempt, or the latest attempt when `attempt` is None.
    pub fn get_job_logs(
        &self,
        plan_id: PlanId,
        node: &str,
        attempt: Option<u32>,
    ) -> Result<String, CommandError> {
        let (node_id, latest) = self.with_plan(plan_id, |plan| {
            let node_id = plan.resolve_node(node).ok_or_else(|| {
                CommandError::not_found(format!("no job {node:?} in plan {plan_id}"))
            })?;
            let latest = plan.exec.get(&node_id).map(|s| s.attempts).unwrap_or(0);
            Ok::<_, CommandError>((node_id, latest))
        })??;
        let attempt = attempt.unwrap_or(latest.max(1));
        Ok(self.store.read_log(plan_id, node_id, attempt)?)
    }

    pub fn get_job_attempts(
        &self,
        plan_id: PlanId,
        node: &str,
    ) -> Result<Vec<Attempt>, CommandError> {
        self.with_plan(plan_id, |plan| {
            let node_id = plan.resolve_node(node).ok_or_else(|| {
                CommandError::not_found(format!("no job {node:?} in plan {plan_id}"))
            })?;
            Ok(plan.attempts.get(&node_id).cloned().unwrap_or_default())
        })?
    }

    pub fn get_job_attempt(
        &self,
        plan_id: PlanId,
        node: &str,
        number: u32,
    ) -> Result<Attempt, CommandError> {
        self.get_job_attempts(plan_id, node)?
            .into_iter()
            .find(|a| a.number == number)
            .ok_or_else(|| {
                CommandError::not_found(format!("job {node:?} has no attempt {number}"))
            })
    }

    /// Everything an operator needs to diagnose a failed job.
    pub fn get_job_failure_context(
        &self,
        plan_id: PlanId,
        node: &str,
    ) -> Result<FailureContext, CommandError> {
        let context = self.with_plan(plan_id, |plan| {
            let node_id = plan.resolve_node(node).ok_or_else(|| {
                CommandError::not_found(format!("no job {node:?} in plan {plan_id}"))
            })?;
            failure::build_context(plan, node_id)
        })??;
        let logs = self
            .store
            .read_log(plan_id, context.node_id, context.attempt_number)
            .unwrap_or_default();
        Ok(FailureContext { logs, ..context })
    }

    /// Global reverse index: find a job by producer ID or node ID across
    /// all live plans.
    pub fn find_job(&self, reference: &str) -> Option<(PlanId, NodeId)> {
        let plans = self.plans.lock();
        for handle in plans.values() {
            let plan = handle.shared.lock();
            if let Some(node_id) = plan.resolve_node(reference) {
                return Some((plan.id, node_id));
            }
        }
        None
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
