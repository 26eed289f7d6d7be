// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-plan supervisor task.
//!
//! One task per plan owns that plan's mutations. Commands arrive through a
//! serial mailbox, executor events through a second channel, and a fixed
//! tick drives scheduling. Persistence happens before a command is
//! acknowledged, so an acked mutation survives a crash.

use crate::executor::{self, AttemptContext, ExecutorDeps};
use crate::repository;
use crate::reshape::{self, OpResult};
use fm_adapters::WorkAdapter;
use fm_core::{
    machine, Attempt, AttemptId, Clock, CommandError, ExecutorEvent, JobSpec, LastAttempt,
    NodeId, NodeStatus, Phase, Plan, PlanEvent, PlanId, PlanLifecycle, ReshapeOp, RetryJob,
    StepStatus, UpdateJob, WorkSpec,
};
use fm_gitops::GitGateway;
use fm_storage::{PlanStore, StateSnapshot, StoredDefinition};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

pub(crate) type Ack<T = ()> = oneshot::Sender<Result<T, CommandError>>;

/// Mailbox commands, processed one at a time per plan.
pub(crate) enum PlanCommand {
    Pause(Ack),
    Resume(Ack),
    Cancel(Ack),
    Finalize { start_paused: bool, ack: Ack },
    AddJob { job: JobSpec, ack: Ack },
    RetryNode { cmd: RetryJob, ack: Ack },
    RetryPlan { ack: Ack },
    ForceFail { node: String, ack: Ack },
    UpdateNode { cmd: UpdateJob, ack: Ack },
    Reshape { ops: Vec<ReshapeOp>, ack: Ack<Vec<OpResult>> },
    CleanupWorktrees { ack: Ack },
    /// Stop the task; used by delete and shutdown.
    Shutdown { ack: Ack },
}

struct RunningJob {
    cancel: CancellationToken,
}

/// State owned by one plan's supervisor task.
pub(crate) struct PlanTask<G, W, C: Clock> {
    deps: ExecutorDeps<G, W, C>,
    store: Arc<PlanStore>,
    shared: Arc<Mutex<Plan>>,
    events: broadcast::Sender<PlanEvent>,
    cmd_rx: Option<mpsc::Receiver<PlanCommand>>,
    exec_tx: mpsc::Sender<ExecutorEvent>,
    exec_rx: Option<mpsc::Receiver<ExecutorEvent>>,
    running: HashMap<NodeId, RunningJob>,
    merge_lock: Arc<tokio::sync::Mutex<()>>,
}

impl<G, W, C> PlanTask<G, W, C>
where
    G: GitGateway,
    W: WorkAdapter,
    C: Clock,
{
    pub(crate) fn new(
        deps: ExecutorDeps<G, W, C>,
        store: Arc<PlanStore>,
        shared: Arc<Mutex<Plan>>,
        events: broadcast::Sender<PlanEvent>,
        cmd_rx: mpsc::Receiver<PlanCommand>,
    ) -> Self {
        let (exec_tx, exec_rx) = mpsc::channel(256);
        Self {
            deps,
            store,
            shared,
            events,
            cmd_rx: Some(cmd_rx),
            exec_tx,
            exec_rx: Some(exec_rx),
            running: HashMap::new(),
            merge_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub(crate) async fn run(mut self) {
        let Some(mut cmd_rx) = self.cmd_rx.take() else { return };
        let Some(mut exec_rx) = self.exec_rx.take() else { return };

        let mut tick = tokio::time::interval(self.deps.config.tick());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        None => break,
                        Some(cmd) => {
                            if self.handle_command(cmd).await {
                                break;
                            }
                        }
                    }
                }
                Some(event) = exec_rx.recv() => {
                    self.apply_executor_event(event);
                    self.pump();
                }
                _ = tick.tick() => self.pump(),
            }
        }
        // Stop whatever is still running before the task exits.
        for (_, job) in self.running.drain() {
            job.cancel.cancel();
        }
    }

    fn emit(&self, event: PlanEvent) {
        let _ = self.events.send(event);
    }

    fn plan_id(&self) -> PlanId {
        self.shared.lock().id
    }

    /// Persist the current state (and optionally the definition) before the
    /// caller acknowledges anything.
    fn persist(&self, with_definition: bool) {
        let shared = self.shared.clone();
        let (plan_id, definition, mut snapshot) = {
            let plan = shared.lock();
            (plan.id, StoredDefinition::of(&plan), StateSnapshot::of(&plan, chrono::Utc::now()))
        };
        if with_definition {
            if let Err(e) = self.store.save_definition(&definition) {
                tracing::error!(plan = %plan_id, error = %e, "failed to persist definition");
            }
        }
        // A newer snapshot on disk means another writer got there; rehydrate
        // instead of clobbering.
        if let Some(on_disk) = self.store.state_version_on_disk(plan_id) {
            if on_disk > snapshot.state_version {
                tracing::warn!(
                    plan = %plan_id,
                    on_disk,
                    in_memory = snapshot.state_version,
                    "state on disk is newer; rehydrating"
                );
                if let Ok(disk_snapshot) = self.store.load_state(plan_id) {
                    let mut plan = shared.lock();
                    disk_snapshot.apply_to(&mut plan);
                    snapshot = StateSnapshot::of(&plan, chrono::Utc::now());
                }
            }
        }
        match self.store.save_state(plan_id, &mut snapshot) {
            Ok(version) => shared.lock().state_version = version,
            Err(e) => {
                tracing::error!(plan = %plan_id, error = %e, "failed to persist state");
            }
        }
    }

    /// One scheduling cycle: promote, schedule, detect terminal.
    fn pump(&mut self) {
        let shared = self.shared.clone();
        let mut settled = false;
        let to_spawn: Vec<AttemptContext> = {
            let mut plan = shared.lock();
            if !plan.lifecycle.schedulable() {
                return;
            }

            if !plan.canceled {
                // Promote pending/ready nodes per the state machine.
                let node_ids: Vec<NodeId> = plan.nodes.keys().copied().collect();
                for node_id in &node_ids {
                    let current = plan.status_of(node_id);
                    if matches!(
                        current,
                        Some(NodeStatus::Pending) | Some(NodeStatus::Ready)
                    ) {
                        let next = machine::node_readiness(&plan, node_id);
                        if current != Some(next) {
                            if let Some(state) = plan.exec.get_mut(node_id) {
                                state.transition(next);
                            }
                            self.emit(PlanEvent::NodeStatusChanged {
                                plan_id: plan.id,
                                node_id: *node_id,
                                status: next,
                            });
                        }
                    }
                }
            }

            let contexts = if plan.canceled || plan.is_paused || plan.ended_at_ms.is_some() {
                Vec::new()
            } else {
                let ready = machine::compute_ready(&plan, self.deps.config.parallel_cap);
                let mut contexts = Vec::with_capacity(ready.len());
                for node_id in ready {
                    contexts.push(self.prepare_attempt(&mut plan, node_id));
                }
                if plan.started_at_ms.is_none() && !contexts.is_empty() {
                    plan.started_at_ms = Some(self.deps.clock.epoch_ms());
                }
                contexts
            };
            if contexts.is_empty() {
                settled = self.settle_if_terminal(&mut plan);
            }
            contexts
        };

        if to_spawn.is_empty() {
            if settled {
                self.persist(false);
            }
            return;
        }
        for ctx in to_spawn {
            self.spawn_attempt(ctx);
        }
        self.persist(false);
    }

    /// Transition one ready node to scheduled and build its attempt inputs.
    fn prepare_attempt(&self, plan: &mut Plan, node_id: NodeId) -> AttemptContext {
        let node = plan.nodes[&node_id].clone();
        let attempt_id = AttemptId::new();
        let now = self.deps.clock.epoch_ms();
        let worktree_path = plan.worktree_path(&node_id);
        let branch = plan.node_branch(&node);

        let (attempt_number, resume_from, base_commit, completed_commit) = {
            let state = plan.exec.entry(node_id).or_default();
            state.transition(NodeStatus::Scheduled);
            state.attempts += 1;
            state.started_at_ms.get_or_insert(now);
            state.ended_at_ms = None;
            state.error = None;
            state.worktree_path = Some(worktree_path.clone());
            let resume = state.resume_from_phase.take();
            (
                state.attempts,
                resume,
                state.base_commit.clone(),
                state.completed_commit.clone(),
            )
        };

        let log_file = self.store.log_path(plan.id, node_id, attempt_number);
        plan.attempts.entry(node_id).or_default().push(Attempt {
            attempt_id,
            number: attempt_number,
            started_at_ms: now,
            ended_at_ms: None,
            status: NodeStatus::Running,
            phase: resume_from.unwrap_or(Phase::MergeFi),
            work_instruction: node.work.as_ref().map(WorkSpec::describe).unwrap_or_default(),
            log_file,
            step_statuses: Default::default(),
            work_summary: None,
        });

        self.emit(PlanEvent::NodeStatusChanged {
            plan_id: plan.id,
            node_id,
            status: NodeStatus::Scheduled,
        });

        let mut env: Vec<(String, String)> =
            plan.definition.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        env.sort();

        AttemptContext {
            plan_id: plan.id,
            repo_path: plan.definition.repo_path.clone(),
            target_branch: plan.target_branch.clone(),
            worktree_path,
            branch,
            node,
            attempt_id,
            attempt_number,
            resume_from,
            base_commit,
            completed_commit,
            env,
        }
    }

    /// Submit a prepared attempt to the executor; running on spawn ack.
    fn spawn_attempt(&mut self, ctx: AttemptContext) {
        let node_id = ctx.node.id;
        let producer = ctx.node.producer_id.clone();
        let plan_id = ctx.plan_id;
        let cancel = CancellationToken::new();
        self.running.insert(node_id, RunningJob { cancel: cancel.clone() });

        tracing::info!(
            plan = %plan_id,
            node = %producer,
            attempt = ctx.attempt_number,
            "job attempt started"
        );
        tokio::spawn(executor::run_attempt(
            self.deps.clone(),
            ctx,
            self.merge_lock.clone(),
            self.exec_tx.clone(),
            cancel,
        ));

        if let Some(state) = self.shared.lock().exec.get_mut(&node_id) {
            state.transition(NodeStatus::Running);
        }
        self.emit(PlanEvent::NodeStatusChanged {
            plan_id,
            node_id,
            status: NodeStatus::Running,
        });
    }

    /// Set the plan's end-of-life fields once nothing can make progress.
    /// Returns true when the plan just became terminal.
    fn settle_if_terminal(&self, plan: &mut Plan) -> bool {
        if plan.ended_at_ms.is_some() || !self.running.is_empty() {
            return false;
        }
        if plan.exec.values().any(|e| e.status.is_active()) {
            return false;
        }
        if plan.canceled {
            // Cancellation forces any straggling non-terminal node over.
            let ids: Vec<NodeId> = plan.nodes.keys().copied().collect();
            for node_id in ids {
                if let Some(state) = plan.exec.get_mut(&node_id) {
                    if !state.status.is_terminal() {
                        state.transition(NodeStatus::Canceled);
                    }
                }
            }
        }
        let status = machine::plan_status(plan);
        if !status.is_terminal() || !plan.all_terminal() {
            return false;
        }
        plan.ended_at_ms = Some(self.deps.clock.epoch_ms());
        plan.lifecycle = PlanLifecycle::Finalized;
        plan.state_version += 1;
        tracing::info!(plan = %plan.id, %status, "plan finished");
        self.emit(PlanEvent::PlanFinished { plan_id: plan.id, status });
        true
    }

    /// Fold one executor event into plan state and the attempt log.
    fn apply_executor_event(&mut self, event: ExecutorEvent) {
        let shared = self.shared.clone();
        let node_id = event.node_id();
        let mut persist = false;
        {
            let mut plan = shared.lock();
            let plan_id = plan.id;
            match &event {
                ExecutorEvent::PhaseStarted { phase, .. } => {
                    self.log(&plan, node_id, &format!("### {phase} started\n"));
                    if let Some(state) = plan.exec.get_mut(&node_id) {
                        state.step_statuses.insert(*phase, StepStatus::Running);
                        state.last_attempt = Some(LastAttempt {
                            phase: *phase,
                            started_at_ms: self.deps.clock.epoch_ms(),
                            ended_at_ms: None,
                            exit_code: None,
                        });
                        state.version += 1;
                    }
                    update_attempt(&mut plan, node_id, |attempt| {
                        attempt.phase = *phase;
                        attempt.step_statuses.insert(*phase, StepStatus::Running);
                    });
                    self.emit(PlanEvent::PhaseChanged {
                        plan_id,
                        node_id,
                        phase: *phase,
                        status: StepStatus::Running,
                    });
                }
                ExecutorEvent::OutputChunk { phase, stream, chunk, .. } => {
                    self.log(&plan, node_id, &format!("[{phase}/{stream}] {chunk}\n"));
                }
                ExecutorEvent::PhaseEnded { phase, status, exit_code, error, .. } => {
                    self.log(
                        &plan,
                        node_id,
                        &format!(
                            "### {phase} {status}{}\n",
                            error.as_ref().map(|e| format!(": {e}")).unwrap_or_default()
                        ),
                    );
                    if let Some(state) = plan.exec.get_mut(&node_id) {
                        state.step_statuses.insert(*phase, *status);
                        if let Some(last) = &mut state.last_attempt {
                            last.ended_at_ms = Some(self.deps.clock.epoch_ms());
                            last.exit_code = *exit_code;
                        }
                        if *status == StepStatus::Failed {
                            state.error = error.clone();
                        }
                        state.version += 1;
                    }
                    // A failed phase records where a retry resumes, plus the
                    // author's operator hint.
                    if *status == StepStatus::Failed {
                        let on_failure =
                            plan.nodes.get(&node_id).and_then(|n| n.on_failure.clone());
                        if let (Some(on_failure), Some(state)) =
                            (on_failure, plan.exec.get_mut(&node_id))
                        {
                            if let Some(resume) = on_failure.resume_from_phase {
                                state.resume_from_phase = Some(resume);
                            }
                            if let Some(hint) = &on_failure.message {
                                let base = state.error.take().unwrap_or_default();
                                state.error = Some(format!("{base} ({hint})"));
                            }
                        }
                    }
                    update_attempt(&mut plan, node_id, |attempt| {
                        attempt.step_statuses.insert(*phase, *status);
                    });
                    self.emit(PlanEvent::PhaseChanged {
                        plan_id,
                        node_id,
                        phase: *phase,
                        status: *status,
                    });
                    persist = true;
                }
                ExecutorEvent::WorkSummary { summary, .. } => {
                    self.log(&plan, node_id, &format!("### summary: {summary}\n"));
                    update_attempt(&mut plan, node_id, |attempt| {
                        attempt.work_summary = Some(summary.clone());
                    });
                }
                ExecutorEvent::AttemptEnded {
                    status,
                    base_commit,
                    completed_commit,
                    merged_to_target,
                    ..
                } => {
                    self.running.remove(&node_id);
                    let now = self.deps.clock.epoch_ms();
                    let is_leaf = plan.nodes.get(&node_id).is_some_and(|n| n.is_leaf());
                    if let Some(state) = plan.exec.get_mut(&node_id) {
                        // Force-fail already moved the node to failed; the
                        // canceled attempt must not overwrite that.
                        if state.status.is_active() {
                            state.transition(*status);
                        }
                        state.ended_at_ms = Some(now);
                        if base_commit.is_some() {
                            state.base_commit = base_commit.clone();
                        }
                        if *status == NodeStatus::Succeeded {
                            state.completed_commit = completed_commit.clone();
                            state.resume_from_phase = None;
                            state.error = None;
                            if *merged_to_target && is_leaf {
                                state.merged_to_target = true;
                            }
                        }
                    }
                    let final_status = plan.status_of(&node_id).unwrap_or(*status);
                    update_attempt(&mut plan, node_id, |attempt| {
                        attempt.ended_at_ms = Some(now);
                        attempt.status = final_status;
                    });
                    self.log(&plan, node_id, &format!("### attempt {final_status}\n"));
                    tracing::info!(
                        plan = %plan_id,
                        node = %node_id,
                        status = %final_status,
                        "job attempt ended"
                    );
                    self.emit(PlanEvent::NodeStatusChanged {
                        plan_id,
                        node_id,
                        status: final_status,
                    });
                    persist = true;
                }
            }
        }
        if persist {
            self.persist(false);
        }
    }

    /// Append a line to the node's newest attempt log.
    fn log(&self, plan: &Plan, node_id: NodeId, line: &str) {
        let attempt = plan.exec.get(&node_id).map(|s| s.attempts).unwrap_or(1).max(1);
        if let Err(e) = self.store.append_log(plan.id, node_id, attempt, line.as_bytes()) {
            tracing::warn!(plan = %plan.id, node = %node_id, error = %e, "log append failed");
        }
    }

    /// Handle one mailbox command; returns true to shut the task down.
    async fn handle_command(&mut self, cmd: PlanCommand) -> bool {
        match cmd {
            PlanCommand::Pause(ack) => {
                {
                    let mut plan = self.shared.lock();
                    plan.is_paused = true;
                    plan.state_version += 1;
                }
                self.persist(false);
                self.emit(PlanEvent::PlanUpdated { plan_id: self.plan_id() });
                let _ = ack.send(Ok(()));
            }
            PlanCommand::Resume(ack) => {
                {
                    let mut plan = self.shared.lock();
                    plan.is_paused = false;
                    plan.state_version += 1;
                }
                self.persist(false);
                self.emit(PlanEvent::PlanUpdated { plan_id: self.plan_id() });
                let _ = ack.send(Ok(()));
                self.pump();
            }
            PlanCommand::Cancel(ack) => {
                {
                    let mut plan = self.shared.lock();
                    plan.canceled = true;
                    plan.state_version += 1;
                    let ids: Vec<NodeId> = plan.nodes.keys().copied().collect();
                    for node_id in ids {
                        if let Some(state) = plan.exec.get_mut(&node_id) {
                            if !state.status.is_terminal() && !state.status.is_active() {
                                state.transition(NodeStatus::Canceled);
                            }
                        }
                    }
                }
                for job in self.running.values() {
                    job.cancel.cancel();
                }
                self.pump();
                self.persist(false);
                self.emit(PlanEvent::PlanUpdated { plan_id: self.plan_id() });
                let _ = ack.send(Ok(()));
            }
            PlanCommand::Finalize { start_paused, ack } => {
                let result = {
                    let mut plan = self.shared.lock();
                    if plan.lifecycle != PlanLifecycle::Scaffolding {
                        Err(CommandError::state_transition(format!(
                            "finalize requires a scaffolding plan, lifecycle is {}",
                            plan.lifecycle
                        )))
                    } else {
                        plan.lifecycle = PlanLifecycle::Active;
                        plan.is_paused = start_paused;
                        plan.state_version += 1;
                        Ok(())
                    }
                };
                if result.is_ok() {
                    self.persist(true);
                    self.emit(PlanEvent::PlanUpdated { plan_id: self.plan_id() });
                    self.pump();
                }
                let _ = ack.send(result);
            }
            PlanCommand::AddJob { job, ack } => {
                let result = self.add_job(job);
                let _ = ack.send(result);
            }
            PlanCommand::RetryNode { cmd, ack } => {
                let result = self.retry_node(cmd).await;
                let _ = ack.send(result);
            }
            PlanCommand::RetryPlan { ack } => {
                let result = self.retry_plan();
                let _ = ack.send(result);
            }
            PlanCommand::ForceFail { node, ack } => {
                let result = self.force_fail(&node);
                let _ = ack.send(result);
            }
            PlanCommand::UpdateNode { cmd, ack } => {
                let result = self.update_node(cmd);
                let _ = ack.send(result);
            }
            PlanCommand::Reshape { ops, ack } => {
                let result = self.reshape(&ops);
                let _ = ack.send(result);
            }
            PlanCommand::CleanupWorktrees { ack } => {
                let result = self.cleanup_worktrees().await;
                let _ = ack.send(result);
            }
            PlanCommand::Shutdown { ack } => {
                let _ = ack.send(Ok(()));
                return true;
            }
        }
        false
    }

    fn add_job(&mut self, job: JobSpec) -> Result<(), CommandError> {
        let rebuilt = {
            let plan = self.shared.lock();
            if plan.lifecycle != PlanLifecycle::Scaffolding {
                return Err(CommandError::state_transition(format!(
                    "add_job requires a scaffolding plan, lifecycle is {}",
                    plan.lifecycle
                )));
            }
            repository::add_job(&plan, job)?
        };
        let specs: Vec<fm_core::Node> = rebuilt.nodes.values().cloned().collect();
        let plan_id = rebuilt.id;
        *self.shared.lock() = rebuilt;
        for node in &specs {
            if let Err(e) = self.store.save_node_spec(plan_id, node) {
                tracing::warn!(plan = %plan_id, error = %e, "failed to persist node spec");
            }
        }
        self.persist(true);
        self.emit(PlanEvent::PlanUpdated { plan_id });
        Ok(())
    }

    async fn retry_node(&mut self, cmd: RetryJob) -> Result<(), CommandError> {
        let (node_id, worktree, repo) = {
            let shared = self.shared.clone();
            let mut plan = shared.lock();
            let node_id = resolve(&plan, &cmd.node)?;
            let status = plan.status_of(&node_id).unwrap_or(NodeStatus::Pending);
            if !status.is_retryable() {
                return Err(CommandError::state_transition(format!(
                    "retry requires a failed or canceled job, {} is {status}",
                    cmd.node
                )));
            }
            replace_specs(
                &mut plan,
                node_id,
                cmd.new_work.clone(),
                cmd.new_prechecks.clone(),
                cmd.new_postchecks.clone(),
            );
            let worktree = plan
                .exec
                .get(&node_id)
                .and_then(|s| s.worktree_path.clone())
                .filter(|_| cmd.clear_worktree);
            reset_for_retry(&mut plan, node_id, cmd.clear_worktree);
            resume_plan_fields(&mut plan);
            (node_id, worktree, plan.definition.repo_path.clone())
        };

        if let Some(path) = worktree {
            if let Err(e) = self.deps.git.remove_worktree(&repo, &path, true).await {
                tracing::warn!(node = %node_id, error = %e, "worktree removal failed");
            }
            if path.exists() {
                let _ = std::fs::remove_dir_all(&path);
            }
        }

        self.persist(true);
        self.emit(PlanEvent::PlanUpdated { plan_id: self.plan_id() });
        self.pump();
        Ok(())
    }

    fn retry_plan(&mut self) -> Result<(), CommandError> {
        {
            let mut plan = self.shared.lock();
            let ids: Vec<NodeId> = plan
                .exec
                .iter()
                .filter(|(_, s)| s.status.is_retryable())
                .map(|(id, _)| *id)
                .collect();
            if ids.is_empty() {
                return Err(CommandError::state_transition(
                    "no failed or canceled jobs to retry",
                ));
            }
            for node_id in ids {
                reset_for_retry(&mut plan, node_id, false);
            }
            resume_plan_fields(&mut plan);
        }
        self.persist(false);
        self.emit(PlanEvent::PlanUpdated { plan_id: self.plan_id() });
        self.pump();
        Ok(())
    }

    fn force_fail(&mut self, node: &str) -> Result<(), CommandError> {
        let node_id = {
            let mut plan = self.shared.lock();
            let node_id = resolve(&plan, node)?;
            let status = plan.status_of(&node_id).unwrap_or(NodeStatus::Pending);
            if !status.is_active() {
                return Err(CommandError::state_transition(format!(
                    "force-fail requires a running or scheduled job, {node} is {status}"
                )));
            }
            if let Some(state) = plan.exec.get_mut(&node_id) {
                state.transition(NodeStatus::Failed);
                state.error = Some("force-failed".to_string());
                state.ended_at_ms = Some(self.deps.clock.epoch_ms());
            }
            node_id
        };
        if let Some(job) = self.running.get(&node_id) {
            job.cancel.cancel();
        }
        self.persist(false);
        self.emit(PlanEvent::NodeStatusChanged {
            plan_id: self.plan_id(),
            node_id,
            status: NodeStatus::Failed,
        });
        Ok(())
    }

    fn update_node(&mut self, cmd: UpdateJob) -> Result<(), CommandError> {
        let should_pump = {
            let mut plan = self.shared.lock();
            let node_id = resolve(&plan, &cmd.node)?;
            let status = plan.status_of(&node_id).unwrap_or(NodeStatus::Pending);
            if status.is_active() || status == NodeStatus::Succeeded {
                return Err(CommandError::state_transition(format!(
                    "cannot update job {} while {status}",
                    cmd.node
                )));
            }
            replace_specs(
                &mut plan,
                node_id,
                cmd.work.clone(),
                cmd.prechecks.clone(),
                cmd.postchecks.clone(),
            );
            if let Some(stage) = cmd.reset_to_stage {
                if let Some(state) = plan.exec.get_mut(&node_id) {
                    state.reset_steps_from(stage);
                }
            }
            plan.state_version += 1;
            !plan.is_paused
        };
        self.persist(true);
        self.emit(PlanEvent::PlanUpdated { plan_id: self.plan_id() });
        if should_pump {
            self.pump();
        }
        Ok(())
    }

    fn reshape(&mut self, ops: &[ReshapeOp]) -> Result<Vec<OpResult>, CommandError> {
        let (results, rebuilt) = {
            let plan = self.shared.lock();
            reshape::apply_reshape(&plan, ops)
        };
        let mut rebuilt = rebuilt?;
        let plan_id = rebuilt.id;
        // New nodes re-open a finished plan for scheduling.
        if !rebuilt.canceled && !rebuilt.all_terminal() {
            rebuilt.ended_at_ms = None;
            if rebuilt.lifecycle == PlanLifecycle::Finalized {
                rebuilt.lifecycle = PlanLifecycle::Active;
            }
        }
        {
            let mut plan = self.shared.lock();
            rebuilt.state_version = plan.state_version + 1;
            *plan = rebuilt;
        }
        self.persist(true);
        self.emit(PlanEvent::PlanUpdated { plan_id });
        self.pump();
        Ok(results)
    }

    async fn cleanup_worktrees(&mut self) -> Result<(), CommandError> {
        let (repo, paths) = {
            let plan = self.shared.lock();
            let paths: Vec<(NodeId, PathBuf)> = plan
                .exec
                .iter()
                .filter(|(node_id, s)| {
                    s.worktree_path.is_some() && !self.running.contains_key(*node_id)
                })
                .filter_map(|(id, s)| s.worktree_path.clone().map(|p| (*id, p)))
                .collect();
            (plan.definition.repo_path.clone(), paths)
        };
        for (node_id, path) in paths {
            if let Err(e) = self.deps.git.remove_worktree(&repo, &path, true).await {
                tracing::warn!(node = %node_id, error = %e, "worktree removal failed");
            }
            if path.exists() {
                let _ = std::fs::remove_dir_all(&path);
            }
            if let Some(state) = self.shared.lock().exec.get_mut(&node_id) {
                state.worktree_path = None;
                state.version += 1;
            }
        }
        self.persist(false);
        Ok(())
    }
}

/// Resolve a producer-or-node-id reference or fail with not-found.
fn resolve(plan: &Plan, node_ref: &str) -> Result<NodeId, CommandError> {
    plan.resolve_node(node_ref).ok_or_else(|| {
        CommandError::not_found(format!("no job {node_ref:?} in plan {}", plan.id))
    })
}

/// Overwrite a node's work/prechecks/postchecks specs, leaving fields that
/// are `None` unchanged.
fn replace_specs(
    plan: &mut Plan,
    node_id: NodeId,
    work: Option<WorkSpec>,
    prechecks: Option<WorkSpec>,
    postchecks: Option<WorkSpec>,
) {
    if let Some(node) = plan.nodes.get_mut(&node_id) {
        if let Some(work) = work {
            node.work = Some(work);
        }
        if let Some(prechecks) = prechecks {
            node.prechecks = Some(prechecks);
        }
        if let Some(postchecks) = postchecks {
            node.postchecks = Some(postchecks);
        }
    }
}

/// Reset a node for a fresh attempt, optionally forgetting its worktree.
fn reset_for_retry(plan: &mut Plan, node_id: NodeId, clear_worktree: bool) {
    let stage = {
        let state = plan.exec.entry(node_id).or_default();
        state.resume_from_phase.unwrap_or(Phase::Prechecks)
    };
    let state = plan.exec.entry(node_id).or_default();
    state.reset_steps_from(stage);
    state.transition(NodeStatus::Pending);
    state.error = None;
    state.ended_at_ms = None;
    state.merged_to_target = false;
    if clear_worktree {
        state.worktree_path = None;
        state.base_commit = None;
        state.resume_from_phase = None;
        state.step_statuses.clear();
    }
    // Downstream blocked nodes get their readiness recomputed.
    let dependents = transitive_dependents(plan, node_id);
    for dep in dependents {
        if let Some(s) = plan.exec.get_mut(&dep) {
            if s.status == NodeStatus::Blocked {
                s.transition(NodeStatus::Pending);
            }
        }
    }
}

/// Clear plan-terminal fields so the pump picks work back up.
fn resume_plan_fields(plan: &mut Plan) {
    plan.is_paused = false;
    plan.canceled = false;
    plan.ended_at_ms = None;
    if plan.lifecycle == PlanLifecycle::Finalized {
        plan.lifecycle = PlanLifecycle::Active;
    }
    plan.state_version += 1;
}

/// All nodes downstream of `root`.
fn transitive_dependents(plan: &Plan, root: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if let Some(node) = plan.nodes.get(&id) {
            for dep in &node.dependents {
                if !out.contains(dep) {
                    out.push(*dep);
                    stack.push(*dep);
                }
            }
        }
    }
    out
}

/// Mutate the newest attempt record for a node.
fn update_attempt(plan: &mut Plan, node_id: NodeId, f: impl FnOnce(&mut Attempt)) {
    if let Some(attempt) = plan.attempts.get_mut(&node_id).and_then(|a| a.last_mut()) {
        f(attempt);
    }
}
