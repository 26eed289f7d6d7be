// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scriptable work adapter for tests.

use crate::subprocess::SpawnError;
use crate::work::{WorkAdapter, WorkEvent, WorkOutcome, WorkRequest};
use async_trait::async_trait;
use fm_core::Phase;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One scripted run outcome.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    pub exit_code: i32,
    pub delay: Duration,
    pub stdout: Vec<String>,
    pub summary: Option<String>,
}

impl ScriptedRun {
    pub fn ok() -> Self {
        Self { exit_code: 0, delay: Duration::ZERO, stdout: Vec::new(), summary: None }
    }

    pub fn failing(exit_code: i32) -> Self {
        Self { exit_code, ..Self::ok() }
    }

    pub fn sleeping(delay: Duration) -> Self {
        Self { delay, ..Self::ok() }
    }

    pub fn with_stdout(mut self, lines: &[&str]) -> Self {
        self.stdout = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = Some(summary.to_string());
        self
    }
}

/// A recorded call, for assertions.
#[derive(Debug, Clone)]
pub struct WorkCall {
    pub producer_id: String,
    pub phase: Phase,
    pub spec_label: String,
}

#[derive(Default)]
struct State {
    /// Scripts consumed per (producer_id, phase); falls back to `default`.
    scripts: HashMap<(String, Phase), VecDeque<ScriptedRun>>,
    default: Option<ScriptedRun>,
    calls: Vec<WorkCall>,
}

/// In-memory [`WorkAdapter`] with scripted outcomes and a call log.
///
/// Concurrency is tracked so tests can assert the parallelism cap held.
#[derive(Clone, Default)]
pub struct FakeWorkAdapter {
    state: Arc<Mutex<State>>,
    running: Arc<Mutex<u32>>,
    max_running: Arc<Mutex<u32>>,
}

impl FakeWorkAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next run for `producer_id`'s given phase.
    pub fn script(&self, producer_id: &str, phase: Phase, run: ScriptedRun) {
        self.state
            .lock()
            .scripts
            .entry((producer_id.to_string(), phase))
            .or_default()
            .push_back(run);
    }

    /// Outcome used when no per-node script matches (defaults to success).
    pub fn set_default(&self, run: ScriptedRun) {
        self.state.lock().default = Some(run);
    }

    pub fn calls(&self) -> Vec<WorkCall> {
        self.state.lock().calls.clone()
    }

    pub fn calls_for(&self, producer_id: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| c.producer_id == producer_id).count()
    }

    /// High-water mark of concurrently running work.
    pub fn max_concurrency(&self) -> u32 {
        *self.max_running.lock()
    }
}

#[async_trait]
impl WorkAdapter for FakeWorkAdapter {
    async fn run(
        &self,
        request: WorkRequest,
        events: mpsc::Sender<WorkEvent>,
        cancel: CancellationToken,
    ) -> Result<WorkOutcome, SpawnError> {
        let run = {
            let mut state = self.state.lock();
            state.calls.push(WorkCall {
                producer_id: request.producer_id.clone(),
                phase: request.phase,
                spec_label: request.spec.describe(),
            });
            state
                .scripts
                .get_mut(&(request.producer_id.clone(), request.phase))
                .and_then(VecDeque::pop_front)
                .or_else(|| state.default.clone())
                .unwrap_or_else(ScriptedRun::ok)
        };

        {
            let mut running = self.running.lock();
            *running += 1;
            let mut max = self.max_running.lock();
            *max = (*max).max(*running);
        }
        // Decrement on every exit path.
        let _guard = RunningGuard(self.running.clone());

        for line in &run.stdout {
            let _ = events.send(WorkEvent::Stdout(line.clone())).await;
        }

        if !run.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(run.delay) => {}
                _ = cancel.cancelled() => {
                    return Ok(WorkOutcome { exit_code: None, summary: None, canceled: true });
                }
            }
        }
        if cancel.is_cancelled() {
            return Ok(WorkOutcome { exit_code: None, summary: None, canceled: true });
        }

        Ok(WorkOutcome {
            exit_code: Some(run.exit_code),
            summary: run.summary,
            canceled: false,
        })
    }
}

struct RunningGuard(Arc<Mutex<u32>>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        *self.0.lock() -= 1;
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
