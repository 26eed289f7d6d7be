// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work adapter spawning local subprocesses.

use crate::subprocess::{ChildGroup, SpawnError};
use crate::work::{WorkAdapter, WorkEvent, WorkOutcome, WorkRequest};
use async_trait::async_trait;
use fm_core::{AgentWork, WorkSpec};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Runs shell, process, and agent specs as local subprocesses.
#[derive(Debug, Clone)]
pub struct LocalWorkAdapter {
    /// Agent CLI executable name or path.
    agent_command: String,
    /// SIGTERM-to-SIGKILL window on cancel.
    grace: Duration,
}

impl LocalWorkAdapter {
    pub fn new(agent_command: impl Into<String>, grace: Duration) -> Self {
        Self { agent_command: agent_command.into(), grace }
    }

    fn command_for(&self, request: &WorkRequest) -> Command {
        let mut cmd = match &request.spec {
            WorkSpec::Shell { command, error_action } => {
                let (program, args) = shell_invocation(command, error_action.as_deref());
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
            WorkSpec::Process { executable, args } => {
                let mut cmd = Command::new(executable);
                cmd.args(args);
                cmd
            }
            WorkSpec::Agent(agent) => {
                let mut cmd = Command::new(&self.agent_command);
                cmd.args(agent_args(agent));
                for (key, value) in &agent.env {
                    cmd.env(key, value);
                }
                cmd
            }
        };
        cmd.current_dir(&request.cwd);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Program and argv for a shell spec. An `error_action` selects PowerShell;
/// otherwise the platform shell runs the command line.
pub(crate) fn shell_invocation(
    command: &str,
    error_action: Option<&str>,
) -> (String, Vec<String>) {
    if let Some(action) = error_action {
        return (
            "powershell".to_string(),
            vec![
                "-NoProfile".to_string(),
                "-Command".to_string(),
                format!("$ErrorActionPreference='{action}'; {command}"),
            ],
        );
    }
    if cfg!(windows) {
        ("cmd".to_string(), vec!["/C".to_string(), command.to_string()])
    } else {
        ("sh".to_string(), vec!["-c".to_string(), command.to_string()])
    }
}

/// Argv for the agent CLI, including the file/URL allow-list.
pub(crate) fn agent_args(agent: &AgentWork) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--instructions".to_string(),
        agent.instructions.clone(),
        "--max-turns".to_string(),
        agent.max_turns.to_string(),
    ];
    if let Some(model) = &agent.model {
        args.push("--model".to_string());
        args.push(model.clone());
    }
    if let Some(tier) = agent.model_tier {
        args.push("--model-tier".to_string());
        args.push(tier.to_string());
    }
    if let Some(session) = &agent.resume_session {
        args.push("--resume".to_string());
        args.push(session.clone());
    }
    for folder in &agent.allowed_folders {
        args.push("--allow-folder".to_string());
        args.push(folder.clone());
    }
    for url in &agent.allowed_urls {
        args.push("--allow-url".to_string());
        args.push(url.clone());
    }
    args
}

/// Forward lines from `reader` as events; remembers the last non-empty line.
fn spawn_line_reader<R>(
    reader: R,
    events: mpsc::Sender<WorkEvent>,
    make_event: fn(String) -> WorkEvent,
    last_line: Option<Arc<Mutex<Option<String>>>>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(last) = &last_line {
                if !line.trim().is_empty() {
                    *last.lock() = Some(line.trim().to_string());
                }
            }
            let _ = events.send(make_event(line)).await;
        }
    })
}

#[async_trait]
impl WorkAdapter for LocalWorkAdapter {
    async fn run(
        &self,
        request: WorkRequest,
        events: mpsc::Sender<WorkEvent>,
        cancel: CancellationToken,
    ) -> Result<WorkOutcome, SpawnError> {
        let is_agent = matches!(request.spec, WorkSpec::Agent(_));
        tracing::debug!(
            plan = %request.plan_id,
            node = %request.producer_id,
            phase = %request.phase,
            spec = %request.spec.describe(),
            "spawning work subprocess"
        );

        let mut group = ChildGroup::spawn(self.command_for(&request))?;
        let last_stdout = is_agent.then(|| Arc::new(Mutex::new(None)));

        let stdout_task = group.take_stdout().map(|stdout| {
            spawn_line_reader(stdout, events.clone(), WorkEvent::Stdout, last_stdout.clone())
        });
        let stderr_task = group
            .take_stderr()
            .map(|stderr| spawn_line_reader(stderr, events.clone(), WorkEvent::Stderr, None));

        let status = tokio::select! {
            status = group.wait() => status?,
            _ = cancel.cancelled() => {
                group.terminate(self.grace).await?;
                if let Some(task) = stdout_task {
                    let _ = task.await;
                }
                if let Some(task) = stderr_task {
                    let _ = task.await;
                }
                return Ok(WorkOutcome { exit_code: None, summary: None, canceled: true });
            }
        };

        // Drain remaining buffered output before reporting.
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        let summary = last_stdout.and_then(|last| last.lock().take());
        Ok(WorkOutcome { exit_code: status.code(), summary, canceled: false })
    }
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
