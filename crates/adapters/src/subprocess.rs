// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-group aware subprocess spawning.
//!
//! Children run in their own process group; cancellation signals the whole
//! group (SIGTERM, then SIGKILL after the grace window) so shells cannot
//! leave grandchildren behind.

use fm_core::{CommandError, ErrorKind};
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// Upper bound for one-shot helper commands.
pub const HELPER_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{label} timed out after {secs}s")]
    Timeout { label: String, secs: u64 },
    #[error("signal error: {0}")]
    Signal(String),
}

impl From<SpawnError> for CommandError {
    fn from(e: SpawnError) -> Self {
        CommandError::new(ErrorKind::Subprocess, e.to_string())
    }
}

/// Run a command to completion with a timeout. The child is killed if the
/// timeout fires or the future is dropped.
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    label: &str,
) -> Result<Output, SpawnError> {
    cmd.kill_on_drop(true).stdin(Stdio::null());
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(SpawnError::Timeout { label: label.to_string(), secs: timeout.as_secs() }),
    }
}

#[cfg(unix)]
fn signal_group(pgid: i32, signal: nix::sys::signal::Signal) -> Result<(), SpawnError> {
    nix::sys::signal::killpg(nix::unistd::Pid::from_raw(pgid), signal)
        .map_err(|e| SpawnError::Signal(format!("killpg({pgid}, {signal}): {e}")))
}

/// A child process running as the leader of its own process group.
pub struct ChildGroup {
    child: Child,
    pgid: Option<i32>,
}

impl ChildGroup {
    /// Spawn `cmd` with piped stdout/stderr in a fresh process group.
    pub fn spawn(mut cmd: Command) -> Result<Self, SpawnError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        let child = cmd.spawn()?;
        let pgid = child.id().map(|id| id as i32);
        Ok(Self { child, pgid })
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    pub async fn wait(&mut self) -> Result<ExitStatus, SpawnError> {
        Ok(self.child.wait().await?)
    }

    /// SIGTERM the group; escalate to SIGKILL if it outlives `grace`.
    pub async fn terminate(&mut self, grace: Duration) -> Result<(), SpawnError> {
        if !self.signal_term() {
            let _ = self.child.start_kill();
            let _ = self.child.wait().await;
            return Ok(());
        }
        if tokio::time::timeout(grace, self.child.wait()).await.is_err() {
            self.signal_kill();
            let _ = self.child.wait().await;
        }
        Ok(())
    }

    fn signal_term(&self) -> bool {
        #[cfg(unix)]
        {
            if let Some(pgid) = self.pgid {
                return signal_group(pgid, nix::sys::signal::Signal::SIGTERM).is_ok();
            }
        }
        false
    }

    fn signal_kill(&self) {
        #[cfg(unix)]
        {
            if let Some(pgid) = self.pgid {
                let _ = signal_group(pgid, nix::sys::signal::Signal::SIGKILL);
            }
        }
    }
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
