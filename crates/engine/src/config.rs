// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runner configuration.

use fm_core::CommandError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_storage_root() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("foreman")
}

fn default_worktree_root() -> String {
    ".worktrees".to_string()
}

fn default_branch_prefix() -> String {
    "copilot_plan".to_string()
}

fn default_parallel_cap() -> u32 {
    4
}

fn default_grace_ms() -> u64 {
    5_000
}

fn default_tick_ms() -> u64 {
    1_000
}

fn default_cleanup_delay_ms() -> u64 {
    2_000
}

fn default_symlink_dirs() -> Vec<String> {
    vec!["node_modules".to_string(), ".venv".to_string()]
}

fn default_agent_command() -> String {
    "copilot".to_string()
}

fn default_true() -> bool {
    true
}

/// Tunables for the plan runner, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Root directory for plan persistence.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    /// Per-repo directory holding job worktrees.
    #[serde(default = "default_worktree_root")]
    pub worktree_root: String,
    /// Prefix for generated target branches.
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    /// Cap applied when a plan sets `max_parallel = 0`.
    #[serde(default = "default_parallel_cap")]
    pub parallel_cap: u32,
    /// SIGTERM-to-SIGKILL window on cancel.
    #[serde(default = "default_grace_ms")]
    pub grace_window_ms: u64,
    /// Pump tick interval.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Delay before the startup orphaned-worktree scan.
    #[serde(default = "default_cleanup_delay_ms")]
    pub cleanup_delay_ms: u64,
    /// Directories symlinked from the main repo into fresh worktrees.
    #[serde(default = "default_symlink_dirs")]
    pub symlink_dirs: Vec<String>,
    /// Agent CLI executable.
    #[serde(default = "default_agent_command")]
    pub agent_command: String,
    /// Remove a plan's worktrees when the plan is deleted.
    #[serde(default = "default_true")]
    pub remove_worktrees_on_delete: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            worktree_root: default_worktree_root(),
            branch_prefix: default_branch_prefix(),
            parallel_cap: default_parallel_cap(),
            grace_window_ms: default_grace_ms(),
            tick_ms: default_tick_ms(),
            cleanup_delay_ms: default_cleanup_delay_ms(),
            symlink_dirs: default_symlink_dirs(),
            agent_command: default_agent_command(),
            remove_worktrees_on_delete: default_true(),
        }
    }
}

impl RunnerConfig {
    pub fn load(path: &Path) -> Result<Self, CommandError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CommandError::io(format!("read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| CommandError::validation(format!("parse {}: {e}", path.display())))
    }

    pub fn grace_window(&self) -> Duration {
        Duration::from_millis(self.grace_window_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_delay_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
