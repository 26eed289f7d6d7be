// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work specifications: what a job phase actually runs.
//!
//! A work spec is exactly one of shell / process / agent. In submitted
//! definitions a bare string is accepted as shorthand for a shell spec;
//! serialization always emits the tagged form.

use crate::error::CommandError;
use crate::phase::Phase;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const MAX_TURNS_MIN: u32 = 1;
pub const MAX_TURNS_MAX: u32 = 100;
pub const MAX_ALLOWED_FOLDERS: usize = 20;
pub const MAX_FOLDER_LEN: usize = 500;
pub const MAX_ALLOWED_URLS: usize = 50;

fn default_max_turns() -> u32 {
    20
}

/// Model capability tier for agent work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Fast,
    Standard,
    Premium,
}

crate::simple_display! {
    ModelTier {
        Fast => "fast",
        Standard => "standard",
        Premium => "premium",
    }
}

/// Agent CLI invocation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentWork {
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_tier: Option<ModelTier>,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Session ID to resume instead of starting fresh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_session: Option<String>,
    /// Folders the agent may touch (allow-list).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_folders: Vec<String>,
    /// URLs the agent may fetch (allow-list).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

/// What to do when a phase of this job fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnFailure {
    /// Suppress the single auto-heal retry even when the job enables it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_auto_heal: bool,
    /// Operator-facing hint recorded alongside the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Phase a subsequent retry should resume from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_from_phase: Option<Phase>,
}

/// A unit of executable work. Exactly one of shell / process / agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", from = "WorkSpecRepr")]
pub enum WorkSpec {
    /// Command line run by the platform shell (`sh -c` / `cmd /C`).
    Shell {
        command: String,
        /// PowerShell `$ErrorActionPreference`; presence selects the
        /// PowerShell host instead of the platform default shell.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_action: Option<String>,
    },
    /// Executable plus argv, no shell interpretation.
    Process {
        executable: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
    },
    /// Agent CLI subprocess.
    Agent(AgentWork),
}

/// Accepts either a bare command string or the tagged form.
#[derive(Deserialize)]
#[serde(untagged)]
enum WorkSpecRepr {
    Inline(String),
    Tagged(TaggedWork),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TaggedWork {
    Shell {
        command: String,
        #[serde(default)]
        error_action: Option<String>,
    },
    Process {
        executable: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Agent(AgentWork),
}

impl From<WorkSpecRepr> for WorkSpec {
    fn from(repr: WorkSpecRepr) -> Self {
        match repr {
            WorkSpecRepr::Inline(command) => WorkSpec::Shell { command, error_action: None },
            WorkSpecRepr::Tagged(TaggedWork::Shell { command, error_action }) => {
                WorkSpec::Shell { command, error_action }
            }
            WorkSpecRepr::Tagged(TaggedWork::Process { executable, args }) => {
                WorkSpec::Process { executable, args }
            }
            WorkSpecRepr::Tagged(TaggedWork::Agent(agent)) => WorkSpec::Agent(agent),
        }
    }
}

impl WorkSpec {
    pub fn shell(command: impl Into<String>) -> Self {
        WorkSpec::Shell { command: command.into(), error_action: None }
    }

    /// Short human label for logs and attempt records.
    pub fn describe(&self) -> String {
        match self {
            WorkSpec::Shell { command, .. } => format!("shell: {}", crate::id::short(command, 80)),
            WorkSpec::Process { executable, .. } => format!("process: {executable}"),
            WorkSpec::Agent(agent) => {
                format!("agent: {}", crate::id::short(&agent.instructions, 80))
            }
        }
    }

    /// Validate submission-time constraints. `role` names the field in error
    /// messages ("work", "prechecks", "postchecks").
    pub fn validate(&self, role: &str) -> Result<(), CommandError> {
        match self {
            WorkSpec::Shell { command, error_action } => {
                if command.trim().is_empty() {
                    return Err(CommandError::validation(format!("{role}: empty shell command")));
                }
                // PowerShell merges streams with 2>&1 in a way that masks the
                // real exit code, so the combination is rejected outright.
                if error_action.is_some() && command.contains("2>&1") {
                    return Err(CommandError::validation(format!(
                        "{role}: PowerShell commands must not contain 2>&1"
                    )));
                }
                Ok(())
            }
            WorkSpec::Process { executable, .. } => {
                if executable.trim().is_empty() {
                    return Err(CommandError::validation(format!("{role}: empty executable")));
                }
                Ok(())
            }
            WorkSpec::Agent(agent) => agent.validate(role),
        }
    }
}

impl AgentWork {
    pub fn validate(&self, role: &str) -> Result<(), CommandError> {
        if self.instructions.trim().is_empty() {
            return Err(CommandError::validation(format!("{role}: empty agent instructions")));
        }
        if !(MAX_TURNS_MIN..=MAX_TURNS_MAX).contains(&self.max_turns) {
            return Err(CommandError::validation(format!(
                "{role}: max_turns must be in {MAX_TURNS_MIN}..={MAX_TURNS_MAX}, got {}",
                self.max_turns
            )));
        }
        if self.allowed_folders.len() > MAX_ALLOWED_FOLDERS {
            return Err(CommandError::validation(format!(
                "{role}: at most {MAX_ALLOWED_FOLDERS} allowed_folders, got {}",
                self.allowed_folders.len()
            )));
        }
        if let Some(f) = self.allowed_folders.iter().find(|f| f.len() > MAX_FOLDER_LEN) {
            return Err(CommandError::validation(format!(
                "{role}: allowed folder exceeds {MAX_FOLDER_LEN} chars: {}",
                crate::id::short(f, 60)
            )));
        }
        if self.allowed_urls.len() > MAX_ALLOWED_URLS {
            return Err(CommandError::validation(format!(
                "{role}: at most {MAX_ALLOWED_URLS} allowed_urls, got {}",
                self.allowed_urls.len()
            )));
        }
        Ok(())
    }
}

impl OnFailure {
    pub fn validate(&self) -> Result<(), CommandError> {
        if let Some(phase) = self.resume_from_phase {
            if !phase.is_resumable() {
                return Err(CommandError::validation(format!(
                    "on_failure.resume_from_phase may not be {phase}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "work_tests.rs"]
mod tests;
