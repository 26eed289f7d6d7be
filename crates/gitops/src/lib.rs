// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fm-gitops: thin gateway over local git.
//!
//! The gateway performs no retries and takes no policy decisions; callers
//! classify and react. Every operation fails with a typed [`GitError`].

mod cli;
mod gateway;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use cli::CliGit;
pub use gateway::{GitGateway, MergeOutcome, WorktreeInfo};

use fm_core::{CommandError, ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a git failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitErrorKind {
    NotFound,
    Conflict,
    /// Working tree has uncommitted changes where a clean tree was required
    Dirty,
    /// Refused to touch a protected (default) branch
    Protected,
    /// Network / remote failure
    Transport,
    Io,
}

fm_core::simple_display! {
    GitErrorKind {
        NotFound => "not_found",
        Conflict => "conflict",
        Dirty => "dirty",
        Protected => "protected",
        Transport => "transport",
        Io => "io",
    }
}

#[derive(Debug, Clone, Error)]
#[error("git {kind}: {message}")]
pub struct GitError {
    pub kind: GitErrorKind,
    pub message: String,
}

impl GitError {
    pub fn new(kind: GitErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(GitErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(GitErrorKind::Conflict, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(GitErrorKind::Io, message)
    }

    /// Transient failures are candidates for a single auto-heal retry.
    pub fn is_transient(&self) -> bool {
        self.kind == GitErrorKind::Transport || self.message.contains("index.lock")
    }
}

impl From<GitError> for CommandError {
    fn from(e: GitError) -> Self {
        CommandError::new(ErrorKind::Git, e.to_string())
    }
}
