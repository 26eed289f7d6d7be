// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The git gateway contract.

use crate::GitError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// One registered worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: Option<String>,
}

/// Result of a merge: either a commit landed or the conflicting paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub commit: Option<String>,
    pub conflicts: Vec<String>,
}

impl MergeOutcome {
    pub fn clean(commit: impl Into<String>) -> Self {
        Self { commit: Some(commit.into()), conflicts: Vec::new() }
    }

    pub fn conflicted(conflicts: Vec<String>) -> Self {
        Self { commit: None, conflicts }
    }

    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Thin contract over local git. All `repo` arguments are absolute paths.
///
/// Implementations perform no retries; callers decide.
#[async_trait]
pub trait GitGateway: Send + Sync + 'static {
    /// Currently checked-out branch, or None for a detached HEAD.
    async fn current_branch(&self, repo: &Path) -> Result<Option<String>, GitError>;

    /// Whether `name` is the repository's default branch. Consults the
    /// remote HEAD; falls back to well-known default names.
    async fn is_default_branch(&self, name: &str, repo: &Path) -> Result<bool, GitError>;

    async fn branch_exists(&self, name: &str, repo: &Path) -> Result<bool, GitError>;

    async fn create_branch(&self, name: &str, base: &str, repo: &Path) -> Result<(), GitError>;

    /// Resolve a ref to a commit hash.
    async fn resolve_ref(&self, reference: &str, repo: &Path) -> Result<String, GitError>;

    /// Point `ref_name` (e.g. `refs/heads/x`) at `commit`.
    async fn update_ref(&self, repo: &Path, ref_name: &str, commit: &str) -> Result<(), GitError>;

    async fn list_worktrees(&self, repo: &Path) -> Result<Vec<WorktreeInfo>, GitError>;

    /// Create a worktree at `path` on `branch` starting at `base_commit`,
    /// creating the branch or resetting a leftover one.
    async fn add_worktree(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
        base_commit: &str,
    ) -> Result<(), GitError>;

    async fn remove_worktree(&self, repo: &Path, path: &Path, force: bool)
        -> Result<(), GitError>;

    /// Squash-merge `source_ref` onto `target_branch` without touching any
    /// checkout. Returns the new target head, or the conflicting paths.
    async fn squash_merge(
        &self,
        repo: &Path,
        source_ref: &str,
        target_branch: &str,
        message: &str,
    ) -> Result<MergeOutcome, GitError>;

    /// Merge `source_branch` into the branch checked out at `worktree`
    /// (forward integration). Conflicts abort the merge and are reported.
    async fn merge_into_worktree(
        &self,
        worktree: &Path,
        source_branch: &str,
    ) -> Result<MergeOutcome, GitError>;

    /// Stage everything in `worktree`.
    async fn stage_all(&self, worktree: &Path) -> Result<(), GitError>;

    /// Whether the index at `worktree` has staged changes.
    async fn has_staged_changes(&self, worktree: &Path) -> Result<bool, GitError>;

    /// Commit the staged index; returns the new commit hash.
    async fn commit(&self, worktree: &Path, message: &str) -> Result<String, GitError>;

    /// HEAD commit of the checkout at `worktree`.
    async fn head_commit(&self, worktree: &Path) -> Result<String, GitError>;
}
