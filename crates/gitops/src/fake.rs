// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scriptable in-memory git gateway for tests.
//!
//! Models just enough of a repository (branches, commits as opaque counters,
//! worktrees, merges) for the executor and branch-resolution paths to be
//! exercised without a real git binary. Worktree directories are created on
//! the real filesystem so path-level logic keeps working.

use crate::gateway::{GitGateway, MergeOutcome, WorktreeInfo};
use crate::{GitError, GitErrorKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct FakeWorktree {
    branch: String,
    head: String,
    /// Uncommitted changes present (made visible to `stage_all`).
    dirty: bool,
    staged: bool,
}

#[derive(Default)]
struct State {
    default_branch: String,
    current: Option<String>,
    branches: BTreeMap<String, String>,
    commit_seq: u64,
    worktrees: BTreeMap<PathBuf, FakeWorktree>,
    /// Scripted conflicts for upcoming squash merges, keyed by source ref.
    squash_conflicts: HashMap<String, VecDeque<Vec<String>>>,
    /// One-shot scripted failures, keyed by operation name.
    fail_next: HashMap<&'static str, GitError>,
}

impl State {
    fn next_commit(&mut self) -> String {
        self.commit_seq += 1;
        format!("c{}", self.commit_seq)
    }

    fn take_failure(&mut self, op: &'static str) -> Result<(), GitError> {
        match self.fail_next.remove(op) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn resolve(&self, reference: &str) -> Result<String, GitError> {
        if let Some(commit) = self.branches.get(reference) {
            return Ok(commit.clone());
        }
        if reference == "HEAD" {
            if let Some(current) = &self.current {
                if let Some(commit) = self.branches.get(current) {
                    return Ok(commit.clone());
                }
            }
        }
        // Opaque commit ids resolve to themselves.
        if reference.starts_with('c') && reference[1..].chars().all(|c| c.is_ascii_digit()) {
            return Ok(reference.to_string());
        }
        Err(GitError::not_found(format!("cannot resolve ref {reference}")))
    }
}

/// In-memory [`GitGateway`] with scripting hooks.
#[derive(Clone)]
pub struct FakeGit {
    inner: Arc<Mutex<State>>,
}

impl Default for FakeGit {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGit {
    /// A repo with `main` as the default and current branch, one commit in.
    pub fn new() -> Self {
        let mut state = State {
            default_branch: "main".to_string(),
            current: Some("main".to_string()),
            ..State::default()
        };
        let head = state.next_commit();
        state.branches.insert("main".to_string(), head);
        Self { inner: Arc::new(Mutex::new(state)) }
    }

    // --- scripting -------------------------------------------------------

    pub fn set_default_branch(&self, name: &str) {
        let mut state = self.inner.lock();
        if !state.branches.contains_key(name) {
            let commit = state.next_commit();
            state.branches.insert(name.to_string(), commit);
        }
        state.default_branch = name.to_string();
    }

    pub fn set_current_branch(&self, name: Option<&str>) {
        let mut state = self.inner.lock();
        if let Some(name) = name {
            if !state.branches.contains_key(name) {
                let commit = state.next_commit();
                state.branches.insert(name.to_string(), commit);
            }
        }
        state.current = name.map(String::from);
    }

    /// Create (or move) a branch to a fresh commit; returns the commit.
    pub fn put_branch(&self, name: &str) -> String {
        let mut state = self.inner.lock();
        let commit = state.next_commit();
        state.branches.insert(name.to_string(), commit.clone());
        commit
    }

    /// Mark the worktree as carrying uncommitted changes.
    pub fn set_worktree_dirty(&self, path: &Path) {
        if let Some(wt) = self.inner.lock().worktrees.get_mut(path) {
            wt.dirty = true;
        }
    }

    /// Script a conflict for the next squash merge from `source_ref`.
    pub fn script_squash_conflict(&self, source_ref: &str, files: Vec<String>) {
        self.inner
            .lock()
            .squash_conflicts
            .entry(source_ref.to_string())
            .or_default()
            .push_back(files);
    }

    /// Script a one-shot failure for the named operation.
    pub fn fail_next(&self, op: &'static str, error: GitError) {
        self.inner.lock().fail_next.insert(op, error);
    }

    // --- inspection ------------------------------------------------------

    pub fn branch_head(&self, name: &str) -> Option<String> {
        self.inner.lock().branches.get(name).cloned()
    }

    pub fn has_branch(&self, name: &str) -> bool {
        self.inner.lock().branches.contains_key(name)
    }

    pub fn worktree_branch(&self, path: &Path) -> Option<String> {
        self.inner.lock().worktrees.get(path).map(|w| w.branch.clone())
    }

    pub fn worktree_count(&self) -> usize {
        self.inner.lock().worktrees.len()
    }
}

#[async_trait]
impl GitGateway for FakeGit {
    async fn current_branch(&self, _repo: &Path) -> Result<Option<String>, GitError> {
        let mut state = self.inner.lock();
        state.take_failure("current_branch")?;
        Ok(state.current.clone())
    }

    async fn is_default_branch(&self, name: &str, _repo: &Path) -> Result<bool, GitError> {
        let state = self.inner.lock();
        Ok(name == state.default_branch)
    }

    async fn branch_exists(&self, name: &str, _repo: &Path) -> Result<bool, GitError> {
        Ok(self.inner.lock().branches.contains_key(name))
    }

    async fn create_branch(&self, name: &str, base: &str, _repo: &Path) -> Result<(), GitError> {
        let mut state = self.inner.lock();
        state.take_failure("create_branch")?;
        let commit = state.resolve(base)?;
        state.branches.insert(name.to_string(), commit);
        Ok(())
    }

    async fn resolve_ref(&self, reference: &str, _repo: &Path) -> Result<String, GitError> {
        let mut state = self.inner.lock();
        state.take_failure("resolve_ref")?;
        state.resolve(reference)
    }

    async fn update_ref(
        &self,
        _repo: &Path,
        ref_name: &str,
        commit: &str,
    ) -> Result<(), GitError> {
        let mut state = self.inner.lock();
        let name = ref_name.strip_prefix("refs/heads/").unwrap_or(ref_name);
        state.branches.insert(name.to_string(), commit.to_string());
        Ok(())
    }

    async fn list_worktrees(&self, _repo: &Path) -> Result<Vec<WorktreeInfo>, GitError> {
        let state = self.inner.lock();
        Ok(state
            .worktrees
            .iter()
            .map(|(path, wt)| WorktreeInfo {
                path: path.clone(),
                branch: Some(wt.branch.clone()),
            })
            .collect())
    }

    async fn add_worktree(
        &self,
        _repo: &Path,
        path: &Path,
        branch: &str,
        base_commit: &str,
    ) -> Result<(), GitError> {
        {
            let mut state = self.inner.lock();
            state.take_failure("add_worktree")?;
            if state.worktrees.contains_key(path) {
                return Err(GitError::io(format!("worktree exists: {}", path.display())));
            }
            let head = state.resolve(base_commit)?;
            state.branches.insert(branch.to_string(), head.clone());
            state.worktrees.insert(
                path.to_path_buf(),
                FakeWorktree {
                    branch: branch.to_string(),
                    head,
                    dirty: false,
                    staged: false,
                },
            );
        }
        std::fs::create_dir_all(path).map_err(|e| GitError::io(e.to_string()))?;
        Ok(())
    }

    async fn remove_worktree(
        &self,
        _repo: &Path,
        path: &Path,
        force: bool,
    ) -> Result<(), GitError> {
        {
            let mut state = self.inner.lock();
            state.take_failure("remove_worktree")?;
            match state.worktrees.get(path) {
                Some(wt) if wt.dirty && !force => {
                    return Err(GitError::new(
                        GitErrorKind::Dirty,
                        format!("{} contains modified files", path.display()),
                    ));
                }
                Some(_) => {
                    state.worktrees.remove(path);
                }
                None => {
                    return Err(GitError::not_found(format!(
                        "{} is not a working tree",
                        path.display()
                    )));
                }
            }
        }
        let _ = std::fs::remove_dir_all(path);
        Ok(())
    }

    async fn squash_merge(
        &self,
        _repo: &Path,
        source_ref: &str,
        target_branch: &str,
        _message: &str,
    ) -> Result<MergeOutcome, GitError> {
        let mut state = self.inner.lock();
        state.take_failure("squash_merge")?;
        if let Some(queue) = state.squash_conflicts.get_mut(source_ref) {
            if let Some(files) = queue.pop_front() {
                return Ok(MergeOutcome::conflicted(files));
            }
        }
        state.resolve(source_ref)?;
        if !state.branches.contains_key(target_branch) {
            return Err(GitError::not_found(format!("no branch {target_branch}")));
        }
        let commit = state.next_commit();
        state.branches.insert(target_branch.to_string(), commit.clone());
        Ok(MergeOutcome::clean(commit))
    }

    async fn merge_into_worktree(
        &self,
        worktree: &Path,
        source_branch: &str,
    ) -> Result<MergeOutcome, GitError> {
        let mut state = self.inner.lock();
        state.take_failure("merge_into_worktree")?;
        let source_head = state.resolve(source_branch)?;
        let Some(wt) = state.worktrees.get(worktree) else {
            return Err(GitError::not_found(format!(
                "{} is not a working tree",
                worktree.display()
            )));
        };
        if wt.head == source_head {
            return Ok(MergeOutcome::clean(source_head));
        }
        let branch = wt.branch.clone();
        let merged = state.next_commit();
        if let Some(wt) = state.worktrees.get_mut(worktree) {
            wt.head = merged.clone();
        }
        state.branches.insert(branch, merged.clone());
        Ok(MergeOutcome::clean(merged))
    }

    async fn stage_all(&self, worktree: &Path) -> Result<(), GitError> {
        let mut state = self.inner.lock();
        match state.worktrees.get_mut(worktree) {
            Some(wt) => {
                if wt.dirty {
                    wt.staged = true;
                }
                Ok(())
            }
            None => Err(GitError::not_found(format!(
                "{} is not a working tree",
                worktree.display()
            ))),
        }
    }

    async fn has_staged_changes(&self, worktree: &Path) -> Result<bool, GitError> {
        let state = self.inner.lock();
        match state.worktrees.get(worktree) {
            Some(wt) => Ok(wt.staged),
            None => Err(GitError::not_found(format!(
                "{} is not a working tree",
                worktree.display()
            ))),
        }
    }

    async fn commit(&self, worktree: &Path, _message: &str) -> Result<String, GitError> {
        let mut state = self.inner.lock();
        state.take_failure("commit")?;
        let commit = state.next_commit();
        let branch = match state.worktrees.get_mut(worktree) {
            Some(wt) => {
                wt.head = commit.clone();
                wt.dirty = false;
                wt.staged = false;
                wt.branch.clone()
            }
            None => {
                return Err(GitError::not_found(format!(
                    "{} is not a working tree",
                    worktree.display()
                )))
            }
        };
        state.branches.insert(branch, commit.clone());
        Ok(commit)
    }

    async fn head_commit(&self, worktree: &Path) -> Result<String, GitError> {
        let state = self.inner.lock();
        match state.worktrees.get(worktree) {
            Some(wt) => Ok(wt.head.clone()),
            None => Err(GitError::not_found(format!(
                "{} is not a working tree",
                worktree.display()
            ))),
        }
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
