// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Git gateway backed by the `git` CLI.

use crate::gateway::{GitGateway, MergeOutcome, WorktreeInfo};
use crate::{GitError, GitErrorKind};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

/// Upper bound for any single git invocation.
const GIT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

const DEFAULT_BRANCH_FALLBACKS: [&str; 3] = ["main", "master", "develop"];

/// CLI-backed [`GitGateway`].
#[derive(Debug, Clone, Default)]
pub struct CliGit;

impl CliGit {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, dir: &Path, args: &[&str]) -> Result<Output, GitError> {
        let mut cmd = tokio::process::Command::new("git");
        cmd.arg("-C")
            .arg(dir)
            .args(args)
            // A stale inherited GIT_DIR would redirect every command.
            .env_remove("GIT_DIR")
            .env_remove("GIT_WORK_TREE")
            .stdin(std::process::Stdio::null());
        let label = args.first().copied().unwrap_or("git");
        tracing::debug!(dir = %dir.display(), cmd = label, "git invocation");
        match tokio::time::timeout(GIT_COMMAND_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(GitError::io(format!("git {label}: {e}"))),
            Err(_) => Err(GitError::io(format!(
                "git {label} timed out after {}s",
                GIT_COMMAND_TIMEOUT.as_secs()
            ))),
        }
    }

    /// Run and require success; failures are classified from stderr.
    async fn run_ok(&self, dir: &Path, args: &[&str]) -> Result<Output, GitError> {
        let output = self.run(dir, args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let label = args.first().copied().unwrap_or("git");
            Err(GitError::new(
                classify_stderr(&stderr),
                format!("git {label}: {}", stderr.trim()),
            ))
        }
    }
}

/// Map git stderr chatter onto the error taxonomy.
fn classify_stderr(stderr: &str) -> GitErrorKind {
    let s = stderr.to_ascii_lowercase();
    if s.contains("unknown revision")
        || s.contains("not a valid ref")
        || s.contains("no such ref")
        || s.contains("does not exist")
        || s.contains("is not a working tree")
    {
        GitErrorKind::NotFound
    } else if s.contains("conflict") {
        GitErrorKind::Conflict
    } else if s.contains("uncommitted changes")
        || s.contains("contains modified or untracked files")
        || s.contains("your local changes")
    {
        GitErrorKind::Dirty
    } else if s.contains("could not read from remote")
        || s.contains("unable to access")
        || s.contains("connection")
    {
        GitErrorKind::Transport
    } else {
        GitErrorKind::Io
    }
}

fn stdout_line(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Parse `git worktree list --porcelain` output.
fn parse_worktree_list(stdout: &str) -> Vec<WorktreeInfo> {
    let mut out = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut branch: Option<String> = None;
    for line in stdout.lines().chain(std::iter::once("")) {
        if line.is_empty() {
            if let Some(p) = path.take() {
                out.push(WorktreeInfo { path: p, branch: branch.take() });
            }
            continue;
        }
        if let Some(p) = line.strip_prefix("worktree ") {
            path = Some(PathBuf::from(p));
        } else if let Some(b) = line.strip_prefix("branch ") {
            branch = Some(b.strip_prefix("refs/heads/").unwrap_or(b).to_string());
        }
        // "bare", "detached", "HEAD <oid>" entries carry no branch
    }
    out
}

#[async_trait]
impl GitGateway for CliGit {
    async fn current_branch(&self, repo: &Path) -> Result<Option<String>, GitError> {
        let output = self.run(repo, &["symbolic-ref", "--short", "-q", "HEAD"]).await?;
        if output.status.success() {
            Ok(Some(stdout_line(&output)))
        } else {
            // Exit 1 with empty stderr means detached HEAD.
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.trim().is_empty() {
                Ok(None)
            } else {
                Err(GitError::new(classify_stderr(&stderr), stderr.trim().to_string()))
            }
        }
    }

    async fn is_default_branch(&self, name: &str, repo: &Path) -> Result<bool, GitError> {
        let output =
            self.run(repo, &["symbolic-ref", "--short", "refs/remotes/origin/HEAD"]).await?;
        if output.status.success() {
            let remote_head = stdout_line(&output);
            let default = remote_head.strip_prefix("origin/").unwrap_or(&remote_head);
            return Ok(name == default);
        }
        // No remote HEAD configured: the first well-known branch that exists
        // is treated as the default.
        for candidate in DEFAULT_BRANCH_FALLBACKS {
            if self.branch_exists(candidate, repo).await? {
                return Ok(name == candidate);
            }
        }
        Ok(false)
    }

    async fn branch_exists(&self, name: &str, repo: &Path) -> Result<bool, GitError> {
        let reference = format!("refs/heads/{name}");
        let output =
            self.run(repo, &["show-ref", "--verify", "--quiet", &reference]).await?;
        Ok(output.status.success())
    }

    async fn create_branch(&self, name: &str, base: &str, repo: &Path) -> Result<(), GitError> {
        self.run_ok(repo, &["branch", name, base]).await?;
        Ok(())
    }

    async fn resolve_ref(&self, reference: &str, repo: &Path) -> Result<String, GitError> {
        let spec = format!("{reference}^{{commit}}");
        let output = self.run(repo, &["rev-parse", "--verify", "--quiet", &spec]).await?;
        if output.status.success() {
            Ok(stdout_line(&output))
        } else {
            Err(GitError::not_found(format!("cannot resolve ref {reference}")))
        }
    }

    async fn update_ref(&self, repo: &Path, ref_name: &str, commit: &str) -> Result<(), GitError> {
        self.run_ok(repo, &["update-ref", ref_name, commit]).await?;
        Ok(())
    }

    async fn list_worktrees(&self, repo: &Path) -> Result<Vec<WorktreeInfo>, GitError> {
        let output = self.run_ok(repo, &["worktree", "list", "--porcelain"]).await?;
        Ok(parse_worktree_list(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn add_worktree(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
        base_commit: &str,
    ) -> Result<(), GitError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GitError::io(format!("create worktree parent: {e}")))?;
        }
        let path_str = path.display().to_string();
        // -B: reuse a leftover branch from an earlier attempt, reset to base.
        self.run_ok(repo, &["worktree", "add", "-B", branch, &path_str, base_commit])
            .await?;
        Ok(())
    }

    async fn remove_worktree(
        &self,
        repo: &Path,
        path: &Path,
        force: bool,
    ) -> Result<(), GitError> {
        let path_str = path.display().to_string();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&path_str);
        self.run_ok(repo, &args).await?;
        Ok(())
    }

    async fn squash_merge(
        &self,
        repo: &Path,
        source_ref: &str,
        target_branch: &str,
        message: &str,
    ) -> Result<MergeOutcome, GitError> {
        // merge-tree + commit-tree + update-ref: no checkout is touched.
        let target_commit = self.resolve_ref(target_branch, repo).await?;
        let output = self
            .run(
                repo,
                &["merge-tree", "--write-tree", "--name-only", &target_commit, source_ref],
            )
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines = stdout.lines();
        let tree = lines.next().unwrap_or("").trim().to_string();
        if !output.status.success() {
            let conflicts: Vec<String> = lines
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect();
            if tree.is_empty() && conflicts.is_empty() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(GitError::new(
                    classify_stderr(&stderr),
                    format!("git merge-tree: {}", stderr.trim()),
                ));
            }
            return Ok(MergeOutcome::conflicted(conflicts));
        }

        let commit_output = self
            .run_ok(repo, &["commit-tree", &tree, "-p", &target_commit, "-m", message])
            .await?;
        let commit = stdout_line(&commit_output);
        let ref_name = format!("refs/heads/{target_branch}");
        self.update_ref(repo, &ref_name, &commit).await?;
        Ok(MergeOutcome::clean(commit))
    }

    async fn merge_into_worktree(
        &self,
        worktree: &Path,
        source_branch: &str,
    ) -> Result<MergeOutcome, GitError> {
        let output = self.run(worktree, &["merge", "--no-edit", source_branch]).await?;
        if output.status.success() {
            let head = self.head_commit(worktree).await?;
            return Ok(MergeOutcome::clean(head));
        }
        let conflicts_output = self
            .run(worktree, &["diff", "--name-only", "--diff-filter=U"])
            .await?;
        let conflicts: Vec<String> = String::from_utf8_lossy(&conflicts_output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        // Leave the worktree mergeable again regardless of the outcome.
        let _ = self.run(worktree, &["merge", "--abort"]).await;
        if conflicts.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::new(
                classify_stderr(&stderr),
                format!("git merge: {}", stderr.trim()),
            ));
        }
        Ok(MergeOutcome::conflicted(conflicts))
    }

    async fn stage_all(&self, worktree: &Path) -> Result<(), GitError> {
        self.run_ok(worktree, &["add", "-A"]).await?;
        Ok(())
    }

    async fn has_staged_changes(&self, worktree: &Path) -> Result<bool, GitError> {
        let output = self.run(worktree, &["diff", "--cached", "--quiet"]).await?;
        Ok(!output.status.success())
    }

    async fn commit(&self, worktree: &Path, message: &str) -> Result<String, GitError> {
        self.run_ok(worktree, &["commit", "--no-verify", "-m", message]).await?;
        self.head_commit(worktree).await
    }

    async fn head_commit(&self, worktree: &Path) -> Result<String, GitError> {
        self.resolve_ref("HEAD", worktree).await
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
