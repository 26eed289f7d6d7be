// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orphaned-worktree cleanup.
//!
//! A directory under `<repo>/<worktreeRoot>/` is an orphan when it is
//! neither registered with git nor referenced by any live plan's execution
//! state. Orphans are removed with `git worktree remove --force`, then a
//! recursive delete if the directory survived. Errors are collected and
//! reported, never fatal, and no plan locks are held while walking.

use fm_gitops::GitGateway;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// What a sweep did.
#[derive(Debug, Default, Clone)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub errors: Vec<(PathBuf, String)>,
}

/// Scan the given repos' worktree roots and remove orphans.
pub async fn sweep_orphaned_worktrees<G: GitGateway>(
    git: &G,
    repos: &[(PathBuf, String)],
    live: &HashSet<PathBuf>,
) -> CleanupReport {
    let mut report = CleanupReport::default();
    for (repo, worktree_root) in repos {
        let registered: HashSet<PathBuf> = match git.list_worktrees(repo).await {
            Ok(list) => list.into_iter().map(|w| w.path).collect(),
            Err(e) => {
                report.errors.push((repo.clone(), e.to_string()));
                continue;
            }
        };
        for candidate in scan_candidates(&repo.join(worktree_root)) {
            if registered.contains(&candidate) || live.contains(&candidate) {
                continue;
            }
            tracing::info!(path = %candidate.display(), "removing orphaned worktree");
            if let Err(e) = git.remove_worktree(repo, &candidate, true).await {
                // A directory git never knew about still gets deleted below.
                tracing::debug!(path = %candidate.display(), error = %e, "git removal failed");
            }
            if candidate.exists() {
                if let Err(e) = std::fs::remove_dir_all(&candidate) {
                    report.errors.push((candidate.clone(), e.to_string()));
                    continue;
                }
            }
            report.removed.push(candidate);
        }
    }
    report
}

/// Candidate directories: `<root>/<planId>/<nodeId>` two levels down.
fn scan_candidates(worktree_root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(plans) = std::fs::read_dir(worktree_root) else {
        return out;
    };
    for plan_entry in plans.flatten() {
        let plan_dir = plan_entry.path();
        if !plan_dir.is_dir() {
            continue;
        }
        let Ok(nodes) = std::fs::read_dir(&plan_dir) else { continue };
        for node_entry in nodes.flatten() {
            let node_dir = node_entry.path();
            if node_dir.is_dir() {
                out.push(node_dir);
            }
        }
    }
    out
}

#[cfg(test)]
#[path = "cleanup_tests.rs"]
mod tests;
