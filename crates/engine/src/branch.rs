// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Base/target branch resolution.
//!
//! The target branch is the plan's integration point and must never be a
//! repository default branch; requests for one are rewritten to a generated
//! feature branch under the configured prefix.

use fm_core::{Clock, CommandError};
use fm_gitops::GitGateway;
use std::path::Path;

const SLUG_MAX: usize = 40;

/// Filler words dropped from branch slugs.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "for", "to", "in", "on", "with", "into",
];

/// Slugify a plan name for use as a branch component.
///
/// Lowercases, maps runs of non-alphanumerics to single hyphens, drops
/// filler words, and truncates (trimming trailing hyphens).
pub fn slugify(input: &str, max_len: usize) -> String {
    let lower = input.to_lowercase();
    let mut slug = String::with_capacity(lower.len());
    let mut last_was_hyphen = true;
    for c in lower.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    let filtered: Vec<&str> =
        slug.split('-').filter(|w| !w.is_empty() && !STOP_WORDS.contains(w)).collect();
    let mut out = filtered.join("-");
    if out.len() > max_len {
        out.truncate(max_len);
    }
    out.trim_matches('-').to_string()
}

/// Resolved branch pair for a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBranches {
    pub base: String,
    pub target: String,
}

/// Apply the resolution rules:
///
/// 1. Base: explicit request, else the current branch, else `main`.
/// 2. Target: an explicit non-default request is used as-is (created from
///    base when missing; reset to the base head when it exists elsewhere and
///    is not checked out). A default-branch request, or no request with a
///    default branch checked out, generates `<prefix>/<slug>`; when no
///    request is made and a non-default branch is checked out, that branch
///    is adopted.
pub async fn resolve_branches<G: GitGateway>(
    git: &G,
    repo: &Path,
    base_request: Option<&str>,
    target_request: Option<&str>,
    plan_name: &str,
    prefix: &str,
    clock: &impl Clock,
) -> Result<ResolvedBranches, CommandError> {
    let current = git.current_branch(repo).await?;

    let base = match base_request {
        Some(b) => b.to_string(),
        None => current.clone().unwrap_or_else(|| "main".to_string()),
    };
    let base_head = git.resolve_ref(&base, repo).await?;

    let target = match target_request {
        Some(requested) if !git.is_default_branch(requested, repo).await? => {
            if git.branch_exists(requested, repo).await? {
                let head = git.resolve_ref(requested, repo).await?;
                let checked_out = current.as_deref() == Some(requested);
                if head != base_head && !checked_out {
                    // Stale target from an earlier run: restart it at base.
                    git.update_ref(repo, &format!("refs/heads/{requested}"), &base_head)
                        .await?;
                }
            } else {
                git.create_branch(requested, &base, repo).await?;
            }
            requested.to_string()
        }
        Some(_) => generate_target(git, repo, &base, plan_name, prefix, clock).await?,
        None => match &current {
            Some(branch) if !git.is_default_branch(branch, repo).await? => branch.clone(),
            _ => generate_target(git, repo, &base, plan_name, prefix, clock).await?,
        },
    };

    Ok(ResolvedBranches { base, target })
}

async fn generate_target<G: GitGateway>(
    git: &G,
    repo: &Path,
    base: &str,
    plan_name: &str,
    prefix: &str,
    clock: &impl Clock,
) -> Result<String, CommandError> {
    let slug = slugify(plan_name, SLUG_MAX);
    let name = if slug.is_empty() {
        format!("{prefix}/{}", clock.epoch_ms())
    } else {
        format!("{prefix}/{slug}")
    };
    if !git.branch_exists(&name, repo).await? {
        git.create_branch(&name, base, repo).await?;
    }
    tracing::info!(branch = %name, "generated plan target branch");
    Ok(name)
}

#[cfg(test)]
#[path = "branch_tests.rs"]
mod tests;
