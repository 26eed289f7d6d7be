// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution phases of a job attempt.

use serde::{Deserialize, Serialize};

/// One phase of a job attempt, in execution order.
///
/// Variant order matters: derived `Ord` is the execution order, which
/// `sequence_from` and step-status resets rely on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Forward-integrate: pull the target branch's latest commits into the
    /// job's worktree branch.
    MergeFi,
    /// Provision the worktree and symlink shared directories.
    Setup,
    Prechecks,
    Work,
    Commit,
    Postchecks,
    /// Reverse-integrate: squash-merge the job branch onto the target branch.
    MergeRi,
}

crate::simple_display! {
    Phase {
        MergeFi => "merge-fi",
        Setup => "setup",
        Prechecks => "prechecks",
        Work => "work",
        Commit => "commit",
        Postchecks => "postchecks",
        MergeRi => "merge-ri",
    }
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 7] = [
        Phase::MergeFi,
        Phase::Setup,
        Phase::Prechecks,
        Phase::Work,
        Phase::Commit,
        Phase::Postchecks,
        Phase::MergeRi,
    ];

    /// Phases a retry may resume from. `setup` is excluded: the worktree is
    /// re-validated on every attempt regardless.
    pub const RESUMABLE: [Phase; 6] = [
        Phase::MergeFi,
        Phase::Prechecks,
        Phase::Work,
        Phase::Commit,
        Phase::Postchecks,
        Phase::MergeRi,
    ];

    /// Position within [`Phase::ALL`].
    pub fn index(self) -> usize {
        match self {
            Phase::MergeFi => 0,
            Phase::Setup => 1,
            Phase::Prechecks => 2,
            Phase::Work => 3,
            Phase::Commit => 4,
            Phase::Postchecks => 5,
            Phase::MergeRi => 6,
        }
    }

    /// Phases from `start` (inclusive) to the end of the attempt.
    ///
    /// A resumed attempt always re-runs `setup` to re-validate the worktree,
    /// so resuming from `merge-fi` or earlier yields the full sequence and
    /// resuming from any later phase yields `setup` followed by the tail.
    pub fn sequence_from(start: Option<Phase>) -> Vec<Phase> {
        match start {
            None | Some(Phase::MergeFi) | Some(Phase::Setup) => Phase::ALL.to_vec(),
            Some(p) => {
                let mut seq = vec![Phase::Setup];
                seq.extend(Phase::ALL.iter().copied().filter(|q| *q >= p));
                seq
            }
        }
    }

    pub fn is_resumable(self) -> bool {
        self != Phase::Setup
    }
}

#[cfg(test)]
#[path = "phase_tests.rs"]
mod tests;
