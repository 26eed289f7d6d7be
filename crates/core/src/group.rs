// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hierarchical job groups and their derived status.

use crate::status::NodeStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Derived status of one group path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupState {
    pub path: String,
    pub status: NodeStatus,
    pub members: u32,
}

/// Ancestor paths of a group, including the group itself.
/// `"ui/panels"` yields `["ui", "ui/panels"]`.
pub fn group_path_of(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut acc = String::new();
    for seg in path.split('/').filter(|s| !s.is_empty()) {
        if !acc.is_empty() {
            acc.push('/');
        }
        acc.push_str(seg);
        out.push(acc.clone());
    }
    out
}

/// Fold a set of member statuses into one group status.
///
/// Precedence: anything still moving wins, then failure modes, then success.
pub fn group_status(members: impl IntoIterator<Item = NodeStatus>) -> NodeStatus {
    let mut any_active = false;
    let mut any_failed = false;
    let mut any_canceled = false;
    let mut any_blocked = false;
    let mut any_waiting = false;
    let mut any = false;
    for status in members {
        any = true;
        match status {
            NodeStatus::Scheduled | NodeStatus::Running => any_active = true,
            NodeStatus::Failed => any_failed = true,
            NodeStatus::Canceled => any_canceled = true,
            NodeStatus::Blocked => any_blocked = true,
            NodeStatus::Pending | NodeStatus::Ready => any_waiting = true,
            NodeStatus::Succeeded => {}
        }
    }
    if !any {
        return NodeStatus::Pending;
    }
    if any_active {
        NodeStatus::Running
    } else if any_failed {
        NodeStatus::Failed
    } else if any_canceled {
        NodeStatus::Canceled
    } else if any_blocked {
        NodeStatus::Blocked
    } else if any_waiting {
        NodeStatus::Pending
    } else {
        NodeStatus::Succeeded
    }
}

/// Derive the status of every group path from member node statuses.
/// A node in `a/b` counts toward both `a` and `a/b`.
pub fn derive_group_states<'a>(
    members: impl IntoIterator<Item = (Option<&'a str>, NodeStatus)>,
) -> Vec<GroupState> {
    let mut by_path: BTreeMap<String, Vec<NodeStatus>> = BTreeMap::new();
    for (group, status) in members {
        let Some(group) = group else { continue };
        for path in group_path_of(group) {
            by_path.entry(path).or_default().push(status);
        }
    }
    by_path
        .into_iter()
        .map(|(path, statuses)| GroupState {
            path,
            members: statuses.len() as u32,
            status: group_status(statuses),
        })
        .collect()
}

#[cfg(test)]
#[path = "group_tests.rs"]
mod tests;
