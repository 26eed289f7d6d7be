// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dependency-graph algorithms over materialized nodes.
//!
//! Only `dependencies` is authored; `dependents` is derived here on every
//! build so the two edge directions can never drift apart.

use crate::id::NodeId;
use crate::node::Node;
use indexmap::IndexMap;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    #[error("dependency cycle: {}", format_cycle(.0))]
    Cycle(Vec<NodeId>),
    #[error("node {node} depends on unknown node {dep}")]
    UnknownDependency { node: NodeId, dep: String },
}

fn format_cycle(ids: &[NodeId]) -> String {
    ids.iter().map(|id| id.as_str().to_string()).collect::<Vec<_>>().join(" -> ")
}

/// Recompute `dependents` from `dependencies`. Fails on unknown references.
pub fn derive_dependents(nodes: &mut IndexMap<NodeId, Node>) -> Result<(), DagError> {
    let ids: Vec<NodeId> = nodes.keys().copied().collect();
    for node in nodes.values_mut() {
        node.dependents.clear();
    }
    for id in &ids {
        let deps = match nodes.get(id) {
            Some(n) => n.dependencies.clone(),
            None => continue,
        };
        for dep in deps {
            match nodes.get_mut(&dep) {
                Some(target) => target.dependents.push(*id),
                None => {
                    return Err(DagError::UnknownDependency {
                        node: *id,
                        dep: dep.as_str().to_string(),
                    })
                }
            }
        }
    }
    Ok(())
}

/// Find a dependency cycle, if any. Returns the cycle path when found.
pub fn find_cycle(nodes: &IndexMap<NodeId, Node>) -> Option<Vec<NodeId>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Grey,
        Black,
    }

    let mut marks: HashMap<NodeId, Mark> = nodes.keys().map(|id| (*id, Mark::White)).collect();

    // Iterative DFS; a grey node reached again closes a cycle.
    for start in nodes.keys() {
        if marks.get(start) != Some(&Mark::White) {
            continue;
        }
        let mut stack: Vec<(NodeId, usize)> = vec![(*start, 0)];
        marks.insert(*start, Mark::Grey);
        while let Some((id, next_dep)) = stack.last().copied() {
            let deps = nodes.get(&id).map(|n| n.dependencies.as_slice()).unwrap_or(&[]);
            if next_dep >= deps.len() {
                marks.insert(id, Mark::Black);
                stack.pop();
                continue;
            }
            if let Some(last) = stack.last_mut() {
                last.1 += 1;
            }
            let dep = deps[next_dep];
            match marks.get(&dep).copied() {
                Some(Mark::White) => {
                    marks.insert(dep, Mark::Grey);
                    stack.push((dep, 0));
                }
                Some(Mark::Grey) => {
                    // Trim the stack to the cycle entry point.
                    let mut cycle: Vec<NodeId> = stack
                        .iter()
                        .map(|(n, _)| *n)
                        .skip_while(|n| *n != dep)
                        .collect();
                    cycle.push(dep);
                    return Some(cycle);
                }
                _ => {}
            }
        }
    }
    None
}

/// Longest distance from any root, per node. Roots are depth 0.
///
/// Callers must have verified acyclicity; unknown deps count as depth 0.
pub fn depths(nodes: &IndexMap<NodeId, Node>) -> HashMap<NodeId, usize> {
    fn depth_of(
        id: NodeId,
        nodes: &IndexMap<NodeId, Node>,
        memo: &mut HashMap<NodeId, usize>,
    ) -> usize {
        if let Some(d) = memo.get(&id) {
            return *d;
        }
        let d = nodes
            .get(&id)
            .map(|n| {
                n.dependencies
                    .iter()
                    .map(|dep| depth_of(*dep, nodes, memo) + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        memo.insert(id, d);
        d
    }

    let mut memo = HashMap::new();
    for id in nodes.keys() {
        depth_of(*id, nodes, &mut memo);
    }
    memo
}

/// Nodes with no dependencies.
pub fn roots(nodes: &IndexMap<NodeId, Node>) -> Vec<NodeId> {
    nodes.values().filter(|n| n.is_root()).map(|n| n.id).collect()
}

/// Nodes with no dependents.
pub fn leaves(nodes: &IndexMap<NodeId, Node>) -> Vec<NodeId> {
    nodes.values().filter(|n| n.is_leaf()).map(|n| n.id).collect()
}

#[cfg(test)]
#[path = "dag_tests.rs"]
mod tests;
