//! Cycle Detection
//!
//! When an evaluation runs out of work while some requested nodes are still
//! building, those nodes are waiting on each other. The detector walks the
//! dependencies the stuck nodes requested and reports the cycles it finds.
//!
//! # Algorithm
//!
//! Depth-first search from each stuck root over the edges of building
//! nodes (their requested dependencies) and dirty nodes (their recorded
//! dependencies). A back edge to a node on the current stack closes a
//! cycle: the cycle is the stack suffix starting at that node, and the
//! prefix before it is the path that led there.

use std::collections::HashSet;
use std::fmt;

use crate::graph::{InMemoryGraph, NodeState};
use crate::node::NodeKey;

/// A dependency cycle and the path that reached it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleInfo {
    /// Keys leading from the requested root to the first cycle member.
    pub path_to_cycle: Vec<NodeKey>,
    /// Cycle members in dependency order; the last depends on the first.
    pub cycle: Vec<NodeKey>,
}

impl CycleInfo {
    /// Whether `key` is a member of the cycle.
    pub fn contains(&self, key: &NodeKey) -> bool {
        self.cycle.contains(key)
    }
}

impl fmt::Display for CycleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("cycle ")?;
        for key in &self.cycle {
            write!(f, "{key} -> ")?;
        }
        match self.cycle.first() {
            Some(first) => write!(f, "{first}"),
            None => Ok(()),
        }
    }
}

/// Find the cycles reachable from `roots`.
///
/// Each cycle is reported once, from the first root that reaches it.
pub fn find_cycles(graph: &InMemoryGraph, roots: &[NodeKey]) -> Vec<CycleInfo> {
    let mut finished: HashSet<NodeKey> = HashSet::new();
    let mut cycles = Vec::new();
    for root in roots {
        if !finished.contains(root) {
            search(graph, root, &mut finished, &mut cycles);
        }
    }
    cycles
}

/// Find one cycle reachable from `root`.
pub fn find_cycle(graph: &InMemoryGraph, root: &NodeKey) -> Option<CycleInfo> {
    find_cycles(graph, std::slice::from_ref(root)).into_iter().next()
}

struct Frame {
    key: NodeKey,
    children: Vec<NodeKey>,
    next: usize,
}

fn search(
    graph: &InMemoryGraph,
    root: &NodeKey,
    finished: &mut HashSet<NodeKey>,
    cycles: &mut Vec<CycleInfo>,
) {
    let mut stack = vec![frame(graph, root)];
    let mut on_stack: HashSet<NodeKey> = HashSet::from([root.clone()]);

    while let Some(top) = stack.last_mut() {
        let Some(child) = top.children.get(top.next).cloned() else {
            let done = stack.pop().map(|frame| frame.key);
            if let Some(key) = done {
                on_stack.remove(&key);
                finished.insert(key);
            }
            continue;
        };
        top.next += 1;

        if on_stack.contains(&child) {
            let start = stack
                .iter()
                .position(|frame| frame.key == child)
                .unwrap_or_default();
            let keys: Vec<NodeKey> = stack.iter().map(|frame| frame.key.clone()).collect();
            let (path, cycle) = keys.split_at(start);
            if !cycles.iter().any(|known: &CycleInfo| same_cycle(&known.cycle, cycle)) {
                cycles.push(CycleInfo {
                    path_to_cycle: path.to_vec(),
                    cycle: cycle.to_vec(),
                });
            }
            continue;
        }
        if finished.contains(&child) {
            continue;
        }
        on_stack.insert(child.clone());
        stack.push(frame(graph, &child));
    }
}

fn frame(graph: &InMemoryGraph, key: &NodeKey) -> Frame {
    Frame {
        key: key.clone(),
        children: unresolved_deps(graph, key),
        next: 0,
    }
}

/// Edges worth following: requested deps of building nodes, recorded deps
/// of dirty nodes. Resolved nodes cannot be part of a cycle.
fn unresolved_deps(graph: &InMemoryGraph, key: &NodeKey) -> Vec<NodeKey> {
    let Some(entry) = graph.get(key) else {
        return Vec::new();
    };
    let deps = match entry.state() {
        NodeState::Building => entry.temporary_deps(),
        NodeState::Dirty => entry.direct_deps(),
        _ => return Vec::new(),
    };
    deps.iter()
        .filter(|dep| {
            graph.get(dep).is_some_and(|dep_entry| {
                matches!(dep_entry.state(), NodeState::Building | NodeState::Dirty)
            })
        })
        .cloned()
        .collect()
}

/// Whether two cycles are rotations of each other.
fn same_cycle(a: &[NodeKey], b: &[NodeKey]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let Some(offset) = a.first().and_then(|first| b.iter().position(|key| key == first)) else {
        return a.is_empty();
    };
    a.iter().enumerate().all(|(i, key)| &b[(i + offset) % b.len()] == key)
}
