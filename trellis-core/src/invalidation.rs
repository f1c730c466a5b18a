//! Invalidation
//!
//! Translates externally observed changes into dirty marks on the graph.
//!
//! # Algorithm
//!
//! 1. Each changed leaf is marked `Changed`.
//! 2. Reverse dependencies are walked breadth-first and every transitive
//!    dependent is marked `Dirty`, stopping at nodes that were already
//!    stale (their dependents were marked when they were).
//! 3. Nothing is recomputed here. A dirty node is only looked at again when
//!    an evaluation requests it, and then it may be verified clean without
//!    running its function.
//!
//! Marking costs O(affected edges); recomputation is paid lazily and only
//! for nodes that are both requested and actually affected.

use std::collections::{HashSet, VecDeque};

use crate::error::GraphError;
use crate::graph::{DirtyType, InMemoryGraph};
use crate::node::{NodeKey, NodeValue};

/// Counts of one invalidation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationSummary {
    /// Nodes newly marked `Changed`.
    pub changed: usize,
    /// Nodes newly marked `Dirty`.
    pub dirtied: usize,
}

impl InvalidationSummary {
    fn merge(&mut self, other: InvalidationSummary) {
        self.changed += other.changed;
        self.dirtied += other.dirtied;
    }
}

/// Propagates changes through reverse dependencies.
#[derive(Debug, Clone, Copy)]
pub struct Invalidator<'g> {
    graph: &'g InMemoryGraph,
}

impl<'g> Invalidator<'g> {
    /// Create an invalidator for `graph`.
    pub fn new(graph: &'g InMemoryGraph) -> Self {
        Self { graph }
    }

    /// Mark `changed` leaves as changed and their transitive dependents as
    /// dirty.
    pub fn invalidate<I>(&self, changed: I) -> Result<InvalidationSummary, GraphError>
    where
        I: IntoIterator<Item = NodeKey>,
    {
        self.propagate(changed, DirtyType::Changed)
    }

    /// Mark `keys` and their transitive dependents as dirty.
    ///
    /// Unlike [`Invalidator::invalidate`], the roots themselves may still be
    /// verified clean.
    pub fn dirty<I>(&self, keys: I) -> Result<InvalidationSummary, GraphError>
    where
        I: IntoIterator<Item = NodeKey>,
    {
        self.propagate(keys, DirtyType::Dirty)
    }

    /// Set the value of an injected leaf and dirty its dependents if it
    /// changed.
    pub fn inject(
        &self,
        key: NodeKey,
        value: NodeValue,
    ) -> Result<InvalidationSummary, GraphError> {
        let mut summary = InvalidationSummary::default();
        if !self.graph.inject(&key, value)? {
            return Ok(summary);
        }
        summary.changed += 1;
        let dependents = self.graph.get_reverse_deps(&key);
        summary.merge(self.propagate(dependents, DirtyType::Dirty)?);
        Ok(summary)
    }

    fn propagate<I>(
        &self,
        roots: I,
        root_type: DirtyType,
    ) -> Result<InvalidationSummary, GraphError>
    where
        I: IntoIterator<Item = NodeKey>,
    {
        let mut summary = InvalidationSummary::default();
        let mut visited: HashSet<NodeKey> = HashSet::new();
        let mut queue: VecDeque<NodeKey> = VecDeque::new();

        for root in roots {
            if !visited.insert(root.clone()) {
                continue;
            }
            let newly = self.graph.mark_dirty(&root, root_type)?;
            if newly {
                match root_type {
                    DirtyType::Changed => summary.changed += 1,
                    DirtyType::Dirty => summary.dirtied += 1,
                }
            }
            // Roots are walked even if they were already stale: a leaf may
            // have gained dependents since it was last marked.
            queue.extend(self.graph.get_reverse_deps(&root));
        }

        while let Some(key) = queue.pop_front() {
            if !visited.insert(key.clone()) {
                continue;
            }
            if self.graph.mark_dirty(&key, DirtyType::Dirty)? {
                summary.dirtied += 1;
                queue.extend(self.graph.get_reverse_deps(&key));
            }
        }

        tracing::debug!(
            changed = summary.changed,
            dirtied = summary.dirtied,
            "invalidation propagated"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeState;
    use crate::node::GroupedDeps;

    fn key(name: &str) -> NodeKey {
        NodeKey::new("test", name)
    }

    fn build(graph: &InMemoryGraph, name: &str, deps: &[&str]) {
        let k = key(name);
        graph.get_or_create(&k);
        graph.activate(&k);
        let deps: GroupedDeps = deps.iter().map(|d| key(d)).collect();
        graph.set_value(&k, NodeValue::text(name), deps).unwrap();
    }

    fn state(graph: &InMemoryGraph, name: &str) -> NodeState {
        graph.get(&key(name)).unwrap().state()
    }

    /// leaf <- mid <- top, leaf <- side, other is unrelated.
    fn diamond() -> InMemoryGraph {
        let graph = InMemoryGraph::new();
        build(&graph, "leaf", &[]);
        build(&graph, "other", &[]);
        build(&graph, "mid", &["leaf"]);
        build(&graph, "side", &["leaf"]);
        build(&graph, "top", &["mid", "side", "other"]);
        graph
    }

    #[test]
    fn invalidate_marks_every_transitive_dependent() {
        let graph = diamond();
        let summary = Invalidator::new(&graph).invalidate([key("leaf")]).unwrap();

        assert_eq!(summary, InvalidationSummary { changed: 1, dirtied: 3 });
        assert_eq!(state(&graph, "leaf"), NodeState::Changed);
        assert_eq!(state(&graph, "mid"), NodeState::Dirty);
        assert_eq!(state(&graph, "side"), NodeState::Dirty);
        assert_eq!(state(&graph, "top"), NodeState::Dirty);
        assert_eq!(state(&graph, "other"), NodeState::Done);
    }

    #[test]
    fn repeated_invalidation_is_a_no_op() {
        let graph = diamond();
        let invalidator = Invalidator::new(&graph);
        invalidator.invalidate([key("leaf")]).unwrap();
        let again = invalidator.invalidate([key("leaf")]).unwrap();
        assert_eq!(again, InvalidationSummary::default());
    }

    #[test]
    fn dirty_roots_stay_prunable() {
        let graph = diamond();
        let summary = Invalidator::new(&graph).dirty([key("mid")]).unwrap();
        assert_eq!(summary, InvalidationSummary { changed: 0, dirtied: 2 });
        assert_eq!(state(&graph, "mid"), NodeState::Dirty);
        assert_eq!(state(&graph, "leaf"), NodeState::Done);
    }

    #[test]
    fn inject_dirties_dependents_on_change_only() {
        let graph = diamond();
        let invalidator = Invalidator::new(&graph);

        let unchanged = invalidator.inject(key("leaf"), NodeValue::text("leaf")).unwrap();
        assert_eq!(unchanged, InvalidationSummary::default());
        assert_eq!(state(&graph, "top"), NodeState::Done);

        let changed = invalidator.inject(key("leaf"), NodeValue::text("new")).unwrap();
        assert_eq!(changed, InvalidationSummary { changed: 1, dirtied: 3 });
        assert_eq!(state(&graph, "leaf"), NodeState::Done);
        assert_eq!(state(&graph, "top"), NodeState::Dirty);
    }
}
