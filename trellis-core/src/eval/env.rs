//! Compute Environment
//!
//! The handle a node function uses to read its dependencies. Every request
//! is recorded, in order and grouped the way it was made; the recorded
//! requests of the final successful attempt become the node's dependency
//! edges.
//!
//! A request for a dependency that is not done yet does not block. It
//! returns `None` and the dependency is remembered as missing, so the
//! function can return [`ComputeError::Restart`] and be called again once
//! the evaluator has computed what it asked for.

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::error::ComputeError;
use crate::graph::{InMemoryGraph, NodeState};
use crate::node::{GroupedDeps, NodeKey, NodeValue};

/// Dependency access for one attempt of one node function.
#[derive(Debug)]
pub struct Environment<'g> {
    graph: &'g InMemoryGraph,
    key: NodeKey,
    requested: GroupedDeps,
    missing: SmallVec<[NodeKey; 4]>,
    failed: Option<NodeKey>,
}

/// What an attempt requested, handed back to the evaluator.
#[derive(Debug, Default)]
pub(crate) struct Requests {
    pub(crate) requested: GroupedDeps,
    pub(crate) missing: Vec<NodeKey>,
    pub(crate) failed: Option<NodeKey>,
}

impl<'g> Environment<'g> {
    pub(crate) fn new(graph: &'g InMemoryGraph, key: NodeKey) -> Self {
        Self {
            graph,
            key,
            requested: GroupedDeps::new(),
            missing: SmallVec::new(),
            failed: None,
        }
    }

    /// The node being computed.
    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    /// Request one dependency.
    ///
    /// Returns `None` if the dependency has not been computed yet or has
    /// failed; in both cases [`Environment::values_missing`] becomes true.
    pub fn get_value(&mut self, dep: &NodeKey) -> Option<NodeValue> {
        self.requested.push_group([dep.clone()]);
        self.lookup(dep)
    }

    /// Request several dependencies at once.
    ///
    /// The keys form one dependency group: when the node is later checked
    /// for changes, they are re-verified together.
    pub fn get_values(&mut self, deps: &[NodeKey]) -> IndexMap<NodeKey, Option<NodeValue>> {
        self.requested.push_group(deps.iter().cloned());
        deps.iter()
            .map(|dep| (dep.clone(), self.lookup(dep)))
            .collect()
    }

    /// Request one dependency, restarting the computation if it is not
    /// available.
    ///
    /// ```ignore
    /// let source = env.require(&NodeKey::new("leaf", "file1"))?;
    /// ```
    pub fn require(&mut self, dep: &NodeKey) -> Result<NodeValue, ComputeError> {
        self.get_value(dep).ok_or(ComputeError::Restart)
    }

    /// Whether any request so far returned no value.
    pub fn values_missing(&self) -> bool {
        !self.missing.is_empty() || self.failed.is_some()
    }

    pub(crate) fn into_requests(self) -> Requests {
        Requests {
            requested: self.requested,
            missing: self.missing.into_vec(),
            failed: self.failed,
        }
    }

    fn lookup(&mut self, dep: &NodeKey) -> Option<NodeValue> {
        let resolved = self.graph.get(dep).map(|entry| (entry.state(), entry.value()));
        match resolved {
            Some((NodeState::Done, Some(value))) => Some(value),
            Some((NodeState::Error, _)) => {
                if self.failed.is_none() {
                    self.failed = Some(dep.clone());
                }
                None
            }
            _ => {
                if !self.missing.contains(dep) {
                    self.missing.push(dep.clone());
                }
                None
            }
        }
    }
}
