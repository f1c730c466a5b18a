//! Grouped dependency lists.
//!
//! A node's direct dependencies are recorded in the exact order they were
//! requested. Dependencies requested together in one batch form a group;
//! groups are re-verified one after another during change pruning, while
//! the members of a group are verified in parallel.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::NodeKey;

/// Ordered, de-duplicated, grouped list of dependency keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupedDeps {
    keys: IndexSet<NodeKey>,
    /// Exclusive end index into `keys` for each group.
    group_ends: SmallVec<[usize; 4]>,
}

impl GroupedDeps {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single dependency as its own group.
    ///
    /// A key that is already present keeps its first position.
    pub fn push(&mut self, key: NodeKey) {
        self.push_group(std::iter::once(key));
    }

    /// Append a group of dependencies.
    ///
    /// Keys already present are skipped. If nothing new remains, no group
    /// is recorded.
    pub fn push_group<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = NodeKey>,
    {
        let before = self.keys.len();
        for key in keys {
            self.keys.insert(key);
        }
        if self.keys.len() > before {
            self.group_ends.push(self.keys.len());
        }
    }

    /// Remove a dependency, keeping the order of the others.
    ///
    /// Returns whether the key was present.
    pub fn remove(&mut self, key: &NodeKey) -> bool {
        let Some(index) = self.keys.get_index_of(key) else {
            return false;
        };
        self.keys.shift_remove_index(index);

        let mut start = 0;
        let mut ends = SmallVec::new();
        for &end in &self.group_ends {
            let end = if end > index { end - 1 } else { end };
            if end > start {
                ends.push(end);
            }
            start = end;
        }
        self.group_ends = ends;
        true
    }

    /// Whether `key` is one of the dependencies.
    pub fn contains(&self, key: &NodeKey) -> bool {
        self.keys.contains(key)
    }

    /// Number of dependencies across all groups.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether there are no dependencies.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of groups.
    pub fn group_count(&self) -> usize {
        self.group_ends.len()
    }

    /// The keys of group `index`, in request order.
    pub fn group(&self, index: usize) -> Option<Vec<NodeKey>> {
        let end = *self.group_ends.get(index)?;
        let start = if index == 0 { 0 } else { self.group_ends[index - 1] };
        Some((start..end).filter_map(|i| self.keys.get_index(i).cloned()).collect())
    }

    /// Iterate over all dependencies in request order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeKey> + '_ {
        self.keys.iter()
    }

    /// Copy the dependencies into a flat list.
    pub fn to_vec(&self) -> Vec<NodeKey> {
        self.keys.iter().cloned().collect()
    }
}

impl FromIterator<NodeKey> for GroupedDeps {
    /// Collect keys, each as its own group.
    fn from_iter<I: IntoIterator<Item = NodeKey>>(iter: I) -> Self {
        let mut deps = Self::new();
        for key in iter {
            deps.push(key);
        }
        deps
    }
}
