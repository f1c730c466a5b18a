//! Graph Store
//!
//! [`InMemoryGraph`] owns every [`NodeEntry`] of one build-server process.
//! It is the only shared mutable structure of the engine: workers read it
//! while computing, the evaluator and the invalidator mutate it.
//!
//! # Locking
//!
//! Each entry has its own mutex. Operations that touch an edge update both
//! endpoints under both locks, taken in key order, so an edge is never
//! visible in only one direction and two edge updates cannot deadlock.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::MutexGuard;

use super::entry::{BuildPhase, DirtyType, EntryData, NodeEntry, NodeState, SignalOutcome, Version};
use crate::error::{ErrorInfo, GraphError};
use crate::node::{GroupedDeps, NodeKey, NodeValue};

/// The resolved result of a node: its value or its error.
pub type NodeOutcome = Result<NodeValue, Arc<ErrorInfo>>;

/// What happened when an evaluation asked for a node.
#[derive(Debug, Clone)]
pub(crate) enum Activation {
    /// Already done in this graph version.
    Done,
    /// Already failed.
    Failed(Arc<ErrorInfo>),
    /// Newly started in the given phase; the caller must drive it.
    Started(BuildPhase),
    /// Already building.
    InProgress,
}

/// Result of committing a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    /// Whether the committed value differs from the previous one.
    pub changed: bool,
    /// Parents that were waiting for this node.
    pub waiters: Vec<NodeKey>,
}

/// Thread-safe storage of node entries keyed by [`NodeKey`].
#[derive(Debug)]
pub struct InMemoryGraph {
    entries: DashMap<NodeKey, Arc<NodeEntry>>,
    version: AtomicU64,
}

impl InMemoryGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            version: AtomicU64::new(Version::INITIAL.raw()),
        }
    }

    /// The current graph version.
    pub fn version(&self) -> Version {
        Version::new(self.version.load(Ordering::SeqCst))
    }

    /// Advance to the next version and return it.
    pub fn advance_version(&self) -> Version {
        Version::new(self.version.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub(crate) fn set_version(&self, version: Version) {
        self.version.store(version.raw(), Ordering::SeqCst);
    }

    /// Look up an entry.
    pub fn get(&self, key: &NodeKey) -> Option<Arc<NodeEntry>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Look up an entry, creating it in `NotYetEvaluated` state if absent.
    ///
    /// Creation is atomic per key: concurrent callers all receive the same
    /// entry.
    pub fn get_or_create(&self, key: &NodeKey) -> Arc<NodeEntry> {
        if let Some(entry) = self.get(key) {
            return entry;
        }
        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(NodeEntry::new()));
        Arc::clone(entry.value())
    }

    /// Whether an entry exists for `key`.
    pub fn contains(&self, key: &NodeKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the graph has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All keys, in no particular order.
    pub fn keys(&self) -> Vec<NodeKey> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshot of all entries. Locks are taken only after the map is released.
    pub(crate) fn entries(&self) -> Vec<(NodeKey, Arc<NodeEntry>)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    fn entry(&self, key: &NodeKey) -> Result<Arc<NodeEntry>, GraphError> {
        self.get(key)
            .ok_or_else(|| GraphError::MissingEntry { key: key.clone() })
    }

    // ------------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------------

    /// Start `key` for the current evaluation if it is not resolved yet.
    pub(crate) fn activate(&self, key: &NodeKey) -> Activation {
        let entry = self.get_or_create(key);
        let mut data = entry.lock();
        activate_locked(&mut data)
    }

    /// Request `dep` on behalf of the building node `parent`.
    ///
    /// If `dep` is not resolved it is started (if needed) and `parent` is
    /// registered as waiting for it, in one two-entry update.
    pub(crate) fn await_dep(
        &self,
        parent: &NodeKey,
        dep: &NodeKey,
    ) -> Result<Activation, GraphError> {
        let parent_entry = self.entry(parent)?;

        if parent == dep {
            let mut data = parent_entry.lock();
            let building = data
                .building_mut()
                .ok_or_else(|| GraphError::NotBuilding { key: parent.clone() })?;
            building.waiters.push(parent.clone());
            building.pending += 1;
            return Ok(Activation::InProgress);
        }

        let dep_entry = self.get_or_create(dep);
        let (mut parent_data, mut dep_data) = lock_pair(parent, &parent_entry, dep, &dep_entry);
        if parent_data.building_mut().is_none() {
            return Err(GraphError::NotBuilding { key: parent.clone() });
        }

        let activation = activate_locked(&mut dep_data);
        if matches!(activation, Activation::Started(_) | Activation::InProgress) {
            if let Some(building) = dep_data.building_mut() {
                building.waiters.push(parent.clone());
            }
            if let Some(building) = parent_data.building_mut() {
                building.pending += 1;
            }
        }
        Ok(activation)
    }

    /// Append `dep` to the dependencies requested by the building node `key`.
    pub fn add_temporary_direct_dep(&self, key: &NodeKey, dep: NodeKey) -> Result<(), GraphError> {
        self.add_temporary_dep_group(key, [dep])
    }

    /// Append a group of dependencies requested together by `key`.
    pub fn add_temporary_dep_group<I>(&self, key: &NodeKey, deps: I) -> Result<(), GraphError>
    where
        I: IntoIterator<Item = NodeKey>,
    {
        let entry = self.entry(key)?;
        let mut data = entry.lock();
        let building = data
            .building_mut()
            .ok_or_else(|| GraphError::NotBuilding { key: key.clone() })?;
        building.temp_deps.push_group(deps);
        Ok(())
    }

    /// Replace the requested dependencies of `key` with those of its latest
    /// attempt.
    pub fn set_temporary_deps(&self, key: &NodeKey, deps: GroupedDeps) -> Result<(), GraphError> {
        let entry = self.entry(key)?;
        let mut data = entry.lock();
        let building = data
            .building_mut()
            .ok_or_else(|| GraphError::NotBuilding { key: key.clone() })?;
        building.temp_deps = deps;
        Ok(())
    }

    /// Tell `key` that its requested dependency `dep` finished.
    pub fn signal_dep(
        &self,
        key: &NodeKey,
        dep: &NodeKey,
        outcome: &NodeOutcome,
    ) -> Result<SignalOutcome, GraphError> {
        let entry = self.entry(key)?;
        let mut data = entry.lock();
        Ok(data.signal(dep, outcome.is_err()))
    }

    pub(crate) fn phase(&self, key: &NodeKey) -> Option<BuildPhase> {
        let entry = self.get(key)?;
        let mut data = entry.lock();
        data.building_mut().map(|building| building.phase)
    }

    pub(crate) fn set_phase(&self, key: &NodeKey, phase: BuildPhase) -> Result<(), GraphError> {
        let entry = self.entry(key)?;
        let mut data = entry.lock();
        let building = data
            .building_mut()
            .ok_or_else(|| GraphError::NotBuilding { key: key.clone() })?;
        building.phase = phase;
        if phase == BuildPhase::Computing {
            building.temp_deps = GroupedDeps::new();
            building.pending = 0;
            building.failed_dep = None;
        }
        Ok(())
    }

    /// Pending count and failed dependency of a building node.
    pub(crate) fn pending(&self, key: &NodeKey) -> Option<(usize, Option<NodeKey>)> {
        let entry = self.get(key)?;
        let mut data = entry.lock();
        data.building_mut()
            .map(|building| (building.pending, building.failed_dep.clone()))
    }

    /// Finish `key` with `value` and exactly `deps` as its dependencies.
    ///
    /// Edges to dependencies that are no longer requested are removed on
    /// both sides. The change version only moves if the value differs from
    /// the previous one.
    pub fn set_value(
        &self,
        key: &NodeKey,
        value: NodeValue,
        deps: GroupedDeps,
    ) -> Result<Committed, GraphError> {
        let entry = self.commit_edges(key, &deps)?;
        let mut data = entry.lock();
        let (changed, waiters) = data.commit_value(value, self.version());
        Ok(Committed { changed, waiters })
    }

    /// Finish `key` with an error, recording the dependencies it had
    /// requested so the failure can be traced.
    pub fn set_error(
        &self,
        key: &NodeKey,
        error: Arc<ErrorInfo>,
        deps: GroupedDeps,
    ) -> Result<Committed, GraphError> {
        let entry = self.commit_edges(key, &deps)?;
        let mut data = entry.lock();
        let waiters = data.commit_error(error, self.version());
        Ok(Committed {
            changed: true,
            waiters,
        })
    }

    /// Finish a dirty `key` with its old value after every dependency
    /// re-verified unchanged.
    pub(crate) fn mark_clean(&self, key: &NodeKey) -> Result<Committed, GraphError> {
        let entry = self.entry(key)?;
        let mut data = entry.lock();
        if data.building_mut().is_none() {
            return Err(GraphError::NotBuilding { key: key.clone() });
        }
        let waiters = data.commit_clean(self.version());
        Ok(Committed {
            changed: false,
            waiters,
        })
    }

    /// Restore an unfinished node to its state before the evaluation.
    pub(crate) fn abandon(&self, key: &NodeKey) -> bool {
        self.get(key).is_some_and(|entry| entry.lock().abandon())
    }

    fn commit_edges(
        &self,
        key: &NodeKey,
        deps: &GroupedDeps,
    ) -> Result<Arc<NodeEntry>, GraphError> {
        let entry = self.entry(key)?;
        let old = {
            let mut data = entry.lock();
            if data.building_mut().is_none() {
                return Err(GraphError::NotBuilding { key: key.clone() });
            }
            data.direct_deps.clone()
        };
        self.rewire(key, &entry, &old, deps);
        Ok(entry)
    }

    fn rewire(&self, key: &NodeKey, entry: &NodeEntry, old: &GroupedDeps, new: &GroupedDeps) {
        for dep in old.iter().filter(|dep| !new.contains(dep)) {
            self.unlink(key, entry, dep);
        }
        for dep in new.iter().filter(|dep| !old.contains(dep)) {
            self.link(key, entry, dep);
        }
        // Same set of edges; install the exact order and grouping.
        entry.lock().direct_deps = new.clone();
    }

    fn link(&self, key: &NodeKey, entry: &NodeEntry, dep: &NodeKey) {
        if key == dep {
            let mut data = entry.lock();
            data.direct_deps.push(dep.clone());
            data.reverse_deps.insert(key.clone());
            return;
        }
        let dep_entry = self.get_or_create(dep);
        let (mut data, mut dep_data) = lock_pair(key, entry, dep, &dep_entry);
        data.direct_deps.push(dep.clone());
        dep_data.reverse_deps.insert(key.clone());
    }

    fn unlink(&self, key: &NodeKey, entry: &NodeEntry, dep: &NodeKey) {
        if key == dep {
            let mut data = entry.lock();
            data.direct_deps.remove(dep);
            data.reverse_deps.shift_remove(key);
            return;
        }
        match self.get(dep) {
            Some(dep_entry) => {
                let (mut data, mut dep_data) = lock_pair(key, entry, dep, &dep_entry);
                data.direct_deps.remove(dep);
                dep_data.reverse_deps.shift_remove(key);
            }
            None => {
                entry.lock().direct_deps.remove(dep);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------------

    /// Nodes that recorded `key` as a dependency.
    pub fn get_reverse_deps(&self, key: &NodeKey) -> Vec<NodeKey> {
        self.get(key)
            .map(|entry| entry.reverse_deps())
            .unwrap_or_default()
    }

    /// Mark `key` dirty or changed.
    ///
    /// Returns `true` if the node was up to date (done or failed) and is now
    /// stale, which means its dependents still need to be marked.
    pub fn mark_dirty(&self, key: &NodeKey, dirty_type: DirtyType) -> Result<bool, GraphError> {
        let Some(entry) = self.get(key) else {
            return Ok(false);
        };
        let mut data = entry.lock();
        data.mark_dirty(dirty_type)
            .ok_or_else(|| GraphError::Busy { key: key.clone() })
    }

    /// Install an externally supplied value for a leaf node.
    ///
    /// Returns whether the value differs from the one already stored. The
    /// change becomes visible to dependents in the next graph version.
    pub fn inject(&self, key: &NodeKey, value: NodeValue) -> Result<bool, GraphError> {
        let entry = self.get_or_create(key);
        let old = {
            let data = entry.lock();
            match data.state {
                NodeState::Building => return Err(GraphError::Busy { key: key.clone() }),
                NodeState::Done if data.value.as_ref() == Some(&value) => return Ok(false),
                _ => data.direct_deps.clone(),
            }
        };
        self.rewire(key, &entry, &old, &GroupedDeps::new());

        let next = self.version().next();
        let mut data = entry.lock();
        data.value = Some(value);
        data.error = None;
        data.changed_at = next;
        data.verified_at = next;
        data.state = NodeState::Done;
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Eviction
    // ------------------------------------------------------------------------

    /// Delete `key` and all of its edges.
    ///
    /// Returns the nodes that depended on it. Those nodes lost a recorded
    /// dependency and must be invalidated by the caller.
    pub fn remove(&self, key: &NodeKey) -> Result<Vec<NodeKey>, GraphError> {
        let Some(entry) = self.get(key) else {
            return Ok(Vec::new());
        };
        let (deps, rdeps) = {
            let data = entry.lock();
            if data.state == NodeState::Building {
                return Err(GraphError::Busy { key: key.clone() });
            }
            (data.direct_deps.clone(), data.reverse_deps.clone())
        };

        for dep in deps.iter() {
            self.unlink(key, &entry, dep);
        }
        let mut dependents = Vec::with_capacity(rdeps.len());
        for rdep in rdeps.iter().filter(|rdep| *rdep != key) {
            if let Some(rdep_entry) = self.get(rdep) {
                let (mut data, mut rdep_data) = lock_pair(key, &entry, rdep, &rdep_entry);
                rdep_data.direct_deps.remove(key);
                data.reverse_deps.shift_remove(rdep);
            }
            dependents.push(rdep.clone());
        }

        self.entries.remove(key);
        Ok(dependents)
    }

    /// Delete every entry not reachable from `roots` through recorded
    /// dependencies. Returns the number of deleted entries.
    pub fn retain_reachable(&self, roots: &[NodeKey]) -> Result<usize, GraphError> {
        let mut reachable: HashSet<NodeKey> = HashSet::new();
        let mut queue: VecDeque<NodeKey> = roots.iter().cloned().collect();
        while let Some(key) = queue.pop_front() {
            if !reachable.insert(key.clone()) {
                continue;
            }
            if let Some(entry) = self.get(&key) {
                queue.extend(entry.direct_deps().iter().cloned());
            }
        }

        let unreachable: Vec<NodeKey> = self
            .keys()
            .into_iter()
            .filter(|key| !reachable.contains(key))
            .collect();
        for key in &unreachable {
            // Dependents of an unreachable node are unreachable themselves.
            self.remove(key)?;
        }
        Ok(unreachable.len())
    }

    // ------------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------------

    /// The causal chain from a failed node to the node where its failure
    /// originated, following recorded dependency edges.
    ///
    /// Returns an empty list if `key` has not failed.
    pub fn error_chain(&self, key: &NodeKey) -> Vec<NodeKey> {
        let Some(error) = self.get(key).and_then(|entry| entry.error()) else {
            return Vec::new();
        };
        let root = error.root_cause().clone();
        let mut chain = vec![key.clone()];

        let mut current = key.clone();
        while current != root {
            let Some(entry) = self.get(&current) else {
                break;
            };
            let next = entry
                .direct_deps()
                .iter()
                .find(|dep| {
                    !chain.contains(dep)
                        && self
                            .get(dep)
                            .and_then(|dep_entry| dep_entry.error())
                            .is_some_and(|dep_error| dep_error.root_cause() == &root)
                })
                .cloned();
            match next {
                Some(dep) => {
                    chain.push(dep.clone());
                    current = dep;
                }
                None => break,
            }
        }
        chain
    }

    // ------------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------------

    /// Insert an entry with a value, without edges on the dependency side.
    pub(crate) fn restore(
        &self,
        key: &NodeKey,
        state: NodeState,
        value: NodeValue,
        deps: GroupedDeps,
        changed_at: Version,
        verified_at: Version,
    ) {
        let entry = self.get_or_create(key);
        let mut data = entry.lock();
        data.value = Some(value);
        data.direct_deps = deps;
        data.changed_at = changed_at;
        data.verified_at = verified_at;
        data.state = state;
    }

    /// Record `dependent` as a reverse dependency of `key`.
    pub(crate) fn restore_reverse_dep(&self, key: &NodeKey, dependent: &NodeKey) {
        self.get_or_create(key)
            .lock()
            .reverse_deps
            .insert(dependent.clone());
    }
}

impl Default for InMemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn activate_locked(data: &mut EntryData) -> Activation {
    match data.state {
        NodeState::Done if data.value.is_some() => Activation::Done,
        NodeState::Done => Activation::InProgress,
        NodeState::Error => match &data.error {
            Some(error) => Activation::Failed(Arc::clone(error)),
            None => Activation::InProgress,
        },
        NodeState::Building => Activation::InProgress,
        NodeState::NotYetEvaluated | NodeState::Dirty | NodeState::Changed => {
            match data.activation_phase() {
                Some(phase) => {
                    data.start(phase);
                    Activation::Started(phase)
                }
                None => Activation::InProgress,
            }
        }
    }
}

/// Lock two distinct entries in key order and return the guards in
/// argument order.
fn lock_pair<'a>(
    a_key: &NodeKey,
    a: &'a NodeEntry,
    b_key: &NodeKey,
    b: &'a NodeEntry,
) -> (MutexGuard<'a, EntryData>, MutexGuard<'a, EntryData>) {
    debug_assert_ne!(a_key, b_key, "lock_pair needs two distinct entries");
    if a_key < b_key {
        let a_guard = a.lock();
        let b_guard = b.lock();
        (a_guard, b_guard)
    } else {
        let b_guard = b.lock();
        let a_guard = a.lock();
        (a_guard, b_guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ComputationError;

    fn key(name: &str) -> NodeKey {
        NodeKey::new("test", name)
    }

    fn deps(names: &[&str]) -> GroupedDeps {
        names.iter().map(|name| key(name)).collect()
    }

    fn build(graph: &InMemoryGraph, name: &str, value: &str, dep_names: &[&str]) {
        let k = key(name);
        assert!(matches!(graph.activate(&k), Activation::Started(_)));
        graph.set_value(&k, NodeValue::text(value), deps(dep_names)).unwrap();
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let graph = InMemoryGraph::new();
        let a = graph.get_or_create(&key("a"));
        let b = graph.get_or_create(&key("a"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn concurrent_creation_has_one_winner() {
        let graph = Arc::new(InMemoryGraph::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let graph = Arc::clone(&graph);
                std::thread::spawn(move || graph.get_or_create(&key("shared")))
            })
            .collect();
        let entries: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(entries.iter().all(|entry| Arc::ptr_eq(entry, &entries[0])));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn set_value_installs_edges_in_both_directions() {
        let graph = InMemoryGraph::new();
        build(&graph, "a", "a", &[]);
        build(&graph, "b", "b", &[]);
        build(&graph, "n", "n", &["b", "a"]);

        let n = graph.get(&key("n")).unwrap();
        assert_eq!(n.state(), NodeState::Done);
        assert_eq!(n.direct_deps().to_vec(), vec![key("b"), key("a")]);
        assert_eq!(graph.get_reverse_deps(&key("a")), vec![key("n")]);
        assert_eq!(graph.get_reverse_deps(&key("b")), vec![key("n")]);
    }

    #[test]
    fn set_value_prunes_stale_edges() {
        let graph = InMemoryGraph::new();
        build(&graph, "n", "n1", &["a"]);
        graph.mark_dirty(&key("n"), DirtyType::Changed).unwrap();
        build(&graph, "n", "n2", &["b"]);

        assert_eq!(graph.get(&key("n")).unwrap().direct_deps().to_vec(), vec![key("b")]);
        assert!(graph.get_reverse_deps(&key("a")).is_empty());
        assert_eq!(graph.get_reverse_deps(&key("b")), vec![key("n")]);
    }

    #[test]
    fn temporary_deps_require_building() {
        let graph = InMemoryGraph::new();
        graph.get_or_create(&key("n"));
        let err = graph.add_temporary_direct_dep(&key("n"), key("a")).unwrap_err();
        assert_eq!(err, GraphError::NotBuilding { key: key("n") });

        graph.activate(&key("n"));
        graph.add_temporary_direct_dep(&key("n"), key("b")).unwrap();
        graph.add_temporary_direct_dep(&key("n"), key("a")).unwrap();
        assert_eq!(
            graph.get(&key("n")).unwrap().temporary_deps().to_vec(),
            vec![key("b"), key("a")]
        );
    }

    #[test]
    fn await_dep_registers_waiter_and_signals() {
        let graph = InMemoryGraph::new();
        graph.activate(&key("n"));

        let activation = graph.await_dep(&key("n"), &key("a")).unwrap();
        assert!(matches!(activation, Activation::Started(BuildPhase::Computing)));
        assert_eq!(graph.pending(&key("n")), Some((1, None)));

        let committed = graph
            .set_value(&key("a"), NodeValue::text("a"), GroupedDeps::new())
            .unwrap();
        assert_eq!(committed.waiters, vec![key("n")]);

        let outcome = graph
            .signal_dep(&key("n"), &key("a"), &Ok(NodeValue::text("a")))
            .unwrap();
        assert_eq!(outcome, SignalOutcome::AllSignaled);
    }

    #[test]
    fn mark_dirty_reports_new_marks() {
        let graph = InMemoryGraph::new();
        build(&graph, "a", "a", &[]);

        assert!(graph.mark_dirty(&key("a"), DirtyType::Dirty).unwrap());
        assert!(!graph.mark_dirty(&key("a"), DirtyType::Dirty).unwrap());
        assert!(!graph.mark_dirty(&key("missing"), DirtyType::Changed).unwrap());

        graph.activate(&key("a"));
        assert_eq!(
            graph.mark_dirty(&key("a"), DirtyType::Changed),
            Err(GraphError::Busy { key: key("a") })
        );
    }

    #[test]
    fn inject_only_reports_real_changes() {
        let graph = InMemoryGraph::new();
        assert!(graph.inject(&key("leaf"), NodeValue::text("v1")).unwrap());
        assert!(!graph.inject(&key("leaf"), NodeValue::text("v1")).unwrap());
        assert!(graph.inject(&key("leaf"), NodeValue::text("v2")).unwrap());

        let entry = graph.get(&key("leaf")).unwrap();
        assert_eq!(entry.value(), Some(NodeValue::text("v2")));
        assert_eq!(entry.changed_at(), graph.version().next());
    }

    #[test]
    fn remove_detaches_both_directions() {
        let graph = InMemoryGraph::new();
        build(&graph, "a", "a", &[]);
        build(&graph, "b", "b", &["a"]);
        build(&graph, "c", "c", &["b"]);

        let dependents = graph.remove(&key("b")).unwrap();
        assert_eq!(dependents, vec![key("c")]);
        assert!(!graph.contains(&key("b")));
        assert!(graph.get_reverse_deps(&key("a")).is_empty());
        assert!(graph.get(&key("c")).unwrap().direct_deps().is_empty());
    }

    #[test]
    fn retain_reachable_drops_the_rest() {
        let graph = InMemoryGraph::new();
        build(&graph, "a", "a", &[]);
        build(&graph, "b", "b", &["a"]);
        build(&graph, "orphan", "o", &["a"]);

        let removed = graph.retain_reachable(&[key("b")]).unwrap();
        assert_eq!(removed, 1);
        assert!(!graph.contains(&key("orphan")));
        assert_eq!(graph.get_reverse_deps(&key("a")), vec![key("b")]);
    }

    #[test]
    fn error_chain_follows_edges_to_root_cause() {
        let graph = InMemoryGraph::new();
        let error = Arc::new(ErrorInfo::computation(key("leaf"), ComputationError::new("missing")));

        let nodes = [("leaf", &[][..]), ("mid", &["leaf"][..]), ("top", &["mid"][..])];
        for (name, dep_names) in nodes {
            graph.activate(&key(name));
            graph.set_error(&key(name), Arc::clone(&error), deps(dep_names)).unwrap();
        }

        assert_eq!(
            graph.error_chain(&key("top")),
            vec![key("top"), key("mid"), key("leaf")]
        );
        assert_eq!(graph.error_chain(&key("leaf")), vec![key("leaf")]);
        assert!(graph.error_chain(&key("unknown")).is_empty());
    }
}
