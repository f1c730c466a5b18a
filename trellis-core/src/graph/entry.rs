//! Graph Entries
//!
//! This module defines the per-key record that lives in the graph store:
//! the node state, its last value or error, its dependency edges in both
//! directions, and the temporary bookkeeping used while it is building.

use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::error::ErrorInfo;
use crate::node::{GroupedDeps, NodeKey, NodeValue};

/// Monotonic graph version.
///
/// The store advances its version once per evaluation. Entries remember the
/// version at which their value last changed and the version at which they
/// were last computed or verified; comparing the two is how the evaluator
/// decides whether a dependency changed since a dependent last looked at it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version(u64);

impl Version {
    /// The version of a freshly created graph.
    pub const INITIAL: Version = Version(0);

    /// Create a version from its raw number.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw version number.
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// The version after this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Created on first reference, never computed.
    NotYetEvaluated,

    /// Being evaluated by the current evaluation.
    Building,

    /// Holds an up-to-date value.
    Done,

    /// A transitive dependency changed. The old value may still be reusable
    /// if every direct dependency re-verifies unchanged.
    Dirty,

    /// Known stale. Must be recomputed.
    Changed,

    /// Failed. Holds an [`ErrorInfo`].
    Error,
}

/// How strongly an invalidation marks a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirtyType {
    /// Suspected stale.
    Dirty,
    /// Confirmed stale.
    Changed,
}

/// What a building node is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BuildPhase {
    /// Re-verifying old dependency group `group` (change pruning).
    CheckingDeps { group: usize },
    /// Running (or waiting to re-run) its function.
    Computing,
}

/// Bookkeeping that only exists while a node is building.
#[derive(Debug)]
pub(crate) struct Building {
    pub(crate) phase: BuildPhase,

    /// Dependencies requested by the current attempt, in request order.
    pub(crate) temp_deps: GroupedDeps,

    /// Requested dependencies that have not signaled yet.
    pub(crate) pending: usize,

    /// Parents waiting for this node to finish.
    pub(crate) waiters: Vec<NodeKey>,

    /// A dependency that finished with an error.
    pub(crate) failed_dep: Option<NodeKey>,

    /// State to restore if the evaluation abandons this node.
    pub(crate) prior: NodeState,
}

/// Result of signaling a parent that one of its dependencies finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Other requested dependencies are still pending.
    Waiting,
    /// Every requested dependency has signaled.
    AllSignaled,
    /// The parent is no longer building (it already failed or was abandoned).
    Stale,
}

/// Mutable state of an entry, guarded by the entry's mutex.
#[derive(Debug)]
pub(crate) struct EntryData {
    pub(crate) state: NodeState,
    pub(crate) value: Option<NodeValue>,
    pub(crate) error: Option<Arc<ErrorInfo>>,
    pub(crate) direct_deps: GroupedDeps,
    pub(crate) reverse_deps: IndexSet<NodeKey>,
    pub(crate) changed_at: Version,
    pub(crate) verified_at: Version,
    pub(crate) building: Option<Building>,
}

impl EntryData {
    fn new() -> Self {
        Self {
            state: NodeState::NotYetEvaluated,
            value: None,
            error: None,
            direct_deps: GroupedDeps::new(),
            reverse_deps: IndexSet::new(),
            changed_at: Version::INITIAL,
            verified_at: Version::INITIAL,
            building: None,
        }
    }

    /// The phase a node starts in when an evaluation first needs it, or
    /// `None` if it is already resolved or building.
    pub(crate) fn activation_phase(&self) -> Option<BuildPhase> {
        match self.state {
            NodeState::NotYetEvaluated | NodeState::Changed => Some(BuildPhase::Computing),
            NodeState::Dirty => Some(BuildPhase::CheckingDeps { group: 0 }),
            NodeState::Building | NodeState::Done | NodeState::Error => None,
        }
    }

    pub(crate) fn start(&mut self, phase: BuildPhase) {
        debug_assert!(self.building.is_none(), "entry started twice");
        self.building = Some(Building {
            phase,
            temp_deps: GroupedDeps::new(),
            pending: 0,
            waiters: Vec::new(),
            failed_dep: None,
            prior: self.state,
        });
        self.state = NodeState::Building;
    }

    pub(crate) fn building_mut(&mut self) -> Option<&mut Building> {
        match self.state {
            NodeState::Building => self.building.as_mut(),
            _ => None,
        }
    }

    /// Record one dependency signal.
    pub(crate) fn signal(&mut self, dep: &NodeKey, failed: bool) -> SignalOutcome {
        let Some(building) = self.building_mut() else {
            return SignalOutcome::Stale;
        };
        if failed && building.failed_dep.is_none() {
            building.failed_dep = Some(dep.clone());
        }
        building.pending = building.pending.saturating_sub(1);
        if building.pending == 0 {
            SignalOutcome::AllSignaled
        } else {
            SignalOutcome::Waiting
        }
    }

    /// Apply an invalidation mark. Returns whether the mark is new.
    pub(crate) fn mark_dirty(&mut self, dirty_type: DirtyType) -> Option<bool> {
        match (self.state, dirty_type) {
            (NodeState::Building, _) => None,
            (NodeState::Done, DirtyType::Dirty) => {
                self.state = NodeState::Dirty;
                Some(true)
            }
            (NodeState::Done | NodeState::Error, _) => {
                self.state = NodeState::Changed;
                Some(true)
            }
            (NodeState::Dirty, DirtyType::Changed) => {
                self.state = NodeState::Changed;
                Some(false)
            }
            (NodeState::Dirty | NodeState::Changed | NodeState::NotYetEvaluated, _) => {
                Some(false)
            }
        }
    }

    /// Finish building with `value`. Returns whether the value changed and
    /// the parents to signal.
    pub(crate) fn commit_value(
        &mut self,
        value: NodeValue,
        version: Version,
    ) -> (bool, Vec<NodeKey>) {
        let changed = self.value.as_ref() != Some(&value);
        if changed {
            self.changed_at = version;
            self.value = Some(value);
        }
        self.verified_at = version;
        self.error = None;
        self.state = NodeState::Done;
        (changed, self.take_waiters())
    }

    /// Finish building with the old value after all deps re-verified.
    pub(crate) fn commit_clean(&mut self, version: Version) -> Vec<NodeKey> {
        self.verified_at = version;
        self.state = NodeState::Done;
        self.take_waiters()
    }

    /// Finish building with an error.
    pub(crate) fn commit_error(&mut self, error: Arc<ErrorInfo>, version: Version) -> Vec<NodeKey> {
        self.value = None;
        self.changed_at = version;
        self.verified_at = version;
        self.error = Some(error);
        self.state = NodeState::Error;
        self.take_waiters()
    }

    /// Drop building bookkeeping and return to the state before activation.
    pub(crate) fn abandon(&mut self) -> bool {
        match self.building.take() {
            Some(building) if self.state == NodeState::Building => {
                self.state = building.prior;
                true
            }
            other => {
                self.building = other;
                false
            }
        }
    }

    fn take_waiters(&mut self) -> Vec<NodeKey> {
        self.building
            .take()
            .map(|building| building.waiters)
            .unwrap_or_default()
    }
}

/// A node's record in the graph.
///
/// All access goes through one mutex per entry, so operations on different
/// entries never contend.
#[derive(Debug)]
pub struct NodeEntry {
    data: Mutex<EntryData>,
}

impl NodeEntry {
    pub(crate) fn new() -> Self {
        Self {
            data: Mutex::new(EntryData::new()),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EntryData> {
        self.data.lock()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        self.lock().state
    }

    /// The value, if the node is done.
    pub fn value(&self) -> Option<NodeValue> {
        let data = self.lock();
        match data.state {
            NodeState::Done => data.value.clone(),
            _ => None,
        }
    }

    /// The last committed value, even if the node is currently stale.
    pub fn last_value(&self) -> Option<NodeValue> {
        self.lock().value.clone()
    }

    /// The error, if the node failed.
    pub fn error(&self) -> Option<Arc<ErrorInfo>> {
        let data = self.lock();
        match data.state {
            NodeState::Error => data.error.clone(),
            _ => None,
        }
    }

    /// Dependencies recorded by the last completed computation.
    pub fn direct_deps(&self) -> GroupedDeps {
        self.lock().direct_deps.clone()
    }

    /// Dependencies requested by the current attempt while building.
    pub fn temporary_deps(&self) -> GroupedDeps {
        self.lock()
            .building
            .as_ref()
            .map(|building| building.temp_deps.clone())
            .unwrap_or_default()
    }

    /// Nodes whose recorded dependencies include this one.
    pub fn reverse_deps(&self) -> Vec<NodeKey> {
        self.lock().reverse_deps.iter().cloned().collect()
    }

    /// Version at which the value last changed.
    pub fn changed_at(&self) -> Version {
        self.lock().changed_at
    }

    /// Version at which the node was last computed or verified clean.
    pub fn verified_at(&self) -> Version {
        self.lock().verified_at
    }

    /// Whether the node holds an up-to-date value.
    pub fn is_done(&self) -> bool {
        self.state() == NodeState::Done
    }

    /// Whether the node is marked dirty or changed.
    pub fn is_dirty(&self) -> bool {
        matches!(self.state(), NodeState::Dirty | NodeState::Changed)
    }
}
