//! Dependency Graph
//!
//! This module implements the persistent store behind incremental
//! evaluation: one entry per [`NodeKey`](crate::node::NodeKey), holding the
//! node's state, its last value or error, and its dependency edges.
//!
//! # Overview
//!
//! - Forward edges (direct dependencies) are recorded in request order.
//! - Reverse edges (dependents) are kept as the exact inverse and are used
//!   to propagate invalidation.
//! - Entries persist across evaluations; the graph *is* the cache. They are
//!   only deleted by explicit eviction.
//!
//! # Design Decisions
//!
//! 1. The graph is an owned value, not a process-wide singleton, so tests
//!    and embedders can run isolated instances side by side.
//!
//! 2. Entries are indexed by key in a sharded concurrent map, with one mutex
//!    per entry. Work on different nodes never contends on a global lock.
//!
//! 3. Change detection uses graph versions instead of comparing dependency
//!    values: an entry remembers when its value last changed, and when it
//!    was last verified.

mod entry;
pub mod snapshot;
mod store;

pub use entry::{DirtyType, NodeEntry, NodeState, SignalOutcome, Version};
pub(crate) use entry::BuildPhase;
pub use store::{Committed, InMemoryGraph, NodeOutcome};
pub(crate) use store::Activation;
