//! Evaluation results.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::cycle::CycleInfo;
use crate::error::ErrorInfo;
use crate::node::{NodeKey, NodeValue};

/// Counters of one evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationStats {
    /// Node function calls, restarts included.
    pub computations: usize,
    /// Calls that ended in a restart.
    pub restarts: usize,
    /// Dirty nodes verified clean without calling their function.
    pub pruned: usize,
    /// Roots that were already resolved when the evaluation started.
    pub cache_hits: usize,
}

/// Outcome of evaluating a set of roots.
///
/// Roots that neither finished nor failed (because the evaluation stopped
/// early) appear in neither map.
#[derive(Debug, Clone, Default)]
pub struct EvaluationResult {
    /// Values of the roots that finished.
    pub values: IndexMap<NodeKey, NodeValue>,
    /// Errors of the roots that failed.
    pub errors: IndexMap<NodeKey, Arc<ErrorInfo>>,
    /// Dependency cycles found while evaluating the roots.
    pub cycles: Vec<CycleInfo>,
    pub stats: EvaluationStats,
}

impl EvaluationResult {
    /// The value of `root`, if it finished.
    pub fn value(&self, root: &NodeKey) -> Option<&NodeValue> {
        self.values.get(root)
    }

    /// The error of `root`, if it failed.
    pub fn error(&self, root: &NodeKey) -> Option<&Arc<ErrorInfo>> {
        self.errors.get(root)
    }

    /// Whether any root failed.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
