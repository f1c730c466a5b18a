//! Evaluation options and cancellation.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What to do when an evaluation finds dependency cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CyclePolicy {
    /// Return [`EvaluationError::Cycle`](crate::error::EvaluationError::Cycle).
    Fail,
    /// Fail the cycle members and report the cycles in the result.
    #[default]
    Report,
}

/// Per-evaluation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationOptions {
    /// Keep evaluating independent nodes after a failure.
    pub keep_going: bool,
    /// Maximum number of node functions running at the same time.
    pub max_parallelism: usize,
    /// Cycle handling.
    pub cycle_policy: CyclePolicy,
}

impl EvaluationOptions {
    /// Set `keep_going`.
    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    /// Set `max_parallelism`. Zero is treated as one.
    pub fn max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism.max(1);
        self
    }

    /// Set `cycle_policy`.
    pub fn cycle_policy(mut self, cycle_policy: CyclePolicy) -> Self {
        self.cycle_policy = cycle_policy;
        self
    }
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            keep_going: false,
            max_parallelism: default_parallelism(),
            cycle_policy: CyclePolicy::default(),
        }
    }
}

/// Number of worker slots when none is configured.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Shared flag that stops an evaluation from dispatching more work.
///
/// Computations already running finish and their results stay cached;
/// nodes that never got to run are restored to their previous state. The
/// flag is cleared when the interrupted evaluation returns.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    /// Create an unset handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running evaluation to stop.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether an interrupt is pending.
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
