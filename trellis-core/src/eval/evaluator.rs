//! Evaluator
//!
//! Drives the requested roots and everything they transitively need to a
//! value or an error.
//!
//! # Algorithm
//!
//! A single coordinator owns every state transition. For each node it
//! activates:
//!
//! 1. Done or failed nodes answer from the graph (cache hit).
//! 2. Dirty nodes re-verify their recorded dependencies group by group. If
//!    every dependency is done and none changed after the node was last
//!    verified, the old value is kept without running the function.
//! 3. Otherwise the node's function runs on a worker. A run that reported
//!    missing dependencies is a restart: the missing dependencies are
//!    scheduled and the node is queued again once all of them signaled.
//! 4. Values and errors are committed together with the exact dependencies
//!    of the final run, and waiting parents are signaled.
//!
//! When nothing is queued or running but roots are still building, the
//! roots are stuck on each other and the cycle detector is consulted.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::Instrument;

use super::env::Requests;
use super::function::FunctionRegistry;
use super::options::{CyclePolicy, EvaluationOptions, InterruptHandle};
use super::result::{EvaluationResult, EvaluationStats};
use super::scheduler::{Scheduler, WorkerReport};
use crate::cycle::{self, CycleInfo};
use crate::error::{ComputationError, ComputeError, ErrorInfo, EvaluationError, FailureKind};
use crate::graph::{Activation, BuildPhase, InMemoryGraph, NodeOutcome, NodeState, SignalOutcome};
use crate::invalidation::Invalidator;
use crate::node::{GroupedDeps, NodeKey, NodeValue};

/// Evaluate `roots` against `graph`.
///
/// Must be called from within a tokio runtime; node functions run on its
/// blocking pool.
pub async fn evaluate(
    graph: Arc<InMemoryGraph>,
    registry: Arc<FunctionRegistry>,
    roots: &[NodeKey],
    options: &EvaluationOptions,
    interrupt: &InterruptHandle,
) -> Result<EvaluationResult, EvaluationError> {
    let version = graph.advance_version();
    let span = tracing::info_span!("evaluate", version = version.raw(), roots = roots.len());
    let evaluator = Evaluator::new(graph, registry, options, interrupt);
    evaluator.run(roots).instrument(span).await
}

/// Work the coordinator still has to do outside of the workers.
#[derive(Debug)]
enum Step {
    /// Queue the node's function.
    Compute(NodeKey),
    /// Continue re-verifying a dirty node.
    Check(NodeKey),
    /// Signal the parents waiting on a finished node.
    Completed {
        key: NodeKey,
        outcome: NodeOutcome,
        waiters: Vec<NodeKey>,
    },
}

struct Evaluator<'a> {
    graph: Arc<InMemoryGraph>,
    scheduler: Scheduler,
    options: &'a EvaluationOptions,
    interrupt: &'a InterruptHandle,
    steps: VecDeque<Step>,
    /// Every node this evaluation started, in start order.
    activated: Vec<NodeKey>,
    /// Uncacheable values and transient errors, invalidated at the end.
    volatile: Vec<NodeKey>,
    cycles: Vec<CycleInfo>,
    stats: EvaluationStats,
    aborting: bool,
    interrupted: bool,
}

impl<'a> Evaluator<'a> {
    fn new(
        graph: Arc<InMemoryGraph>,
        registry: Arc<FunctionRegistry>,
        options: &'a EvaluationOptions,
        interrupt: &'a InterruptHandle,
    ) -> Self {
        let scheduler = Scheduler::new(Arc::clone(&graph), registry, options.max_parallelism);
        Self {
            graph,
            scheduler,
            options,
            interrupt,
            steps: VecDeque::new(),
            activated: Vec::new(),
            volatile: Vec::new(),
            cycles: Vec::new(),
            stats: EvaluationStats::default(),
            aborting: false,
            interrupted: false,
        }
    }

    async fn run(mut self, roots: &[NodeKey]) -> Result<EvaluationResult, EvaluationError> {
        let driven = self.drive(roots).await;
        self.conclude(roots, driven)
    }

    fn conclude(
        mut self,
        roots: &[NodeKey],
        driven: Result<(), EvaluationError>,
    ) -> Result<EvaluationResult, EvaluationError> {
        self.abandon_unfinished();
        if let Err(err) = driven {
            if let Err(invalidation) = self.invalidate_volatile() {
                tracing::warn!(%invalidation, "could not invalidate volatile nodes");
            }
            return Err(err);
        }
        self.finish(roots)
    }

    async fn drive(&mut self, roots: &[NodeKey]) -> Result<(), EvaluationError> {
        for root in roots {
            match self.graph.activate(root) {
                Activation::Done => self.stats.cache_hits += 1,
                Activation::Failed(_) => {
                    self.stats.cache_hits += 1;
                    if !self.options.keep_going && !self.aborting {
                        tracing::debug!(%root, "root failed in an earlier evaluation, stopping");
                        self.aborting = true;
                    }
                }
                Activation::Started(phase) => self.start(root.clone(), phase),
                Activation::InProgress => {}
            }
        }

        loop {
            self.drain()?;

            if !self.interrupted && self.interrupt.is_interrupted() {
                tracing::info!("evaluation interrupted");
                self.interrupted = true;
                self.aborting = true;
            }
            if self.aborting {
                self.scheduler.clear_ready();
            } else {
                self.scheduler.dispatch();
            }

            if self.scheduler.in_flight() == 0 && !self.scheduler.has_ready() {
                if self.aborting || !self.break_cycles(roots)? {
                    return Ok(());
                }
                continue;
            }

            match self.scheduler.next_report().await {
                Some(Ok(report)) => self.handle_report(report)?,
                Some(Err(err)) => return Err(EvaluationError::Runtime(err.into())),
                None => {}
            }
        }
    }

    fn start(&mut self, key: NodeKey, phase: BuildPhase) {
        self.activated.push(key.clone());
        let step = match phase {
            BuildPhase::Computing => Step::Compute(key),
            BuildPhase::CheckingDeps { .. } => Step::Check(key),
        };
        self.steps.push_back(step);
    }

    fn drain(&mut self) -> Result<(), EvaluationError> {
        while let Some(step) = self.steps.pop_front() {
            match step {
                Step::Compute(key) => {
                    if !self.aborting {
                        self.scheduler.enqueue(key);
                    }
                }
                Step::Check(key) => self.check_deps(&key)?,
                Step::Completed {
                    key,
                    outcome,
                    waiters,
                } => self.notify(&key, &outcome, waiters)?,
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Change pruning
    // ------------------------------------------------------------------------

    /// Re-verify the recorded dependencies of a dirty node, one group at a
    /// time, until one changed, a group is still pending, or all are clean.
    fn check_deps(&mut self, key: &NodeKey) -> Result<(), EvaluationError> {
        let Some(entry) = self.graph.get(key) else {
            return Ok(());
        };
        let deps = entry.direct_deps();
        let verified_at = entry.verified_at();

        loop {
            let Some(BuildPhase::CheckingDeps { group }) = self.graph.phase(key) else {
                return Ok(());
            };

            let Some(members) = deps.group(group) else {
                return self.verified_clean(key);
            };
            self.graph.add_temporary_dep_group(key, members.iter().cloned())?;

            let mut changed = false;
            let mut failed: Option<Arc<ErrorInfo>> = None;
            let mut waiting = false;
            for dep in &members {
                match self.graph.await_dep(key, dep)? {
                    Activation::Done => {
                        changed |= self
                            .graph
                            .get(dep)
                            .is_some_and(|dep_entry| dep_entry.changed_at() > verified_at);
                    }
                    Activation::Failed(error) => {
                        failed.get_or_insert(error);
                    }
                    Activation::Started(phase) => {
                        waiting = true;
                        self.start(dep.clone(), phase);
                    }
                    Activation::InProgress => waiting = true,
                }
                if (changed || failed.is_some()) && !waiting {
                    break;
                }
            }

            if waiting {
                // Resumed by `notify` once the group has signaled.
                return Ok(());
            }
            if let Some(error) = failed {
                if self.aborting {
                    let deps = entry.temporary_deps();
                    return self.fail(key, error, deps);
                }
                changed = true;
            }
            if changed {
                tracing::debug!(%key, "dependency changed, recomputing");
                self.graph.set_phase(key, BuildPhase::Computing)?;
                self.steps.push_back(Step::Compute(key.clone()));
                return Ok(());
            }
            self.graph
                .set_phase(key, BuildPhase::CheckingDeps { group: group + 1 })?;
        }
    }

    fn verified_clean(&mut self, key: &NodeKey) -> Result<(), EvaluationError> {
        let value = self.graph.get(key).and_then(|entry| entry.last_value());
        let Some(value) = value else {
            // Nothing to keep; compute it.
            self.graph.set_phase(key, BuildPhase::Computing)?;
            self.steps.push_back(Step::Compute(key.clone()));
            return Ok(());
        };
        let committed = self.graph.mark_clean(key)?;
        self.stats.pruned += 1;
        tracing::debug!(%key, "verified clean");
        self.steps.push_back(Step::Completed {
            key: key.clone(),
            outcome: Ok(value),
            waiters: committed.waiters,
        });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Worker reports
    // ------------------------------------------------------------------------

    fn handle_report(&mut self, report: WorkerReport) -> Result<(), EvaluationError> {
        self.stats.computations += 1;
        let WorkerReport {
            key,
            result,
            requests,
        } = report;
        let Requests {
            requested,
            missing,
            failed,
        } = requests;

        if let Some(dep) = failed {
            if let Some(error) = self.graph.get(&dep).and_then(|entry| entry.error()) {
                return self.fail(&key, error, requested);
            }
        }

        match result {
            Ok(value) if missing.is_empty() => self.commit(&key, value, requested),
            // A value computed while dependencies were missing is a restart.
            Ok(_) | Err(ComputeError::Restart) => {
                if missing.is_empty() {
                    let error =
                        ComputationError::new("restart requested without missing dependencies");
                    let error = Arc::new(ErrorInfo::computation(key.clone(), error));
                    return self.fail(&key, error, requested);
                }
                self.restart(&key, requested, missing)
            }
            Err(ComputeError::Failed(error)) => {
                tracing::debug!(%key, %error, "node function failed");
                self.fail(&key, Arc::new(ErrorInfo::computation(key.clone(), error)), requested)
            }
        }
    }

    fn commit(
        &mut self,
        key: &NodeKey,
        value: NodeValue,
        deps: GroupedDeps,
    ) -> Result<(), EvaluationError> {
        if !value.is_cacheable() {
            self.volatile.push(key.clone());
        }
        let committed = self.graph.set_value(key, value.clone(), deps)?;
        tracing::debug!(%key, changed = committed.changed, "node computed");
        self.steps.push_back(Step::Completed {
            key: key.clone(),
            outcome: Ok(value),
            waiters: committed.waiters,
        });
        Ok(())
    }

    fn restart(
        &mut self,
        key: &NodeKey,
        requested: GroupedDeps,
        missing: Vec<NodeKey>,
    ) -> Result<(), EvaluationError> {
        self.stats.restarts += 1;
        tracing::debug!(%key, missing = missing.len(), "restarting after missing dependencies");
        self.graph.set_temporary_deps(key, requested)?;
        if self.aborting {
            return Ok(());
        }

        let mut failed = None;
        for dep in &missing {
            match self.graph.await_dep(key, dep)? {
                Activation::Started(phase) => self.start(dep.clone(), phase),
                Activation::Failed(error) => {
                    failed.get_or_insert(error);
                }
                Activation::Done | Activation::InProgress => {}
            }
        }

        if let Some(error) = failed {
            let deps = self.temporary_deps(key);
            return self.fail(key, error, deps);
        }
        if self.graph.pending(key).is_some_and(|(pending, _)| pending == 0) {
            self.scheduler.enqueue(key.clone());
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------------

    fn fail(
        &mut self,
        key: &NodeKey,
        error: Arc<ErrorInfo>,
        deps: GroupedDeps,
    ) -> Result<(), EvaluationError> {
        if error.is_transient() {
            self.volatile.push(key.clone());
        }
        let committed = self.graph.set_error(key, Arc::clone(&error), deps)?;
        if !self.options.keep_going && !self.aborting {
            tracing::debug!(%key, "stopping after first failure");
            self.aborting = true;
        }
        self.steps.push_back(Step::Completed {
            key: key.clone(),
            outcome: Err(error),
            waiters: committed.waiters,
        });
        Ok(())
    }

    fn notify(
        &mut self,
        key: &NodeKey,
        outcome: &NodeOutcome,
        waiters: Vec<NodeKey>,
    ) -> Result<(), EvaluationError> {
        for parent in waiters {
            let signal = self.graph.signal_dep(&parent, key, outcome)?;
            if signal == SignalOutcome::Stale {
                continue;
            }
            let phase = self.graph.phase(&parent);

            // A failed dependency fails a computing parent without running
            // it again. Dirty parents recompute instead, unless the
            // evaluation is stopping.
            if let Err(error) = outcome {
                if self.aborting || phase == Some(BuildPhase::Computing) {
                    let deps = self.temporary_deps(&parent);
                    self.fail(&parent, Arc::clone(error), deps)?;
                    continue;
                }
            }

            if signal == SignalOutcome::AllSignaled {
                match phase {
                    Some(BuildPhase::CheckingDeps { .. }) => {
                        self.steps.push_back(Step::Check(parent))
                    }
                    Some(BuildPhase::Computing) => self.steps.push_back(Step::Compute(parent)),
                    None => {}
                }
            }
        }
        Ok(())
    }

    fn temporary_deps(&self, key: &NodeKey) -> GroupedDeps {
        self.graph
            .get(key)
            .map(|entry| entry.temporary_deps())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Cycles
    // ------------------------------------------------------------------------

    /// Fail the members of the cycles that keep roots from finishing.
    ///
    /// Returns whether any node was failed, i.e. whether the evaluation can
    /// make progress again.
    fn break_cycles(&mut self, roots: &[NodeKey]) -> Result<bool, EvaluationError> {
        let stuck: Vec<NodeKey> = roots
            .iter()
            .filter(|root| {
                self.graph
                    .get(root)
                    .is_some_and(|entry| entry.state() == NodeState::Building)
            })
            .cloned()
            .collect();
        if stuck.is_empty() {
            return Ok(false);
        }

        let cycles = cycle::find_cycles(&self.graph, &stuck);
        if cycles.is_empty() {
            tracing::warn!(stuck = stuck.len(), "evaluation stalled without a cycle");
            return Ok(false);
        }

        let mut broken = false;
        for info in &cycles {
            tracing::warn!(cycle = %info, "dependency cycle detected");
            for member in &info.cycle {
                let building = self
                    .graph
                    .get(member)
                    .is_some_and(|entry| entry.state() == NodeState::Building);
                if building {
                    let error = Arc::new(ErrorInfo::cycle(member.clone(), info.clone()));
                    let deps = self.temporary_deps(member);
                    self.fail(member, error, deps)?;
                    broken = true;
                }
            }
        }
        for info in cycles {
            if !self.cycles.contains(&info) {
                self.cycles.push(info);
            }
        }
        Ok(broken)
    }

    // ------------------------------------------------------------------------
    // Wrap-up
    // ------------------------------------------------------------------------

    fn abandon_unfinished(&mut self) {
        let abandoned = self
            .activated
            .iter()
            .rev()
            .filter(|key| self.graph.abandon(key))
            .count();
        if abandoned > 0 {
            tracing::debug!(abandoned, "restored unfinished nodes");
        }
    }

    /// Uncacheable values and transient errors never outlive the evaluation
    /// that produced them, whether or not it finished.
    fn invalidate_volatile(&mut self) -> Result<(), EvaluationError> {
        if self.volatile.is_empty() {
            return Ok(());
        }
        Invalidator::new(&self.graph).invalidate(self.volatile.drain(..))?;
        Ok(())
    }

    fn finish(mut self, roots: &[NodeKey]) -> Result<EvaluationResult, EvaluationError> {
        let mut result = EvaluationResult::default();
        for root in roots {
            let Some(entry) = self.graph.get(root) else {
                continue;
            };
            if let Some(value) = entry.value() {
                result.values.insert(root.clone(), value);
            } else if let Some(error) = entry.error() {
                if let FailureKind::Cycle(info) = error.kind() {
                    if !self.cycles.contains(info) {
                        self.cycles.push(info.clone());
                    }
                }
                result.errors.insert(root.clone(), error);
            }
        }
        self.invalidate_volatile()?;

        result.cycles = self.cycles;
        result.stats = self.stats;
        tracing::info!(
            values = result.values.len(),
            errors = result.errors.len(),
            cycles = result.cycles.len(),
            computations = result.stats.computations,
            restarts = result.stats.restarts,
            pruned = result.stats.pruned,
            cache_hits = result.stats.cache_hits,
            peak_parallelism = self.scheduler.peak(),
            "evaluation finished"
        );

        if self.interrupted {
            self.interrupt.reset();
            return Err(EvaluationError::Interrupted);
        }
        if self.options.cycle_policy == CyclePolicy::Fail && !result.cycles.is_empty() {
            return Err(EvaluationError::Cycle {
                cycles: result.cycles,
            });
        }
        Ok(result)
    }
}
