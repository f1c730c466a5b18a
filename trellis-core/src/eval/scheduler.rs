//! Worker Scheduler
//!
//! Runs node functions on tokio's blocking pool while the coordinator keeps
//! ownership of every graph transition.
//!
//! # Design Decisions
//!
//! 1. Node functions are synchronous and may be CPU-bound, so each one runs
//!    in `spawn_blocking`. The coordinator awaits their reports on a
//!    `JoinSet`.
//!
//! 2. The scheduler bounds the number of functions in flight itself. The
//!    blocking pool would happily run hundreds.
//!
//! 3. A key is never queued twice, and never queued while it is running.

use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};

use super::env::{Environment, Requests};
use super::function::{FunctionRegistry, NodeFunction};
use crate::error::{ComputationError, ComputeError};
use crate::graph::InMemoryGraph;
use crate::node::{NodeKey, NodeValue};

/// What one run of a node function produced.
#[derive(Debug)]
pub(crate) struct WorkerReport {
    pub(crate) key: NodeKey,
    pub(crate) result: Result<NodeValue, ComputeError>,
    pub(crate) requests: Requests,
}

/// Ready queue and bounded worker pool.
pub(crate) struct Scheduler {
    graph: Arc<InMemoryGraph>,
    registry: Arc<FunctionRegistry>,
    ready: VecDeque<NodeKey>,
    queued: HashSet<NodeKey>,
    in_flight: HashSet<NodeKey>,
    workers: JoinSet<WorkerReport>,
    max_parallelism: usize,
    peak: usize,
}

impl Scheduler {
    pub(crate) fn new(
        graph: Arc<InMemoryGraph>,
        registry: Arc<FunctionRegistry>,
        max_parallelism: usize,
    ) -> Self {
        Self {
            graph,
            registry,
            ready: VecDeque::new(),
            queued: HashSet::new(),
            in_flight: HashSet::new(),
            workers: JoinSet::new(),
            max_parallelism: max_parallelism.max(1),
            peak: 0,
        }
    }

    /// Queue `key` for computation. Returns `false` if it is already queued
    /// or running.
    pub(crate) fn enqueue(&mut self, key: NodeKey) -> bool {
        if self.in_flight.contains(&key) || !self.queued.insert(key.clone()) {
            return false;
        }
        self.ready.push_back(key);
        true
    }

    /// Start queued computations while worker slots are free.
    pub(crate) fn dispatch(&mut self) -> usize {
        let mut started = 0;
        while self.in_flight.len() < self.max_parallelism {
            let Some(key) = self.ready.pop_front() else {
                break;
            };
            self.queued.remove(&key);
            self.in_flight.insert(key.clone());

            let graph = Arc::clone(&self.graph);
            let function = self.registry.get(key.function());
            self.workers.spawn_blocking(move || run(&graph, function, key));
            started += 1;
        }
        self.peak = self.peak.max(self.in_flight.len());
        started
    }

    /// Wait for the next computation to finish.
    ///
    /// Returns `None` when nothing is running.
    pub(crate) async fn next_report(&mut self) -> Option<Result<WorkerReport, JoinError>> {
        let joined = self.workers.join_next().await?;
        if let Ok(report) = &joined {
            self.in_flight.remove(&report.key);
        }
        Some(joined)
    }

    /// Drop every queued key that has not started. Returns them.
    pub(crate) fn clear_ready(&mut self) -> Vec<NodeKey> {
        self.queued.clear();
        self.ready.drain(..).collect()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub(crate) fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Most computations that ran at the same time.
    pub(crate) fn peak(&self) -> usize {
        self.peak
    }
}

/// Run one attempt of `key` on the calling thread.
fn run(
    graph: &InMemoryGraph,
    function: Option<Arc<dyn NodeFunction>>,
    key: NodeKey,
) -> WorkerReport {
    let mut env = Environment::new(graph, key.clone());
    let result = match function {
        Some(function) => {
            match panic::catch_unwind(AssertUnwindSafe(|| function.compute(&key, &mut env))) {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::warn!(%key, %message, "node function panicked");
                    Err(ComputationError::new(format!("computation panicked: {message}")).into())
                }
            }
        }
        None => Err(ComputationError::new(format!(
            "no function registered for {}",
            key.function()
        ))
        .into()),
    };
    WorkerReport {
        key,
        result,
        requests: env.into_requests(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn key(name: &str) -> NodeKey {
        NodeKey::new("work", name)
    }

    fn scheduler(registry: FunctionRegistry, max_parallelism: usize) -> Scheduler {
        Scheduler::new(Arc::new(InMemoryGraph::new()), Arc::new(registry), max_parallelism)
    }

    #[test]
    fn enqueue_skips_duplicates() {
        let mut scheduler = scheduler(FunctionRegistry::new(), 1);
        assert!(scheduler.enqueue(key("a")));
        assert!(!scheduler.enqueue(key("a")));
        assert!(scheduler.has_ready());
        assert_eq!(scheduler.clear_ready(), vec![key("a")]);
        assert!(!scheduler.has_ready());
    }

    #[tokio::test]
    async fn never_exceeds_max_parallelism() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (running_fn, peak_fn) = (Arc::clone(&running), Arc::clone(&peak));
        let registry = FunctionRegistry::new().with("work", move |key, _env| {
            let now = running_fn.fetch_add(1, Ordering::SeqCst) + 1;
            peak_fn.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(10));
            running_fn.fetch_sub(1, Ordering::SeqCst);
            Ok(NodeValue::text(key.argument()))
        });

        let mut scheduler = scheduler(registry, 2);
        for i in 0..6 {
            scheduler.enqueue(key(&i.to_string()));
        }

        let mut finished = 0;
        loop {
            scheduler.dispatch();
            let Some(report) = scheduler.next_report().await else {
                break;
            };
            assert!(report.unwrap().result.is_ok());
            finished += 1;
        }

        assert_eq!(finished, 6);
        assert_eq!(scheduler.peak(), 2);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn panics_and_unknown_functions_become_failures() {
        let registry = FunctionRegistry::new().with("work", |_key, _env| panic!("exploded"));
        let mut scheduler = scheduler(registry, 2);
        scheduler.enqueue(key("a"));
        scheduler.enqueue(NodeKey::new("unknown", "b"));
        scheduler.dispatch();

        let mut messages = Vec::new();
        while let Some(report) = scheduler.next_report().await {
            match report.unwrap().result {
                Err(ComputeError::Failed(err)) => messages.push(err.message().to_string()),
                other => panic!("unexpected result {other:?}"),
            }
        }
        messages.sort();
        assert_eq!(
            messages,
            vec!["computation panicked: exploded", "no function registered for unknown"]
        );
    }
}
