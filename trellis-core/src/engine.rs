//! Engine
//!
//! The entry point for embedders. An [`Engine`] owns one graph, the
//! registry of node functions, and the configuration, and serializes the
//! two things that may mutate the graph: invalidation between evaluations
//! and the evaluations themselves (both take `&mut self`).

use std::path::Path;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{EvaluationError, GraphError, SnapshotError};
use crate::eval::{self, EvaluationOptions, EvaluationResult, FunctionRegistry, InterruptHandle};
use crate::graph::snapshot::{self, SnapshotStats};
use crate::graph::InMemoryGraph;
use crate::invalidation::{InvalidationSummary, Invalidator};
use crate::node::{NodeKey, NodeValue};

/// Incremental evaluation engine.
#[derive(Debug)]
pub struct Engine {
    graph: Arc<InMemoryGraph>,
    registry: Arc<FunctionRegistry>,
    config: EngineConfig,
    interrupt: InterruptHandle,
}

impl Engine {
    /// Create an engine with an empty graph and default configuration.
    pub fn new(registry: FunctionRegistry) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    /// Create an engine with an empty graph.
    pub fn with_config(registry: FunctionRegistry, config: EngineConfig) -> Self {
        Self::from_parts(InMemoryGraph::new(), registry, config)
    }

    /// Create an engine, starting from the configured snapshot if it exists.
    pub fn open(registry: FunctionRegistry, config: EngineConfig) -> Result<Self, SnapshotError> {
        match config.snapshot_path.clone() {
            Some(path) if path.exists() => {
                let (graph, _) = snapshot::load(&path)?;
                Ok(Self::from_parts(graph, registry, config))
            }
            _ => Ok(Self::with_config(registry, config)),
        }
    }

    /// Create an engine from a snapshot written by [`Engine::save_snapshot`].
    pub fn load_snapshot(
        path: impl AsRef<Path>,
        registry: FunctionRegistry,
    ) -> Result<Self, SnapshotError> {
        let (graph, _) = snapshot::load(path.as_ref())?;
        Ok(Self::from_parts(graph, registry, EngineConfig::default()))
    }

    fn from_parts(graph: InMemoryGraph, registry: FunctionRegistry, config: EngineConfig) -> Self {
        Self {
            graph: Arc::new(graph),
            registry: Arc::new(registry),
            config,
            interrupt: InterruptHandle::new(),
        }
    }

    /// The graph, for inspection.
    pub fn graph(&self) -> &InMemoryGraph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Options derived from the configuration.
    pub fn options(&self) -> EvaluationOptions {
        self.config.evaluation_options()
    }

    /// A handle that interrupts the running (or next) evaluation.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Evaluate `roots` on a runtime owned by this call.
    ///
    /// Must not be called from within a tokio runtime; use
    /// [`Engine::evaluate_async`] there.
    pub fn evaluate(
        &mut self,
        roots: &[NodeKey],
        options: &EvaluationOptions,
    ) -> Result<EvaluationResult, EvaluationError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.evaluate_async(roots, options))
    }

    /// Evaluate `roots` on the current tokio runtime.
    pub async fn evaluate_async(
        &mut self,
        roots: &[NodeKey],
        options: &EvaluationOptions,
    ) -> Result<EvaluationResult, EvaluationError> {
        eval::evaluate(
            Arc::clone(&self.graph),
            Arc::clone(&self.registry),
            roots,
            options,
            &self.interrupt,
        )
        .await
    }

    /// Mark changed leaves and dirty everything that depends on them.
    pub fn invalidate<I>(&mut self, changed: I) -> Result<InvalidationSummary, GraphError>
    where
        I: IntoIterator<Item = NodeKey>,
    {
        Invalidator::new(&self.graph).invalidate(changed)
    }

    /// Set a leaf value from outside and dirty its dependents if it changed.
    pub fn inject(
        &mut self,
        key: NodeKey,
        value: NodeValue,
    ) -> Result<InvalidationSummary, GraphError> {
        Invalidator::new(&self.graph).inject(key, value)
    }

    /// Delete `keys` from the graph.
    ///
    /// Nodes that depended on an evicted key are recomputed by the next
    /// evaluation that needs them.
    pub fn evict<I>(&mut self, keys: I) -> Result<InvalidationSummary, GraphError>
    where
        I: IntoIterator<Item = NodeKey>,
    {
        let mut dependents = Vec::new();
        for key in keys {
            dependents.extend(self.graph.remove(&key)?);
        }
        dependents.retain(|key| self.graph.contains(key));
        tracing::debug!(dependents = dependents.len(), "evicted nodes");
        Invalidator::new(&self.graph).invalidate(dependents)
    }

    /// Delete every node the given roots do not depend on.
    pub fn retain_reachable(&mut self, roots: &[NodeKey]) -> Result<usize, GraphError> {
        let removed = self.graph.retain_reachable(roots)?;
        tracing::debug!(removed, "dropped unreachable nodes");
        Ok(removed)
    }

    /// The chain from a failed node to the node its failure originated in.
    pub fn error_chain(&self, key: &NodeKey) -> Vec<NodeKey> {
        self.graph.error_chain(key)
    }

    /// Write the cacheable part of the graph to `path`.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<SnapshotStats, SnapshotError> {
        snapshot::save(&self.graph, path.as_ref())
    }

    /// Write a snapshot to the configured path, if there is one.
    pub fn save(&self) -> Result<Option<SnapshotStats>, SnapshotError> {
        self.config
            .snapshot_path
            .as_deref()
            .map(|path| snapshot::save(&self.graph, path))
            .transpose()
    }
}
