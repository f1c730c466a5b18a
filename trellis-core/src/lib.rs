//! Trellis Core
//!
//! An incremental build-graph evaluation engine. Given a graph of
//! interdependent computation nodes, it works out which nodes need
//! (re)computation, runs them in dependency order with bounded parallelism,
//! caches their results, and after a change recomputes only what the change
//! actually affected.
//!
//! # Architecture
//!
//! - `node`: keys, values and grouped dependency lists
//! - `graph`: the persistent node store and its snapshots
//! - `eval`: node functions, the compute environment, the worker pool and
//!   the evaluator
//! - `invalidation`: dirty propagation through reverse dependencies
//! - `cycle`: dependency cycle detection
//! - `engine`: the embedding facade tying the pieces together
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{Engine, EvaluationOptions, FunctionRegistry, NodeKey, NodeValue};
//!
//! let registry = FunctionRegistry::new()
//!     .with("leaf", |key, _env| Ok(NodeValue::text(key.argument())))
//!     .with("parse", |key, env| {
//!         let source = env.require(&NodeKey::new("leaf", key.argument()))?;
//!         Ok(NodeValue::new(source.as_bytes().to_vec()))
//!     });
//!
//! let mut engine = Engine::new(registry);
//! let root = NodeKey::new("parse", "file1");
//! let result = engine.evaluate(&[root.clone()], &EvaluationOptions::default())?;
//!
//! // The leaf recomputes to the same value, so `parse` is kept as is.
//! engine.invalidate([NodeKey::new("leaf", "file1")])?;
//! let again = engine.evaluate(&[root], &EvaluationOptions::default())?;
//! assert_eq!(again.stats.pruned, 1);
//! ```

pub mod config;
pub mod cycle;
pub mod engine;
pub mod error;
pub mod eval;
pub mod graph;
pub mod invalidation;
pub mod node;

pub use config::EngineConfig;
pub use cycle::CycleInfo;
pub use engine::Engine;
pub use error::{
    ComputationError, ComputeError, ConfigError, ErrorInfo, EvaluationError, FailureKind,
    GraphError, SnapshotError, ValueError,
};
pub use eval::{
    CyclePolicy, Environment, EvaluationOptions, EvaluationResult, EvaluationStats,
    FunctionRegistry, InterruptHandle, NodeFunction,
};
pub use graph::{InMemoryGraph, NodeState};
pub use invalidation::{InvalidationSummary, Invalidator};
pub use node::{FunctionName, GroupedDeps, NodeKey, NodeValue};
