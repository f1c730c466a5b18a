//! Error types.
//!
//! Node-level failures ([`ComputationError`], [`ErrorInfo`]) are data: they
//! are cached in the graph and handed to every dependent. Engine-level
//! failures ([`EvaluationError`], [`GraphError`], ...) are returned from API
//! calls.

use std::fmt;

use thiserror::Error;

use crate::cycle::CycleInfo;
use crate::node::NodeKey;

/// A domain failure reported by a node function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ComputationError {
    message: String,
    transient: bool,
}

impl ComputationError {
    /// A deterministic failure. It is cached like a value.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }

    /// A failure that may not repeat (I/O hiccup, timeout).
    ///
    /// Transient failures are retried by the next evaluation.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the failure should be retried by the next evaluation.
    pub fn is_transient(&self) -> bool {
        self.transient
    }
}

/// What a node function returns instead of a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputeError {
    /// Some requested dependency is not available yet.
    ///
    /// The evaluator computes the missing dependencies and calls the
    /// function again from the start.
    #[error("dependencies missing, restart requested")]
    Restart,

    /// The computation failed.
    #[error(transparent)]
    Failed(#[from] ComputationError),
}

impl From<ValueError> for ComputeError {
    fn from(err: ValueError) -> Self {
        ComputeError::Failed(ComputationError::new(err.to_string()))
    }
}

/// The originating failure behind an [`ErrorInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// A node function failed.
    Computation(ComputationError),
    /// The node is part of a dependency cycle.
    Cycle(CycleInfo),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Computation(err) => write!(f, "{err}"),
            FailureKind::Cycle(cycle) => write!(f, "{cycle}"),
        }
    }
}

/// A node failure attributed to the key where it originated.
///
/// Nodes that fail because a dependency failed share the dependency's
/// `ErrorInfo`; the chain between them is recovered from the graph edges
/// with [`InMemoryGraph::error_chain`](crate::graph::InMemoryGraph::error_chain).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{root_cause}: {kind}")]
pub struct ErrorInfo {
    root_cause: NodeKey,
    kind: FailureKind,
}

impl ErrorInfo {
    /// A failure of `key`'s own function.
    pub fn computation(key: NodeKey, error: ComputationError) -> Self {
        Self {
            root_cause: key,
            kind: FailureKind::Computation(error),
        }
    }

    /// `key` is a member of `cycle`.
    pub fn cycle(key: NodeKey, cycle: CycleInfo) -> Self {
        Self {
            root_cause: key,
            kind: FailureKind::Cycle(cycle),
        }
    }

    /// The key whose computation originated the failure.
    pub fn root_cause(&self) -> &NodeKey {
        &self.root_cause
    }

    /// The originating failure.
    pub fn kind(&self) -> &FailureKind {
        &self.kind
    }

    /// Whether the failure is a cycle.
    pub fn is_cycle(&self) -> bool {
        matches!(self.kind, FailureKind::Cycle(_))
    }

    /// Whether the next evaluation should retry.
    pub fn is_transient(&self) -> bool {
        matches!(&self.kind, FailureKind::Computation(err) if err.is_transient())
    }
}

/// Misuse of the graph store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The operation needs the entry to be building.
    #[error("node {key} is not building")]
    NotBuilding { key: NodeKey },

    /// Building entries cannot be invalidated, injected or removed.
    #[error("node {key} is building and cannot be modified")]
    Busy { key: NodeKey },

    /// No entry exists for the key.
    #[error("no entry for node {key}")]
    MissingEntry { key: NodeKey },
}

/// Typed value encoding failures.
#[derive(Debug, Error)]
pub enum ValueError {
    /// The value could not be encoded.
    #[error("failed to encode value: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// The bytes do not decode to the requested type.
    #[error("failed to decode value: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Snapshot persistence failures.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Reading or writing the snapshot file failed.
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The graph could not be encoded.
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// The file is not a valid snapshot.
    #[error("failed to decode snapshot: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The snapshot was written by an incompatible format version.
    #[error("unsupported snapshot format {found}, expected {expected}")]
    UnsupportedFormat { found: u32, expected: u32 },

    /// Rebuilding the graph from the snapshot failed.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Invalid engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable holds an unusable value.
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    /// A JSON configuration document failed to parse.
    #[error("invalid configuration document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of an evaluation as a whole.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// The evaluation was interrupted. Finished nodes stay cached.
    #[error("evaluation interrupted")]
    Interrupted,

    /// Cycles were found and the options ask to fail on them.
    #[error(
        "dependency cycle detected: {}",
        .cycles.first().map(ToString::to_string).unwrap_or_default()
    )]
    Cycle { cycles: Vec<CycleInfo> },

    /// The graph store rejected an operation.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The async runtime could not be started.
    #[error("failed to start evaluation runtime: {0}")]
    Runtime(#[from] std::io::Error),
}
