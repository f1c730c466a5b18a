//! Evaluation
//!
//! Everything that runs node functions: the function contract and
//! registry, the environment a function reads its dependencies through,
//! the bounded worker pool, and the coordinator that drives a set of roots
//! to completion.
//!
//! # Design Decisions
//!
//! 1. Functions never block on a dependency. A function that needs
//!    something not computed yet returns [`ComputeError::Restart`] and is
//!    called again from the start later. The graph memoizes everything it
//!    already got, so restarts only repeat the function's own work.
//!
//! 2. Workers read the graph; only the coordinator writes it. There is no
//!    lock held across a function call.
//!
//! [`ComputeError::Restart`]: crate::error::ComputeError::Restart

mod env;
mod evaluator;
mod function;
mod options;
mod result;
mod scheduler;

pub use env::Environment;
pub use evaluator::evaluate;
pub use function::{FunctionRegistry, NodeFunction};
pub use options::{default_parallelism, CyclePolicy, EvaluationOptions, InterruptHandle};
pub use result::{EvaluationResult, EvaluationStats};
