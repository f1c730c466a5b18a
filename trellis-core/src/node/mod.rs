//! Node Model
//!
//! Identity and content types for graph nodes.
//!
//! - [`NodeKey`]: what to compute (a [`FunctionName`] plus an argument)
//! - [`NodeValue`]: the shared, immutable result
//! - [`GroupedDeps`]: the ordered dependency list recorded for a node

mod deps;
mod key;
mod value;

pub use deps::GroupedDeps;
pub use key::{FunctionName, NodeKey};
pub use value::NodeValue;
