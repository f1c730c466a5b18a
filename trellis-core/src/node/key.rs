//! Node Keys
//!
//! A [`NodeKey`] names one unit of incremental computation, for example
//! "the parsed form of file X" or "the result of executing action Z".
//! It is made of a [`FunctionName`] discriminant, which selects the function
//! that computes the node, and an opaque argument payload.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// The discriminant of a [`NodeKey`].
///
/// Selects which registered function computes nodes of this kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionName(Arc<str>);

impl FunctionName {
    /// Create a function name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FunctionName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for FunctionName {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier for a node in the evaluation graph.
///
/// Keys are cheap to clone (two reference-counted strings) and totally
/// ordered. The ordering is used when two entries must be locked together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    function: FunctionName,
    argument: Arc<str>,
}

impl NodeKey {
    /// Create a key for `function` applied to `argument`.
    pub fn new(function: impl Into<FunctionName>, argument: impl Into<Arc<str>>) -> Self {
        Self {
            function: function.into(),
            argument: argument.into(),
        }
    }

    /// The function that computes this node.
    pub fn function(&self) -> &FunctionName {
        &self.function
    }

    /// The argument payload.
    pub fn argument(&self) -> &str {
        &self.argument
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.function, self.argument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_compare_by_function_and_argument() {
        let a = NodeKey::new("parse", "file1");
        let b = NodeKey::new("parse", "file1");
        let c = NodeKey::new("leaf", "file1");

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn ordering_is_by_function_first() {
        let leaf = NodeKey::new("leaf", "z");
        let parse = NodeKey::new("parse", "a");
        assert!(leaf < parse);
    }

    #[test]
    fn display_joins_with_colon() {
        let key = NodeKey::new("parse", "file1");
        assert_eq!(key.to_string(), "parse:file1");
        assert_eq!(key.function().as_str(), "parse");
        assert_eq!(key.argument(), "file1");
    }
}
