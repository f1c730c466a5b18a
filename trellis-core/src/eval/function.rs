//! Node functions and the registry that dispatches to them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::env::Environment;
use crate::error::ComputeError;
use crate::node::{FunctionName, NodeKey, NodeValue};

/// Computes the value of every node of one kind.
///
/// Implementations must be deterministic and free of side effects outside
/// of the [`Environment`]: a computation that returns
/// [`ComputeError::Restart`] is called again from the start once the
/// dependencies it asked for are available.
pub trait NodeFunction: Send + Sync {
    /// Compute the value of `key`.
    fn compute(&self, key: &NodeKey, env: &mut Environment<'_>) -> Result<NodeValue, ComputeError>;
}

impl<F> NodeFunction for F
where
    F: Fn(&NodeKey, &mut Environment<'_>) -> Result<NodeValue, ComputeError> + Send + Sync,
{
    fn compute(&self, key: &NodeKey, env: &mut Environment<'_>) -> Result<NodeValue, ComputeError> {
        self(key, env)
    }
}

/// Maps each [`FunctionName`] to the function that computes it.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<FunctionName, Arc<dyn NodeFunction>>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure for keys named `name`, replacing any previous
    /// function.
    pub fn register<F>(&mut self, name: impl Into<FunctionName>, function: F) -> &mut Self
    where
        F: Fn(&NodeKey, &mut Environment<'_>) -> Result<NodeValue, ComputeError>
            + Send
            + Sync
            + 'static,
    {
        self.register_function(name, function)
    }

    /// Register any [`NodeFunction`] implementation for keys named `name`.
    pub fn register_function<F>(&mut self, name: impl Into<FunctionName>, function: F) -> &mut Self
    where
        F: NodeFunction + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    /// Builder form of [`FunctionRegistry::register`].
    pub fn with<F>(mut self, name: impl Into<FunctionName>, function: F) -> Self
    where
        F: Fn(&NodeKey, &mut Environment<'_>) -> Result<NodeValue, ComputeError>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, function);
        self
    }

    /// The function for `name`.
    pub fn get(&self, name: &FunctionName) -> Option<Arc<dyn NodeFunction>> {
        self.functions.get(name).cloned()
    }

    /// Whether a function is registered for `name`.
    pub fn contains(&self, name: &FunctionName) -> bool {
        self.functions.contains_key(name)
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether no function is registered.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.functions.keys().map(FunctionName::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_closures() {
        let registry = FunctionRegistry::new()
            .with("leaf", |key, _env| Ok(NodeValue::text(key.argument())));

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&FunctionName::from("leaf")));
        assert!(registry.get(&FunctionName::from("parse")).is_none());
        assert_eq!(format!("{registry:?}"), "FunctionRegistry { functions: [\"leaf\"] }");
    }

    struct Constant(&'static str);

    impl NodeFunction for Constant {
        fn compute(
            &self,
            _key: &NodeKey,
            _env: &mut Environment<'_>,
        ) -> Result<NodeValue, ComputeError> {
            Ok(NodeValue::text(self.0))
        }
    }

    #[test]
    fn registers_trait_objects() {
        let mut registry = FunctionRegistry::new();
        registry
            .register_function("const", Constant("c"))
            .register("leaf", |key, _env| Ok(NodeValue::text(key.argument())));
        assert_eq!(registry.len(), 2);
    }
}
