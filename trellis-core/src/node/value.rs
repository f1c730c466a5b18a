//! Node Values
//!
//! A [`NodeValue`] is the immutable result of computing a node. Values are
//! reference counted: every dependent that reads a value shares the same
//! allocation, and the graph keeps it alive for as long as the entry exists.
//!
//! Values are opaque bytes. Equality is byte equality, which is what the
//! evaluator uses to decide whether a recomputed node actually changed.
//! Typed values go through [`NodeValue::encode`] and [`NodeValue::decode`],
//! which use MessagePack.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ValueError;

/// Immutable, shared result of a node computation.
#[derive(Clone, Serialize, Deserialize)]
pub struct NodeValue {
    bytes: Arc<[u8]>,

    /// Whether this value may be reused by later evaluations.
    ///
    /// Non-hermetic results (timestamps, environment probes) set this to
    /// `false`. Such values are still shared within one evaluation but are
    /// invalidated when it ends and never written to snapshots.
    cacheable: bool,
}

impl NodeValue {
    /// Create a cacheable value from raw bytes.
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
            cacheable: true,
        }
    }

    /// Create a cacheable value holding UTF-8 text.
    pub fn text(text: &str) -> Self {
        Self::new(text.as_bytes())
    }

    /// Encode a typed value with MessagePack.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, ValueError> {
        let bytes = rmp_serde::to_vec(value)?;
        Ok(Self::new(bytes))
    }

    /// Decode a typed value previously stored with [`NodeValue::encode`].
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ValueError> {
        Ok(rmp_serde::from_slice(&self.bytes)?)
    }

    /// Mark this value as not reusable across evaluations.
    pub fn uncacheable(mut self) -> Self {
        self.cacheable = false;
        self
    }

    /// Whether later evaluations may reuse this value.
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The bytes as UTF-8 text, if they are valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    /// Size of the payload in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether both values share one allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

impl PartialEq for NodeValue {
    fn eq(&self, other: &Self) -> bool {
        self.cacheable == other.cacheable && (self.ptr_eq(other) || self.bytes == other.bytes)
    }
}

impl Eq for NodeValue {}

impl fmt::Debug for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("NodeValue");
        match self.as_text() {
            Some(text) => s.field("text", &text),
            None => s.field("len", &self.len()),
        };
        s.field("cacheable", &self.cacheable).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_byte_equality() {
        let a = NodeValue::text("v1");
        let b = NodeValue::new(b"v1".to_vec());
        assert_eq!(a, b);
        assert!(!a.ptr_eq(&b));
        assert_ne!(a, NodeValue::text("v2"));
    }

    #[test]
    fn clones_share_the_allocation() {
        let a = NodeValue::text("shared");
        let b = a.clone();
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn typed_round_trip() {
        let value = NodeValue::encode(&vec![1u32, 2, 3]).unwrap();
        let decoded: Vec<u32> = value.decode().unwrap();
        assert_eq!(decoded, vec![1, 2, 3]);
    }

    #[test]
    fn decoding_the_wrong_type_fails() {
        let value = NodeValue::text("not msgpack for a map");
        let decoded: Result<std::collections::HashMap<String, u64>, _> = value.decode();
        assert!(decoded.is_err());
    }

    #[test]
    fn cacheability_is_part_of_identity() {
        let a = NodeValue::text("now");
        let b = NodeValue::text("now").uncacheable();
        assert!(a.is_cacheable());
        assert!(!b.is_cacheable());
        assert_ne!(a, b);
    }
}
