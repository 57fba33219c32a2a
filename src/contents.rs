//! The contents capability.
//!
//! User values stored at the leaves of the tree. A value's identity is the
//! digest of its canonical byte form, so `to_bytes` must be deterministic
//! and `from_bytes` must accept exactly what `to_bytes` produced. Each
//! contents type also names its own three-way [`Merge`] instance; the tree
//! merge delegates leaf disagreements to it.

use std::fmt::Debug;

use anybytes::Bytes;

use crate::merge;
use crate::merge::Merge;
use crate::wire::DecodeError;

/// Capability trait for user-defined leaf values.
pub trait Contents: Ord + Eq + Clone + Debug + Send + Sync + 'static {
    /// Canonical serialization; equal values produce equal bytes.
    fn to_bytes(&self) -> Bytes;

    fn from_bytes(bytes: &Bytes) -> Result<Self, DecodeError>;

    fn size_hint(&self) -> usize {
        self.to_bytes().len()
    }

    fn to_json(&self) -> serde_json::Value;

    fn from_json(value: &serde_json::Value) -> Option<Self>;

    /// The three-way merge used for this contents type.
    fn merge() -> Merge<Self>;
}

impl Contents for String {
    fn to_bytes(&self) -> Bytes {
        Bytes::from(self.clone().into_bytes())
    }

    fn from_bytes(bytes: &Bytes) -> Result<Self, DecodeError> {
        std::str::from_utf8(bytes.as_ref())
            .map(str::to_owned)
            .map_err(|_| DecodeError::BadFrame)
    }

    fn size_hint(&self) -> usize {
        self.len()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::Value::String(self.clone())
    }

    fn from_json(value: &serde_json::Value) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }

    fn merge() -> Merge<Self> {
        merge::string()
    }
}

/// An additive counter; concurrent increments merge by applying both deltas
/// against the common ancestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Counter(pub i64);

impl Contents for Counter {
    fn to_bytes(&self) -> Bytes {
        Bytes::from(self.0.to_le_bytes().to_vec())
    }

    fn from_bytes(bytes: &Bytes) -> Result<Self, DecodeError> {
        let raw: [u8; 8] = bytes
            .as_ref()
            .try_into()
            .map_err(|_| DecodeError::BadFrame)?;
        Ok(Counter(i64::from_le_bytes(raw)))
    }

    fn size_hint(&self) -> usize {
        8
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::Value::from(self.0)
    }

    fn from_json(value: &serde_json::Value) -> Option<Self> {
        value.as_i64().map(Counter)
    }

    fn merge() -> Merge<Self> {
        merge::bijection(merge::counter(), |c: &Counter| Some(c.0), |n| Some(Counter(*n)))
    }
}
