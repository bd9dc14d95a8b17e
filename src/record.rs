//! Record model shared by every layer
//!
//! A value is either present bytes or a deletion marker. The two are kept as
//! a tagged variant so an empty value is never confused with a delete.

use serde::{Deserialize, Serialize};

/// Value-or-tombstone stored against a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// A live value (may be empty)
    Put(Vec<u8>),

    /// A deletion marker
    Tombstone,
}

impl Value {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Value::Tombstone)
    }

    /// The live bytes, or `None` for a tombstone
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Put(v) => Some(v),
            Value::Tombstone => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Value::Put(v) => Some(v),
            Value::Tombstone => None,
        }
    }

    /// Length of the payload (0 for tombstones)
    pub fn len(&self) -> usize {
        self.as_bytes().map_or(0, <[u8]>::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single versioned key/value pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Value,
    /// Sequence number assigned when the write was accepted
    pub seq: u64,
}

impl Record {
    pub fn new(key: impl Into<Vec<u8>>, value: Value, seq: u64) -> Self {
        Self {
            key: key.into(),
            value,
            seq,
        }
    }

    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, seq: u64) -> Self {
        Self::new(key, Value::Put(value.into()), seq)
    }

    pub fn tombstone(key: impl Into<Vec<u8>>, seq: u64) -> Self {
        Self::new(key, Value::Tombstone, seq)
    }
}
