//! The in-memory staging maps.
//!
//! An insert lands in `p0`; the flusher atomically moves `p0` to `p1` and
//! drains `p1` to disk while new inserts keep filling a fresh `p0`. Both maps
//! are probed by every insert and fetch, so a key is visible from the moment
//! its insert returns, long before it reaches the data file.

use std::collections::BTreeMap;

/// A staged value: the salted digest computed at insert time plus the value
/// bytes. Keeping the digest here spares the flusher a second hash pass.
pub(crate) struct StagedValue {
    pub hash: u64,
    pub value: Vec<u8>,
}

/// One staging map: key bytes to staged value, plus a running byte total
/// used to decide when to wake the flusher.
#[derive(Default)]
pub(crate) struct Staging {
    map: BTreeMap<Vec<u8>, StagedValue>,
    bytes: usize,
}

impl Staging {
    pub fn contains(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.map.get(key).map(|v| v.value.as_slice())
    }

    /// Stages `(key, value)`. The caller has already established the key is
    /// absent everywhere.
    pub fn insert(&mut self, key: Vec<u8>, hash: u64, value: Vec<u8>) {
        self.bytes += key.len() + value.len();
        self.map.insert(key, StagedValue { hash, value });
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Total staged key and value bytes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &StagedValue)> {
        self.map.iter()
    }
}
