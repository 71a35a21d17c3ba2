//! Byte-reader collaborator boundary.
//!
//! The pipeline never talks to a network or filesystem directly: it asks a
//! [ByteReader] for the bytes behind a storage key. A missing key is a
//! normal outcome (`Ok(None)`), not an error — transient-failure retry
//! policy lives entirely inside reader implementations.

#[cfg(feature = "async")]
pub mod asynch;

use std::collections::HashMap;

use bytes::Bytes;

#[derive(Debug, Clone, PartialEq)]
pub struct ReadResponse {
    pub data: Bytes,
    /// Total size of the stored object; equals `data.len()` for whole-object
    /// reads.
    pub total_size: u64,
}

impl ReadResponse {
    pub fn new(data: Bytes) -> Self {
        let total_size = data.len() as u64;
        Self { data, total_size }
    }
}

pub trait ByteReader: Send + Sync {
    fn read(&self, key: &str) -> crate::Result<Option<ReadResponse>>;
}

/// In-memory key/value store backing tests and synthetic datasets.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, Bytes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.entries.insert(key.into(), data.into());
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

impl ByteReader for MemoryStore {
    fn read(&self, key: &str) -> crate::Result<Option<ReadResponse>> {
        Ok(self
            .entries
            .get(key)
            .map(|data| ReadResponse::new(data.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_key_is_none_not_an_error() {
        let store = MemoryStore::new();
        assert_eq!(store.read("missing/key").unwrap(), None);
    }

    #[test]
    fn present_key_reports_total_size() {
        let mut store = MemoryStore::new();
        store.insert("c/0/0", Bytes::from_static(&[1, 2, 3]));
        let response = store.read("c/0/0").unwrap().unwrap();
        assert_eq!(response.total_size, 3);
        assert_eq!(response.data.as_ref(), &[1, 2, 3]);
    }
}
