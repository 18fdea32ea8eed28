//! The deterministic in-memory key/value map.
//!
//! `Store` is a pure data container with no knowledge of Raft. It is mutated
//! only by the single thread driving the FSM's `apply_to_state_machine`, and
//! read concurrently by HTTP handler threads — hence the `RwLock`.
//!
//! Serialisation uses a `BTreeMap` snapshot so that `marshal()` is
//! deterministic: two replicas that have applied the same log prefix produce
//! byte-identical output.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from deserialising a snapshot or restore byte stream.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("malformed store snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Deterministic in-memory key→value map.
///
/// `set`/`get` are total — there is no way to construct an error from either.
/// Concurrency: many concurrent readers, a single writer.
pub struct Store {
    data: RwLock<BTreeMap<String, String>>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
        }
    }

    /// Unconditional upsert. Returns the prior value, if any.
    pub fn set(&self, key: String, value: String) -> Option<String> {
        self.data.write().unwrap().insert(key, value)
    }

    /// Lookup. Returns `None` when the key is absent.
    pub fn get(&self, key: &str) -> Option<String> {
        self.data.read().unwrap().get(key).cloned()
    }

    /// All entries, in key order — backs the `/list` endpoint.
    pub fn iter_sorted(&self) -> Vec<(String, String)> {
        self.data
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Deterministic, complete serialisation of the whole map.
    pub fn marshal(&self) -> Vec<u8> {
        let guard = self.data.read().unwrap();
        // BTreeMap serialises in key order via serde_json, so two replicas
        // with identical contents produce byte-identical output.
        serde_json::to_vec(&*guard).expect("in-memory string map is always serialisable")
    }

    /// Replace the entire contents atomically. Fails only on malformed input.
    pub fn unmarshal(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let restored: BTreeMap<String, String> = serde_json::from_slice(bytes)?;
        *self.data.write().unwrap() = restored;
        Ok(())
    }

    /// A standalone snapshot of the current contents, usable as a fresh
    /// `Store` — used by tests to compare two independently-built stores.
    #[cfg(test)]
    pub fn snapshot_contents(&self) -> BTreeMap<String, String> {
        self.data.read().unwrap().clone()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
