//! Decision store trait for the cross-domain bridge.

use async_trait::async_trait;
use thiserror::Error;

/// A versioned byte-string slot in the decision bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedEntry {
    /// The stored value
    pub value: Vec<u8>,
    /// Version incremented on every accepted write
    pub version: u64,
}

/// Errors that can occur on decision store writes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The presented version did not match the stored one. The caller must
    /// re-read and retry; this is never escalated.
    #[error("version conflict: presented {presented}, current {current}")]
    Conflict {
        /// Version the writer presented
        presented: u64,
        /// Version currently stored
        current: u64,
    },
}

/// A compare-and-swap register keyed by string.
///
/// This is the only synchronization primitive between the evaluation tasks
/// and the data-path callbacks: neither domain holds a reference into the
/// other's memory, all exchange goes through `put`/`get`.
///
/// This trait abstracts over the in-process [`MemoryStore`] and any
/// host-provided shared-data facility with the same semantics.
///
/// [`MemoryStore`]: super::MemoryStore
#[async_trait]
pub trait DecisionStore: Send + Sync {
    /// Write `value` if `expected_version` matches the stored version.
    ///
    /// An absent key has version 0, so a fresh entry is created by
    /// presenting 0. Returns the new version on success.
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        expected_version: u64,
    ) -> Result<u64, StoreError>;

    /// Read the entry for `key`, if present.
    async fn get(&self, key: &str) -> Option<SharedEntry>;

    /// Delete the entry for `key`. Deleting an absent key is a no-op.
    async fn remove(&self, key: &str);
}
