//! In-process decision store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::store::{DecisionStore, SharedEntry, StoreError};

/// An in-process compare-and-swap store backed by a concurrent map.
///
/// Each slot carries its own version; concurrent writers presenting the same
/// stale version race on the map entry and exactly one of them wins.
#[derive(Default)]
pub struct MemoryStore {
    slots: DashMap<String, SharedEntry>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl DecisionStore for MemoryStore {
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get().version;
                if current != expected_version {
                    return Err(StoreError::Conflict {
                        presented: expected_version,
                        current,
                    });
                }
                let version = current + 1;
                occupied.insert(SharedEntry { value, version });
                Ok(version)
            }
            Entry::Vacant(vacant) => {
                if expected_version != 0 {
                    return Err(StoreError::Conflict {
                        presented: expected_version,
                        current: 0,
                    });
                }
                vacant.insert(SharedEntry { value, version: 1 });
                Ok(1)
            }
        }
    }

    async fn get(&self, key: &str) -> Option<SharedEntry> {
        self.slots.get(key).map(|entry| entry.value().clone())
    }

    async fn remove(&self, key: &str) {
        self.slots.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_and_read() {
        let store = MemoryStore::new();

        let version = store.put("key", b"hello".to_vec(), 0).await.unwrap();
        assert_eq!(version, 1);

        let entry = store.get("key").await.unwrap();
        assert_eq!(entry.value, b"hello");
        assert_eq!(entry.version, 1);
    }

    #[tokio::test]
    async fn test_missing_key_reads_none() {
        let store = MemoryStore::new();
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = MemoryStore::new();
        store.put("key", b"v1".to_vec(), 0).await.unwrap();
        store.put("key", b"v2".to_vec(), 1).await.unwrap();

        let err = store.put("key", b"late".to_vec(), 1).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict {
                presented: 1,
                current: 2
            }
        );

        // The losing write left no trace.
        assert_eq!(store.get("key").await.unwrap().value, b"v2");
    }

    #[tokio::test]
    async fn test_create_requires_version_zero() {
        let store = MemoryStore::new();

        let err = store.put("key", b"v".to_vec(), 3).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict {
                presented: 3,
                current: 0
            }
        );
        assert!(store.get("key").await.is_none());
    }

    #[tokio::test]
    async fn test_racing_writers_exactly_one_wins() {
        let store = Arc::new(MemoryStore::new());
        store.put("key", b"base".to_vec(), 0).await.unwrap();

        // Both writers observed version 1.
        let a = {
            let store = store.clone();
            tokio::spawn(async move { store.put("key", b"from-a".to_vec(), 1).await })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { store.put("key", b"from-b".to_vec(), 1).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);

        // The stored value reflects only the winner.
        let entry = store.get("key").await.unwrap();
        assert_eq!(entry.version, 2);
        let winner_was_a = results[0].is_ok();
        if winner_was_a {
            assert_eq!(entry.value, b"from-a");
        } else {
            assert_eq!(entry.value, b"from-b");
        }
    }

    #[tokio::test]
    async fn test_conflict_retry_with_fresh_read_succeeds() {
        let store = MemoryStore::new();
        store.put("key", b"v1".to_vec(), 0).await.unwrap();
        store.put("key", b"v2".to_vec(), 1).await.unwrap();

        // Stale write loses, fresh read supplies the winning version.
        assert!(store.put("key", b"retry".to_vec(), 1).await.is_err());
        let current = store.get("key").await.unwrap().version;
        let version = store.put("key", b"retry".to_vec(), current).await.unwrap();
        assert_eq!(version, 3);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryStore::new();
        store.put("key", b"v".to_vec(), 0).await.unwrap();
        assert_eq!(store.len(), 1);

        store.remove("key").await;
        assert!(store.get("key").await.is_none());
        assert!(store.is_empty());

        // Removing again is harmless.
        store.remove("key").await;
    }
}
