//! Lock-protected, insertion-ordered key/value registry.
//!
//! Backs the client group and instance tables. Every method takes the lock
//! for its own duration only; callers never hold a guard across an `.await`.

use std::hash::Hash;

use indexmap::IndexMap;
use parking_lot::RwLock;

/// Concurrent ordered map.
#[derive(Debug)]
pub struct Registry<K, V> {
    entries: RwLock<IndexMap<K, V>>,
}

impl<K, V> Registry<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
        }
    }

    /// Insert only if `key` is absent. Returns `false` when it was present.
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(&key) {
            return false;
        }
        let _ = entries.insert(key, value);
        true
    }

    /// Whether `key` is present.
    pub fn has_key(&self, key: &K) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Remove and return the value for `key`.
    ///
    /// The removal is atomic: when two tasks race to take the same key,
    /// exactly one of them receives the value.
    pub fn remove_by_key(&self, key: &K) -> Option<V> {
        self.entries.write().shift_remove(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<K> {
        self.entries.read().keys().cloned().collect()
    }
}

impl<K, V> Registry<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Clone of the value for `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.read().get(key).cloned()
    }

    /// Snapshot of all entries in insertion order.
    ///
    /// The lock is released before the snapshot is returned, so callers may
    /// mutate the registry while iterating it.
    pub fn snapshot(&self) -> Vec<(K, V)> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl<K, V> Default for Registry<K, V>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
