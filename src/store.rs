//! Resident Store: the mapping of key to completed-load value, with insertion-order tracking
//! for eviction.

use std::collections::HashMap;
use std::hash::Hash;

/// A resident record. `insertion_sequence` is assigned at the moment the value becomes
/// resident and is strictly increasing in issue order; it defines "oldest".
#[derive(Debug, Clone)]
pub struct Entry<K, V> {
    pub key: K,
    pub value: V,
    pub insertion_sequence: u64,
}

/// Mapping of key → value for completed loads. Every operation here executes under the
/// cache-wide mutex; all are O(1) amortized.
pub struct ResidentStore<K, V> {
    entries: HashMap<K, Entry<K, V>>,
    next_sequence: u64,
}

impl<K: Eq + Hash + Clone, V> ResidentStore<K, V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_sequence: 0,
        }
    }

    pub fn lookup(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Inserts `value` for `key`, assigning it a fresh `insertion_sequence`. Overwrites any
    /// prior entry for `key` (this only happens via normal load commit, never concurrently
    /// with itself, since single-flight guarantees at most one in-flight load per key).
    pub fn insert(&mut self, key: K, value: V) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.insert(
            key.clone(),
            Entry {
                key,
                value,
                insertion_sequence: sequence,
            },
        );
        sequence
    }

    pub fn remove(&mut self, key: &K) -> Option<Entry<K, V>> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Yields residents oldest-first by `insertion_sequence`.
    pub fn iter_by_age(&self) -> Vec<&Entry<K, V>> {
        let mut entries: Vec<&Entry<K, V>> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.insertion_sequence);
        entries
    }
}

impl<K: Eq + Hash + Clone, V> Default for ResidentStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
