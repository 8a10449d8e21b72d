//! DataProvider contract. External collaborator; the core never implements one.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;

/// The data source the cache loads values from, synchronously or in the background.
///
/// Implementations must be thread-safe: `load` may be called concurrently for distinct keys,
/// and the cache never holds its internal mutex while calling any method here.
#[async_trait]
pub trait DataProvider: Send + Sync + 'static {
    type Key: Eq + std::hash::Hash + Clone + Send + Sync + 'static;
    type Value: Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the value for `key`. Blocking from the cache's point of view: the caller awaits
    /// this before returning (synchronous path) or before posting `load_done` (prefetch path).
    async fn load(&self, key: &Self::Key) -> Result<Self::Value, Self::Error>;

    /// Finite enumeration of valid keys. Called rarely; need not be O(1).
    fn available_keys(&self) -> HashSet<Self::Key>;

    /// Cardinality of `available_keys`.
    fn total_keys(&self) -> usize;

    /// Free-form diagnostics, passed through untouched by the cache.
    fn stats(&self) -> std::collections::HashMap<String, Value> {
        std::collections::HashMap::new()
    }
}
