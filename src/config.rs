//! Construction configuration.

use crate::error::ConfigError;
use crate::eviction::{EvictionPolicy, OldestFirst};
use crate::events::EventSink;
use crate::key::KeyDistance;
use std::sync::Arc;

/// Construction-time configuration for a [`crate::Cache`].
///
/// Unlike the rest of a host application's configuration (env vars, files), this is a plain
/// struct the caller builds programmatically, since the core has no file format or CLI surface. It
/// validates its own invariants and fails fast with a typed error rather than panicking, the
/// way the rest of the stack validates required environment variables.
pub struct CacheConfig<K: KeyDistance> {
    /// Resident cap. Must be at least 1.
    pub max_keys_cached: usize,
    /// In-flight prefetch cap. 0 disables speculation entirely.
    pub max_keys_prefetched: usize,
    /// Length *H* of the bounded access history.
    pub history_size: usize,
    /// Victim-selection strategy used when the resident store is over capacity.
    pub eviction_policy: Arc<dyn EvictionPolicy<K>>,
    /// Optional out-of-band event sink, invoked outside the cache-wide mutex.
    pub on_event: Option<EventSink<K>>,
}

impl<K: KeyDistance> CacheConfig<K> {
    /// A config with the documented defaults: 30-entry history, oldest-first eviction, no
    /// event sink. `max_keys_cached` and `max_keys_prefetched` have no sane default and must
    /// be supplied.
    pub fn new(max_keys_cached: usize, max_keys_prefetched: usize) -> Self {
        Self {
            max_keys_cached,
            max_keys_prefetched,
            history_size: 30,
            eviction_policy: Arc::new(OldestFirst),
            on_event: None,
        }
    }

    pub fn with_history_size(mut self, history_size: usize) -> Self {
        self.history_size = history_size;
        self
    }

    pub fn with_eviction_policy(mut self, policy: Arc<dyn EvictionPolicy<K>>) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn with_event_sink(mut self, sink: EventSink<K>) -> Self {
        self.on_event = Some(sink);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_keys_cached == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_capacity() {
        let config = CacheConfig::<u32>::new(0, 2);
        assert_eq!(config.validate(), Err(ConfigError::ZeroCapacity));
    }

    #[test]
    fn new_applies_documented_defaults() {
        let config = CacheConfig::<u32>::new(4, 2);
        assert_eq!(config.history_size, 30);
        assert!(config.on_event.is_none());
    }
}
