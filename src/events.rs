//! Stats & Events: counters and an out-of-band notification stream.

use serde::Serialize;
use std::sync::Arc;

/// Counters, updated only under the cache-wide mutex and read out as an immutable snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub hits: u64,
    pub misses: u64,
    pub prefetch_issued: u64,
    pub prefetch_completed: u64,
    pub prefetch_cancelled: u64,
    pub prefetch_errors: u64,
    pub evictions: u64,
    pub active_prefetch_tasks: u64,
}

/// Out-of-band notifications emitted by the cache. Delivered outside the critical section, so
/// a callback that re-enters the cache cannot deadlock on the cache-wide mutex.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheEvent<K> {
    CacheLoadStart { key: K },
    CacheLoadComplete { key: K },
    CacheLoadError { key: K, error: Arc<str> },
    PrefetchStart { key: K },
    PrefetchSuccess { key: K },
    PrefetchError { key: K, error: Arc<str> },
    CacheEvict { key: K },
    WorkerError { error: Arc<str> },
}

/// A type-erased event sink. Boxed so `CacheConfig` can stay generic only over `K`, `V`, `E`
/// without also parameterizing over a closure type.
pub type EventSink<K> = Arc<dyn Fn(CacheEvent<K>) + Send + Sync>;
