//! Error taxonomy.
//!
//! The public `get` surface only ever returns [`GetError`], with exactly two variants. Every
//! other failure mode (prefetch failures, predictor failures, invariant violations) is
//! internal: it is logged via `tracing` and surfaced as a [`crate::events::CacheEvent`], never
//! returned from a call.

use std::sync::Arc;
use thiserror::Error;

/// Error returned from [`crate::Cache::get`].
///
/// The provider error is wrapped in an `Arc` because, under single-flight, several concurrent
/// `get` callers may be waiting on the same failed load and each needs its own owned handle to
/// the outcome.
#[derive(Debug, Error)]
pub enum GetError<E: std::error::Error> {
    /// The cache has been closed; no further loads are attempted.
    #[error("cache is closed")]
    Closed,
    /// The provider failed while servicing a synchronous load.
    #[error("provider load failed: {0}")]
    Load(Arc<E>),
}

/// Wraps a predictor failure for the `worker_error` event; never returned from `get`.
#[derive(Debug, Error)]
#[error("predictor failed: {0}")]
pub struct PredictorError(#[source] pub Box<dyn std::error::Error + Send + Sync>);

impl PredictorError {
    pub fn new(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(cause))
    }
}

/// A detected breach of a core invariant. Fatal: the worker that observes one closes the
/// cache. There is no public constructor; this only ever originates inside the worker.
#[derive(Debug, Error)]
#[error("cache invariant violated: {0}")]
pub struct InvariantViolation(pub(crate) String);

/// Error returned from [`crate::CacheConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_keys_cached must be at least 1")]
    ZeroCapacity,
}
