//! A keyed, in-memory cache that serves point lookups synchronously while a background
//! worker continuously reconciles a pluggable predictor's idea of what to load next.
//!
//! The moving parts: a [`store::ResidentStore`] of completed loads, an [`inflight::InFlightTable`]
//! enforcing single-flight, a bounded [`history::AccessHistory`], a [`prediction`] driver that
//! ranks prefetch candidates, a [`scheduler`] that reconciles the in-flight set against the
//! desired set under a concurrency cap, and a [`worker`] task that drives all of it. None of
//! this is exposed directly; construct a [`Cache`] and call [`Cache::get`].

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod eviction;
pub mod history;
pub mod inflight;
pub mod key;
pub mod prediction;
pub mod predictor;
pub mod provider;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use cache::Cache;
pub use config::CacheConfig;
pub use error::{ConfigError, GetError};
pub use events::{CacheEvent, EventSink, Stats};
pub use eviction::{EvictionPolicy, OldestFirst};
pub use key::KeyDistance;
pub use predictor::AccessPredictor;
pub use provider::DataProvider;
