//! The public cache type: construction, the synchronous `get` path, stats, and idempotent
//! teardown. The worker and its tick logic live in [`crate::worker`]; this module owns the
//! state they both operate on.

use crate::config::CacheConfig;
use crate::error::{GetError, InvariantViolation};
use crate::events::{CacheEvent, Stats};
use crate::eviction::{EvictionPolicy, ResidentMeta};
use crate::history::AccessHistory;
use crate::inflight::{Begin, InFlightTable, Origin};
use crate::key::KeyDistance;
use crate::predictor::AccessPredictor;
use crate::provider::DataProvider;
use crate::store::ResidentStore;
use crate::worker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// State guarded by the single cache-wide mutex: the Resident Store, In-Flight Table, Access
/// History, and Stats. Never held across a call into the provider, predictor, or event
/// callback.
pub(crate) struct Inner<K, V, E> {
    pub(crate) store: ResidentStore<K, Arc<V>>,
    pub(crate) in_flight: InFlightTable<K, V, E>,
    pub(crate) history: AccessHistory<K>,
    pub(crate) stats: Stats,
}

/// Everything the background worker and the synchronous `get` path share: the collaborators,
/// configuration, mutex-guarded state, the closed flag, and the channel into the worker.
pub(crate) struct Shared<P: DataProvider, Pr: AccessPredictor<Key = P::Key>> {
    pub(crate) provider: P,
    pub(crate) predictor: Pr,
    pub(crate) config: CacheConfig<P::Key>,
    pub(crate) inner: Mutex<Inner<P::Key, P::Value, P::Error>>,
    pub(crate) closed: AtomicBool,
    pub(crate) sender: mpsc::UnboundedSender<worker::WorkerMsg<P::Key, P::Value, P::Error>>,
}

impl<P, Pr> Shared<P, Pr>
where
    P: DataProvider,
    Pr: AccessPredictor<Key = P::Key>,
    P::Key: KeyDistance,
{
    /// Runs eviction until the resident store is back within `max_keys_cached`. Must be called
    /// with `inner`'s lock already held; emits no events itself, since the caller is inside the
    /// critical section. Callers collect the victim list and emit afterward.
    pub(crate) fn run_eviction(&self, inner: &mut Inner<P::Key, P::Value, P::Error>) -> Vec<P::Key> {
        let mut evicted = Vec::new();
        while inner.store.size() > self.config.max_keys_cached {
            let shed_count = inner.store.size() - self.config.max_keys_cached;
            let residents: Vec<ResidentMeta<P::Key>> = inner
                .store
                .iter_by_age()
                .into_iter()
                .map(|entry| ResidentMeta {
                    key: entry.key.clone(),
                    insertion_sequence: entry.insertion_sequence,
                })
                .collect();
            let victims = self.config.eviction_policy.select_victims(&residents, shed_count);
            if victims.is_empty() {
                tracing::error!("eviction policy returned no victims while over capacity");
                break;
            }
            for victim in victims {
                inner.store.remove(&victim);
                inner.stats.evictions += 1;
                evicted.push(victim);
            }
        }
        for key in &evicted {
            tracing::debug!(?key, "evicted");
        }
        evicted
    }

    pub(crate) fn emit(&self, event: CacheEvent<P::Key>) {
        if let Some(sink) = &self.config.on_event {
            sink(event);
        }
    }

    /// A key must never be both resident and in flight at once: completion always removes the
    /// in-flight entry in the same critical section that inserts into the store. Called after
    /// every mutation that touches both; a breach means the bookkeeping above has a bug, not
    /// that the caller did anything wrong.
    pub(crate) fn check_residency_invariant(
        &self,
        inner: &Inner<P::Key, P::Value, P::Error>,
    ) -> Result<(), InvariantViolation> {
        for key in inner.in_flight.keys() {
            if inner.store.contains(&key) {
                return Err(InvariantViolation("key resident and in flight simultaneously".to_string()));
            }
        }
        Ok(())
    }

    /// Closes the cache in response to a detected invariant breach. Marks it closed so no
    /// further loads are attempted and emits a `WorkerError` event; does not attempt to
    /// reconcile outstanding state, since that state is exactly what is no longer trusted.
    pub(crate) fn fail_fatally(&self, violation: InvariantViolation) {
        tracing::error!(%violation, "closing cache after invariant violation");
        self.closed.store(true, Ordering::Release);
        self.emit(CacheEvent::WorkerError {
            error: violation.to_string().into(),
        });
    }
}

/// A keyed, in-memory cache that speculatively prefetches likely-next keys in the background
/// while serving point lookups synchronously.
///
/// `P` is the data source, `Pr` the likelihood oracle; both are external collaborators the
/// cache treats as opaque, thread-safe services.
pub struct Cache<P, Pr>
where
    P: DataProvider,
    Pr: AccessPredictor<Key = P::Key>,
    P::Key: KeyDistance,
{
    shared: Arc<Shared<P, Pr>>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<P, Pr> Cache<P, Pr>
where
    P: DataProvider,
    Pr: AccessPredictor<Key = P::Key>,
    P::Key: KeyDistance,
{
    /// Validates `config`, constructs the cache, and spawns its background worker.
    pub fn new(provider: P, predictor: Pr, config: CacheConfig<P::Key>) -> Result<Self, crate::error::ConfigError> {
        config.validate()?;
        let history_size = config.history_size;
        let (sender, receiver) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            provider,
            predictor,
            config,
            inner: Mutex::new(Inner {
                store: ResidentStore::new(),
                in_flight: InFlightTable::new(),
                history: AccessHistory::new(history_size),
                stats: Stats::default(),
            }),
            closed: AtomicBool::new(false),
            sender,
        });

        let worker_shared = Arc::clone(&shared);
        let worker_handle = tokio::spawn(worker::run(worker_shared, receiver));

        Ok(Self {
            shared,
            worker_handle: Mutex::new(Some(worker_handle)),
        })
    }

    /// Returns the value for `key`, loading it synchronously on a miss.
    ///
    /// Records the access in history before doing anything else, so that the worker's next
    /// prediction already sees this key even if the load that follows takes a long time.
    pub async fn get(&self, key: P::Key) -> Result<Arc<P::Value>, GetError<P::Error>> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(GetError::Closed);
        }

        enum Action<V, E> {
            Hit(Arc<V>),
            Wait(crate::inflight::WaitHandle<V, E>),
            Load { issued_sequence: u64 },
        }

        let action = {
            let mut inner = self.shared.inner.lock().expect("cache mutex poisoned");
            inner.history.record(key.clone());
            if let Some(value) = inner.store.lookup(&key) {
                inner.stats.hits += 1;
                Action::Hit(Arc::clone(value))
            } else {
                inner.stats.misses += 1;
                match inner.in_flight.begin(key.clone(), Origin::Synchronous) {
                    Begin::Existing(handle) => Action::Wait(handle),
                    Begin::New { issued_sequence, .. } => Action::Load { issued_sequence },
                }
            }
        };

        self.notify_access(key.clone());

        match action {
            Action::Hit(value) => Ok(value),
            Action::Wait(handle) => handle.wait().await.map_err(GetError::Load),
            Action::Load { issued_sequence } => {
                tracing::debug!(?key, "cache load start");
                self.shared.emit(CacheEvent::CacheLoadStart { key: key.clone() });

                match self.shared.provider.load(&key).await {
                    Ok(value) => {
                        let value = Arc::new(value);
                        let (committed, evicted) = {
                            let mut inner = self.shared.inner.lock().expect("cache mutex poisoned");
                            let committed = inner.in_flight.complete(&key, issued_sequence, Arc::clone(&value));
                            let evicted = if committed {
                                inner.store.insert(key.clone(), Arc::clone(&value));
                                self.shared.run_eviction(&mut inner)
                            } else {
                                Vec::new()
                            };
                            if let Err(violation) = self.shared.check_residency_invariant(&inner) {
                                self.shared.fail_fatally(violation);
                            }
                            (committed, evicted)
                        };
                        for evicted_key in evicted {
                            self.shared.emit(CacheEvent::CacheEvict { key: evicted_key });
                        }
                        if committed {
                            tracing::debug!(?key, "cache load complete");
                            self.shared.emit(CacheEvent::CacheLoadComplete { key: key.clone() });
                        } else {
                            tracing::debug!(?key, "stale synchronous completion discarded (cache closed mid-load)");
                        }
                        self.notify_access(key);
                        Ok(value)
                    }
                    Err(error) => {
                        let error = Arc::new(error);
                        {
                            let mut inner = self.shared.inner.lock().expect("cache mutex poisoned");
                            inner.in_flight.fail(&key, issued_sequence, Arc::clone(&error));
                        }
                        tracing::warn!(?key, %error, "cache load failed");
                        self.shared.emit(CacheEvent::CacheLoadError {
                            key,
                            error: error.to_string().into(),
                        });
                        Err(GetError::Load(error))
                    }
                }
            }
        }
    }

    /// A snapshot of the hit/miss/prefetch/eviction counters, taken under the cache-wide mutex.
    pub fn stats(&self) -> Stats {
        self.shared.inner.lock().expect("cache mutex poisoned").stats.clone()
    }

    /// Idempotent teardown: cancels outstanding loads, stops the worker, and releases resident
    /// memory. Safe to call from any task and safe to call more than once.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            let mut inner = self.shared.inner.lock().expect("cache mutex poisoned");
            let pending: Vec<P::Key> = inner.in_flight.keys().into_iter().collect();
            for key in pending {
                inner.in_flight.cancel(&key);
            }
            inner.store = ResidentStore::new();
        }

        let _ = self.shared.sender.send(worker::WorkerMsg::Shutdown);

        let handle = self.worker_handle.lock().expect("worker handle mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn notify_access(&self, key: P::Key) {
        let _ = self.shared.sender.send(worker::WorkerMsg::Access(key));
    }
}
