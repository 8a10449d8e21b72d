//! Background Worker: the sole mutator of the In-Flight Table besides the `begin` calls
//! synchronous `get` makes under the same mutex.

use crate::cache::Shared;
use crate::events::CacheEvent;
use crate::inflight::{Begin, Origin};
use crate::key::KeyDistance;
use crate::predictor::AccessPredictor;
use crate::prediction::desired_prefetch_set;
use crate::provider::DataProvider;
use crate::scheduler::reconcile;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Instrument;

/// A notification fed to the worker. `Access` and `LoadDone` are posted by, respectively,
/// `Cache::get` and the load tasks the worker itself spawns; `Shutdown` is posted once by
/// `Cache::close`.
pub enum WorkerMsg<K, V, E> {
    Access(K),
    LoadDone {
        key: K,
        issued_sequence: u64,
        result: Result<Arc<V>, Arc<E>>,
    },
    Shutdown,
}

/// Runs until a `Shutdown` message arrives or the sender side is dropped. Spawned once, at
/// cache construction, as its own task.
///
/// Wraps the loop in a span via [`Instrument`] rather than `span.enter()`, since holding an
/// `Entered` guard across an `.await` would make this future `!Send` and `tokio::spawn` reject
/// it.
pub async fn run<P, Pr>(
    shared: Arc<Shared<P, Pr>>,
    receiver: mpsc::UnboundedReceiver<WorkerMsg<P::Key, P::Value, P::Error>>,
) where
    P: DataProvider,
    Pr: AccessPredictor<Key = P::Key>,
    P::Key: KeyDistance,
{
    run_loop(shared, receiver)
        .instrument(tracing::info_span!("prefetch_cache_worker"))
        .await;
}

async fn run_loop<P, Pr>(
    shared: Arc<Shared<P, Pr>>,
    mut receiver: mpsc::UnboundedReceiver<WorkerMsg<P::Key, P::Value, P::Error>>,
) where
    P: DataProvider,
    Pr: AccessPredictor<Key = P::Key>,
    P::Key: KeyDistance,
{
    tracing::debug!("worker started");

    while let Some(msg) = receiver.recv().await {
        let fatal = match msg {
            WorkerMsg::Shutdown => {
                tracing::debug!("worker received shutdown");
                break;
            }
            WorkerMsg::LoadDone {
                key,
                issued_sequence,
                result,
            } => !handle_load_done(&shared, key, issued_sequence, result),
            WorkerMsg::Access(_) => false,
        };
        if fatal {
            tracing::debug!("worker stopping after invariant violation");
            break;
        }
        recompute_and_reconcile(&shared);
    }
    tracing::debug!("worker stopped");
}

/// Step 1 of a worker tick: commit a background load's outcome, unless it was superseded or
/// cancelled in the meantime. Returns `false` if this tick detected a residency-invariant
/// breach, in which case the worker shuts the cache down and stops.
fn handle_load_done<P, Pr>(
    shared: &Arc<Shared<P, Pr>>,
    key: P::Key,
    issued_sequence: u64,
    result: Result<Arc<P::Value>, Arc<P::Error>>,
) -> bool
where
    P: DataProvider,
    Pr: AccessPredictor<Key = P::Key>,
    P::Key: KeyDistance,
{
    match result {
        Ok(value) => {
            let (committed, evicted, violation) = {
                let mut inner = shared.inner.lock().expect("cache mutex poisoned");
                inner.stats.active_prefetch_tasks = inner.stats.active_prefetch_tasks.saturating_sub(1);
                let committed = inner.in_flight.complete(&key, issued_sequence, Arc::clone(&value));
                let evicted = if committed {
                    inner.store.insert(key.clone(), value);
                    inner.stats.prefetch_completed += 1;
                    shared.run_eviction(&mut inner)
                } else {
                    inner.stats.prefetch_cancelled += 1;
                    Vec::new()
                };
                let violation = shared.check_residency_invariant(&inner).err();
                (committed, evicted, violation)
            };
            for evicted_key in evicted {
                shared.emit(CacheEvent::CacheEvict { key: evicted_key });
            }
            if committed {
                tracing::debug!(?key, "prefetch completed");
                shared.emit(CacheEvent::PrefetchSuccess { key });
            } else {
                tracing::debug!(?key, "stale prefetch completion discarded");
            }
            if let Some(violation) = violation {
                shared.fail_fatally(violation);
                false
            } else {
                true
            }
        }
        Err(error) => {
            let committed = {
                let mut inner = shared.inner.lock().expect("cache mutex poisoned");
                inner.stats.active_prefetch_tasks = inner.stats.active_prefetch_tasks.saturating_sub(1);
                let committed = inner.in_flight.fail(&key, issued_sequence, Arc::clone(&error));
                if committed {
                    inner.stats.prefetch_errors += 1;
                } else {
                    inner.stats.prefetch_cancelled += 1;
                }
                committed
            };
            if committed {
                tracing::warn!(?key, %error, "prefetch failed");
                shared.emit(CacheEvent::PrefetchError {
                    key,
                    error: error.to_string().into(),
                });
            }
            true
        }
    }
}

/// Steps 2-4 of a worker tick: recompute the desired prefetch set from the most recent access,
/// reconcile it against the in-flight set, and spawn any newly-issued loads.
fn recompute_and_reconcile<P, Pr>(shared: &Arc<Shared<P, Pr>>)
where
    P: DataProvider,
    Pr: AccessPredictor<Key = P::Key>,
    P::Key: KeyDistance,
{
    let (current_key, history_snapshot) = {
        let inner = shared.inner.lock().expect("cache mutex poisoned");
        match inner.history.snapshot().last().cloned() {
            Some(key) => (key, inner.history.snapshot()),
            None => return,
        }
    };

    let likelihoods = match shared.predictor.likelihoods(&current_key, &history_snapshot) {
        Ok(map) => map,
        Err(err) => {
            tracing::error!(%err, "predictor failed, skipping this reconciliation pass");
            shared.emit(CacheEvent::WorkerError {
                error: err.to_string().into(),
            });
            return;
        }
    };

    let desired = {
        let inner = shared.inner.lock().expect("cache mutex poisoned");
        desired_prefetch_set(
            &current_key,
            likelihoods,
            |key| inner.store.contains(key),
            shared.config.max_keys_prefetched,
        )
    };

    let plan = {
        let inner = shared.inner.lock().expect("cache mutex poisoned");
        reconcile(&inner.in_flight.prefetch_keys(), &desired, shared.config.max_keys_prefetched)
    };

    if !plan.cancel.is_empty() {
        let mut inner = shared.inner.lock().expect("cache mutex poisoned");
        for key in &plan.cancel {
            inner.in_flight.cancel(key);
        }
        tracing::debug!(count = plan.cancel.len(), "cancelled superseded prefetches");
    }

    for key in plan.issue {
        let begin = {
            let mut inner = shared.inner.lock().expect("cache mutex poisoned");
            inner.in_flight.begin(key.clone(), Origin::Prefetch)
        };
        let issued_sequence = match begin {
            Begin::New { issued_sequence, .. } => issued_sequence,
            // Lost a race with another tick or a synchronous get(); skip, it's already covered.
            Begin::Existing(_) => continue,
        };
        {
            let mut inner = shared.inner.lock().expect("cache mutex poisoned");
            inner.stats.prefetch_issued += 1;
            inner.stats.active_prefetch_tasks += 1;
        }
        spawn_prefetch(Arc::clone(shared), key, issued_sequence);
    }
}

fn spawn_prefetch<P, Pr>(shared: Arc<Shared<P, Pr>>, key: P::Key, issued_sequence: u64)
where
    P: DataProvider,
    Pr: AccessPredictor<Key = P::Key>,
    P::Key: KeyDistance,
{
    tokio::spawn(async move {
        tracing::debug!(?key, "prefetch start");
        shared.emit(CacheEvent::PrefetchStart { key: key.clone() });
        let outcome = shared.provider.load(&key).await.map(Arc::new).map_err(Arc::new);
        let _ = shared.sender.send(WorkerMsg::LoadDone {
            key,
            issued_sequence,
            result: outcome,
        });
    });
}
