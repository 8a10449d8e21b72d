//! In-Flight Table: tracks the one load permitted per key at a time.
//!
//! Multiple concurrent `get` calls for the same key must share exactly one underlying load
//! and all observe the same eventual result (single-flight). This is modeled the way
//! "one async computation, many waiters" caches usually are: a broadcast channel keyed by the
//! table entry, rather than an inheritance hierarchy.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Outcome of a load, shared by every waiter of a given key via `Arc` so neither `V` nor `E`
/// need to implement `Clone`.
pub type LoadOutcome<V, E> = Result<Arc<V>, Arc<E>>;

/// Who issued a pending load. Synchronous loads back a live `get()` caller (and possibly other
/// callers waiting on the same key) and are never cancelled; only prefetch loads, issued by the
/// worker on its own initiative, are subject to reconciliation's cancel sweep and count against
/// `max_keys_prefetched`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Synchronous,
    Prefetch,
}

struct PendingLoad<V, E> {
    issued_sequence: u64,
    cancel_flag: Arc<AtomicBool>,
    sender: broadcast::Sender<LoadOutcome<V, E>>,
    origin: Origin,
}

/// A handle a caller awaits to learn the outcome of a load it did not itself initiate.
pub struct WaitHandle<V, E> {
    receiver: broadcast::Receiver<LoadOutcome<V, E>>,
}

impl<V, E> WaitHandle<V, E> {
    /// Waits for the owning caller (or background worker) to complete or fail the load.
    ///
    /// The provider is trusted to return: a closed channel without a value would mean the
    /// owning task vanished without calling `complete`/`fail`, which cannot happen on any code
    /// path this crate spawns.
    pub async fn wait(mut self) -> LoadOutcome<V, E> {
        self.receiver
            .recv()
            .await
            .expect("pending load sender dropped without completing")
    }
}

/// Mapping of key → pending-load handle. Enforces that exactly one load is ever in flight per
/// key (single-flight). Every operation here executes under the cache-wide mutex.
pub struct InFlightTable<K, V, E> {
    pending: HashMap<K, PendingLoad<V, E>>,
    next_sequence: u64,
}

/// Outcome of [`InFlightTable::begin`]: whether this caller is now responsible for performing
/// the load, and (if not) a handle to wait on the load already in progress.
pub enum Begin<V, E> {
    /// No prior load was in flight for this key; the caller must perform it and then call
    /// [`InFlightTable::complete`] or [`InFlightTable::fail`].
    New { issued_sequence: u64, cancel_flag: Arc<AtomicBool> },
    /// A load was already in flight; wait on it instead of starting a second one.
    Existing(WaitHandle<V, E>),
}

impl<K: Eq + Hash + Clone, V, E> InFlightTable<K, V, E> {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            next_sequence: 0,
        }
    }

    /// Begins (or joins) a load for `key`. See [`Begin`] for the two outcomes. `origin` is
    /// recorded only when this call actually starts a new load; a joining caller inherits
    /// whatever origin the in-progress load already has.
    pub fn begin(&mut self, key: K, origin: Origin) -> Begin<V, E> {
        if let Some(existing) = self.pending.get(&key) {
            return Begin::Existing(WaitHandle {
                receiver: existing.sender.subscribe(),
            });
        }

        let issued_sequence = self.next_sequence;
        self.next_sequence += 1;
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let (sender, _rx) = broadcast::channel(1);
        self.pending.insert(
            key,
            PendingLoad {
                issued_sequence,
                cancel_flag: Arc::clone(&cancel_flag),
                sender,
                origin,
            },
        );
        Begin::New {
            issued_sequence,
            cancel_flag,
        }
    }

    /// Commits a successful load. Discards the result (counted under `prefetch_cancelled` by
    /// the caller) if the table entry for `key` no longer matches `issued_sequence`, or was
    /// cancelled.
    pub fn complete(&mut self, key: &K, issued_sequence: u64, value: Arc<V>) -> bool {
        let Some(pending) = self.pending.get(key) else {
            return false;
        };
        if pending.issued_sequence != issued_sequence || pending.cancel_flag.load(Ordering::Acquire) {
            return false;
        }
        let pending = self.pending.remove(key).expect("checked above");
        let _ = pending.sender.send(Ok(value));
        true
    }

    /// Commits a failed load. Same staleness rule as [`Self::complete`].
    pub fn fail(&mut self, key: &K, issued_sequence: u64, error: Arc<E>) -> bool {
        let Some(pending) = self.pending.get(key) else {
            return false;
        };
        if pending.issued_sequence != issued_sequence || pending.cancel_flag.load(Ordering::Acquire) {
            return false;
        }
        let pending = self.pending.remove(key).expect("checked above");
        let _ = pending.sender.send(Err(error));
        true
    }

    /// Cooperatively cancels the load for `key`, if any. Advisory only: the underlying load
    /// may still run to completion, but its result is discarded. Callers decide which keys are
    /// eligible: the worker's reconciliation only ever proposes cancelling keys drawn from
    /// [`Self::prefetch_keys`], so a synchronous load is never reached through that path; full
    /// teardown (`Cache::close`) cancels everything, synchronous loads included, since no
    /// result may be trusted after close.
    pub fn cancel(&mut self, key: &K) {
        if let Some(pending) = self.pending.remove(key) {
            pending.cancel_flag.store(true, Ordering::Release);
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn size(&self) -> usize {
        self.pending.len()
    }

    /// All pending keys, regardless of origin. Used for the residency-invariant check and for
    /// teardown bookkeeping; never for reconciliation (see [`Self::prefetch_keys`]).
    pub fn keys(&self) -> std::collections::HashSet<K> {
        self.pending.keys().cloned().collect()
    }

    /// Pending keys whose load was issued by the worker's own speculation, excluding
    /// synchronous loads made on a caller's behalf. This is the set the scheduler reconciles
    /// against and the set that counts toward `max_keys_prefetched`.
    pub fn prefetch_keys(&self) -> std::collections::HashSet<K> {
        self.pending
            .iter()
            .filter(|(_, pending)| pending.origin == Origin::Prefetch)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl<K: Eq + Hash + Clone, V, E> Default for InFlightTable<K, V, E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_on_fresh_key_returns_new() {
        let mut table: InFlightTable<u32, &str, String> = InFlightTable::new();
        match table.begin(1, Origin::Prefetch) {
            Begin::New { issued_sequence, .. } => assert_eq!(issued_sequence, 0),
            Begin::Existing(_) => panic!("expected New"),
        }
        assert!(table.contains(&1));
    }

    #[test]
    fn begin_on_pending_key_returns_existing() {
        let mut table: InFlightTable<u32, &str, String> = InFlightTable::new();
        table.begin(1, Origin::Prefetch);
        match table.begin(1, Origin::Prefetch) {
            Begin::New { .. } => panic!("expected Existing (single-flight)"),
            Begin::Existing(_) => {}
        }
        assert_eq!(table.size(), 1);
    }

    #[tokio::test]
    async fn complete_delivers_the_value_to_all_waiters() {
        let mut table: InFlightTable<u32, &str, String> = InFlightTable::new();
        let issued_sequence = match table.begin(1, Origin::Synchronous) {
            Begin::New { issued_sequence, .. } => issued_sequence,
            Begin::Existing(_) => unreachable!(),
        };
        let waiter = match table.begin(1, Origin::Synchronous) {
            Begin::Existing(handle) => handle,
            Begin::New { .. } => unreachable!(),
        };

        assert!(table.complete(&1, issued_sequence, Arc::new("value")));
        assert!(!table.contains(&1));
        assert_eq!(waiter.wait().await, Ok(Arc::new("value")));
    }

    #[test]
    fn stale_completion_after_cancel_is_discarded() {
        let mut table: InFlightTable<u32, &str, String> = InFlightTable::new();
        let issued_sequence = match table.begin(1, Origin::Prefetch) {
            Begin::New { issued_sequence, .. } => issued_sequence,
            Begin::Existing(_) => unreachable!(),
        };
        table.cancel(&1);
        assert!(!table.complete(&1, issued_sequence, Arc::new("late")));
    }

    #[test]
    fn stale_completion_after_replacement_is_discarded() {
        let mut table: InFlightTable<u32, &str, String> = InFlightTable::new();
        let old_sequence = match table.begin(1, Origin::Prefetch) {
            Begin::New { issued_sequence, .. } => issued_sequence,
            Begin::Existing(_) => unreachable!(),
        };
        table.cancel(&1);
        table.begin(1, Origin::Prefetch); // a fresh load for the same key gets a new issued_sequence
        assert!(!table.complete(&1, old_sequence, Arc::new("late")));
        assert!(table.contains(&1));
    }

    #[test]
    fn prefetch_keys_excludes_synchronous_entries() {
        let mut table: InFlightTable<u32, &str, String> = InFlightTable::new();
        table.begin(1, Origin::Synchronous);
        table.begin(2, Origin::Prefetch);
        assert_eq!(table.prefetch_keys(), std::collections::HashSet::from([2]));
        assert_eq!(table.keys(), std::collections::HashSet::from([1, 2]));
    }
}
