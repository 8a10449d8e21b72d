//! Prefetch Scheduler: pure set-reconciliation between the in-flight set and the desired
//! prefetch set, under the prefetch concurrency cap.

use std::collections::HashSet;
use std::hash::Hash;

/// Reconciliation commands for a single worker tick.
pub struct Reconciliation<K> {
    pub issue: Vec<K>,
    pub cancel: Vec<K>,
}

/// Computes `issue`/`cancel` commands so that, after they are applied, the in-flight set
/// converges toward `desired` without exceeding `max_keys_prefetched` and without re-issuing
/// keys that are already in flight and still desired.
pub fn reconcile<K: Eq + Hash + Clone>(
    in_flight: &HashSet<K>,
    desired: &[K],
    max_keys_prefetched: usize,
) -> Reconciliation<K> {
    let desired_set: HashSet<&K> = desired.iter().collect();

    let cancel: Vec<K> = in_flight
        .iter()
        .filter(|key| !desired_set.contains(key))
        .cloned()
        .collect();

    let remaining_after_cancel = in_flight.len().saturating_sub(cancel.len());
    let mut issue = Vec::new();
    let mut pending_issues = 0usize;

    for key in desired {
        if in_flight.contains(key) {
            continue;
        }
        if remaining_after_cancel + pending_issues >= max_keys_prefetched {
            break;
        }
        issue.push(key.clone());
        pending_issues += 1;
    }

    Reconciliation { issue, cancel }
}
