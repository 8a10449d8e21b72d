//! Prediction Driver: turns raw predictor output into a ranked, capped prefetch set.

use crate::key::KeyDistance;
use std::collections::HashMap;

/// Derives the desired prefetch set D from raw predictor output.
///
/// `likelihoods` need not be pre-filtered or pre-sorted; this function does both:
/// 1. drops keys already resident,
/// 2. sorts by score descending, tie-broken by distance to `current_key` ascending, then by
///    key ascending (deterministic),
/// 3. truncates to `max_keys_prefetched`.
pub fn desired_prefetch_set<K: KeyDistance>(
    current_key: &K,
    likelihoods: HashMap<K, f64>,
    is_resident: impl Fn(&K) -> bool,
    max_keys_prefetched: usize,
) -> Vec<K> {
    let mut candidates: Vec<(K, f64)> = likelihoods
        .into_iter()
        .filter(|(key, _)| !is_resident(key))
        .collect();

    candidates.sort_by(|(key_a, score_a), (key_b, score_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| key_a.distance(current_key).cmp(&key_b.distance(current_key)))
            .then_with(|| key_a.cmp(key_b))
    });

    candidates.truncate(max_keys_prefetched);
    candidates.into_iter().map(|(key, _)| key).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn likelihoods(pairs: &[(u32, f64)]) -> HashMap<u32, f64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn sorts_by_score_descending() {
        let result = desired_prefetch_set(
            &0,
            likelihoods(&[(1, 0.2), (2, 0.9), (3, 0.5)]),
            |_| false,
            10,
        );
        assert_eq!(result, vec![2, 3, 1]);
    }

    #[test]
    fn filters_resident_keys() {
        let result = desired_prefetch_set(&0, likelihoods(&[(1, 0.9), (2, 0.5)]), |k| *k == 1, 10);
        assert_eq!(result, vec![2]);
    }

    #[test]
    fn truncates_to_cap() {
        let result = desired_prefetch_set(
            &0,
            likelihoods(&[(1, 0.9), (2, 0.8), (3, 0.7)]),
            |_| false,
            2,
        );
        assert_eq!(result, vec![1, 2]);
    }

    #[test]
    fn ties_break_by_distance_then_key_ascending() {
        // current_key = 10; candidates 8 and 12 are both distance 2, same score.
        // 8 < 12, so 8 must win the tie-break's final "key ascending" rule.
        let result = desired_prefetch_set(
            &10,
            likelihoods(&[(12, 0.5), (8, 0.5), (9, 0.5)]),
            |_| false,
            10,
        );
        assert_eq!(result, vec![9, 8, 12]);
    }
}
