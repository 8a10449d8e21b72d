//! AccessPredictor contract. External collaborator; the core never implements one.

use crate::error::PredictorError;
use std::collections::HashMap;

/// The likelihood oracle. Given the current key and recent history, returns non-negative
/// scores for candidate keys worth prefetching. An empty result means "no speculation".
///
/// Must be a pure, thread-safe function: the cache never holds its internal mutex while
/// calling it, and calls may happen concurrently with unrelated `get`s.
pub trait AccessPredictor: Send + Sync + 'static {
    type Key: Send + Sync + 'static;

    /// Non-negative likelihood per candidate key. Keys absent from the map are treated as
    /// having zero likelihood and are never prefetched.
    fn likelihoods(
        &self,
        current_key: &Self::Key,
        history: &[Self::Key],
    ) -> Result<HashMap<Self::Key, f64>, PredictorError>;
}
