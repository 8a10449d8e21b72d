//! Test doubles shared by the scenario and invariant suites.
#![allow(dead_code)]

use async_trait::async_trait;
use prefetch_cache::{AccessPredictor, DataProvider};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex as StdMutex, Once};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

static TRACING_INIT: Once = Once::new();

/// Installs an env-filtered `tracing` subscriber once per test binary, so worker/cache spans
/// show up under `RUST_LOG=debug cargo test -- --nocapture` instead of going nowhere. Safe to
/// call from every test; later calls are no-ops.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_test_writer()
            .init();
    });
}

#[derive(Debug)]
pub struct TestError(pub String);

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TestError {}

/// A provider over `u32` keys: `load(k) = k * 10`, with optional per-key failures, an optional
/// fixed latency, and a call counter used to assert single-flight (S2).
pub struct TestProvider {
    fail_keys: StdMutex<HashSet<u32>>,
    delay: Option<Duration>,
    call_counts: AsyncMutex<HashMap<u32, u32>>,
    universe: HashSet<u32>,
}

impl TestProvider {
    pub fn new(universe: impl IntoIterator<Item = u32>) -> Self {
        Self {
            fail_keys: StdMutex::new(HashSet::new()),
            delay: None,
            call_counts: AsyncMutex::new(HashMap::new()),
            universe: universe.into_iter().collect(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail(&self, key: u32) {
        self.fail_keys.lock().unwrap().insert(key);
    }

    pub async fn call_count(&self, key: u32) -> u32 {
        *self.call_counts.lock().await.get(&key).unwrap_or(&0)
    }
}

#[async_trait]
impl DataProvider for TestProvider {
    type Key = u32;
    type Value = u32;
    type Error = TestError;

    async fn load(&self, key: &u32) -> Result<u32, TestError> {
        {
            let mut counts = self.call_counts.lock().await;
            *counts.entry(*key).or_insert(0) += 1;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_keys.lock().unwrap().contains(key) {
            return Err(TestError(format!("load failed for key {key}")));
        }
        Ok(key * 10)
    }

    fn available_keys(&self) -> HashSet<u32> {
        self.universe.clone()
    }

    fn total_keys(&self) -> usize {
        self.universe.len()
    }
}

/// An oracle whose likelihood table is set explicitly per `current_key`, so tests can script
/// exact predictions (including mid-run drift, S3) instead of depending on a fixed formula.
#[derive(Default)]
pub struct ScriptedPredictor {
    table: StdMutex<HashMap<u32, HashMap<u32, f64>>>,
    calls: AtomicU32,
}

impl ScriptedPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, current_key: u32, likelihoods: impl IntoIterator<Item = (u32, f64)>) {
        self.table
            .lock()
            .unwrap()
            .insert(current_key, likelihoods.into_iter().collect());
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AccessPredictor for ScriptedPredictor {
    type Key = u32;

    fn likelihoods(
        &self,
        current_key: &u32,
        _history: &[u32],
    ) -> Result<HashMap<u32, f64>, prefetch_cache::error::PredictorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.table.lock().unwrap().get(current_key).cloned().unwrap_or_default())
    }
}

/// The "perfect oracle" of S1: always predicts `{current+1: 1.0, current+2: 0.5}`.
#[derive(Default)]
pub struct NextTwoPredictor;

impl AccessPredictor for NextTwoPredictor {
    type Key = u32;

    fn likelihoods(
        &self,
        current_key: &u32,
        _history: &[u32],
    ) -> Result<HashMap<u32, f64>, prefetch_cache::error::PredictorError> {
        let mut map = HashMap::new();
        map.insert(current_key + 1, 1.0);
        map.insert(current_key + 2, 0.5);
        Ok(map)
    }
}

/// Polls `condition` until it returns `true` or `timeout` elapses, returning whether it
/// converged. Used instead of a fixed `sleep` to assert on eventual background-worker state
/// without hard-coding how many worker ticks a reconciliation takes.
pub async fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
