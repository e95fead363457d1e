#![allow(dead_code)]

use qbranch::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

pub type Builder = CircuitBuilder<Gate<f64>, Observable<f64>>;
pub type Engine = TraversalEngine<LocalBackend<f64>, f64>;

/// Install a subscriber which writes through the test harness, once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn engine() -> Engine {
    engine_with(EngineConfig::default())
}

pub fn engine_with(config: EngineConfig) -> Engine {
    init_tracing();
    TraversalEngine::new(LocalBackend::new(), config)
}

pub fn assert_close(a: f64, b: f64, tol: f64) {
    assert!((a - b).abs() <= tol, "{} != {} (tolerance {})", a, b, tol);
}

pub fn assert_all_close(a: &[f64], b: &[f64], tol: f64) {
    assert_eq!(a.len(), b.len(), "{:?} != {:?}", a, b);
    a.iter().zip(b).for_each(|(a, b)| assert_close(*a, *b, tol));
}

/// A `LocalBackend` which can be told to fail, skew its probabilities, or cancel a token after
/// some number of operations.
#[derive(Debug, Default)]
pub struct FaultyBackend {
    inner: LocalBackend<f64>,
    fail_after: Option<usize>,
    skew: f64,
    cancel_after: Option<(usize, CancellationToken)>,
    applied: AtomicUsize,
}

impl FaultyBackend {
    pub fn failing_after(operations: usize) -> Self {
        Self {
            fail_after: Some(operations),
            ..Self::default()
        }
    }

    pub fn skewed(skew: f64) -> Self {
        Self {
            skew,
            ..Self::default()
        }
    }

    pub fn cancelling_after(operations: usize, token: CancellationToken) -> Self {
        Self {
            cancel_after: Some((operations, token)),
            ..Self::default()
        }
    }

    pub fn applied(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }
}

impl StateBackend<f64> for FaultyBackend {
    type State = LocalState<f64>;
    type Operation = Gate<f64>;
    type Observable = Observable<f64>;

    fn apply(&self, state: &LocalState<f64>, op: &Gate<f64>) -> BackendResult<LocalState<f64>> {
        let count = self.applied.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if count >= *after {
                token.cancel();
            }
        }
        if self.fail_after.map_or(false, |after| count > after) {
            return Err(BackendError::new(format!("operation {} rejected", count)));
        }
        self.inner.apply(state, op)
    }

    fn measurement_probabilities(
        &self,
        state: &LocalState<f64>,
        wire: usize,
    ) -> BackendResult<Vec<f64>> {
        let mut probs = self.inner.measurement_probabilities(state, wire)?;
        probs[1] += self.skew;
        Ok(probs)
    }

    fn project(
        &self,
        state: &LocalState<f64>,
        wire: usize,
        outcome: Outcome,
        probability: f64,
    ) -> BackendResult<LocalState<f64>> {
        self.inner.project(state, wire, outcome, probability)
    }

    fn probabilities(&self, state: &LocalState<f64>, wires: &[usize]) -> BackendResult<Vec<f64>> {
        self.inner.probabilities(state, wires)
    }

    fn expectation(
        &self,
        state: &LocalState<f64>,
        observable: &Observable<f64>,
    ) -> BackendResult<f64> {
        self.inner.expectation(state, observable)
    }
}
