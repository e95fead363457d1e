use crate::errors::{BackendError, BackendResult};
use crate::types::{Outcome, Precision};
use std::fmt::Debug;

/// A numeric state representation which the traversal evolves without inspecting.
///
/// Every method takes the state by reference and returns a fresh one; the traversal relies on
/// this to give sibling branches independently owned snapshots.
pub trait StateBackend<P: Precision>: Sync {
    /// The opaque state, cloned once per surviving branch.
    type State: Clone + Debug + Send + Sync;
    /// Deterministic gates and channels.
    type Operation: Debug + Send + Sync;
    /// Observables used by terminal expectation requests.
    type Observable: Debug + Send + Sync;

    /// Apply `op` to `state`.
    fn apply(&self, state: &Self::State, op: &Self::Operation) -> BackendResult<Self::State>;

    /// Probability of each outcome of measuring `wire`, indexed by outcome. Entries are
    /// non-negative and sum to one within floating tolerance.
    fn measurement_probabilities(&self, state: &Self::State, wire: usize) -> BackendResult<Vec<P>>;

    /// The renormalized post-measurement state for `outcome`, which was observed with
    /// `probability`. Never called for an outcome whose probability has been pruned.
    fn project(
        &self,
        state: &Self::State,
        wire: usize,
        outcome: Outcome,
        probability: P,
    ) -> BackendResult<Self::State>;

    /// Return `wire`, known to hold `outcome`, to outcome `0`.
    fn reset(
        &self,
        _state: &Self::State,
        wire: usize,
        _outcome: Outcome,
    ) -> BackendResult<Self::State> {
        let message = format!("backend cannot reset wire {}", wire);
        Err(BackendError::new(message))
    }

    /// Distribution over the computational basis of `wires`, bit `i` of the index is `wires[i]`.
    fn probabilities(&self, state: &Self::State, wires: &[usize]) -> BackendResult<Vec<P>>;

    /// Expectation value of `observable`.
    fn expectation(&self, state: &Self::State, observable: &Self::Observable) -> BackendResult<P>;
}
