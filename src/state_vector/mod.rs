//! A dense state-vector backend, storing all `2^n` amplitudes locally.
//!
//! Qubits are big-endian to match kron product standards: `|abc>` means `q0=a`, `q1=b`, `q2=c`.

use crate::backend::StateBackend;
use crate::errors::{BackendError, BackendResult};
use crate::types::{Outcome, Precision};
use num_complex::Complex;
use num_traits::{One, Zero};
use std::marker::PhantomData;

/// Gate definitions and application.
pub mod gates;
/// Probability and projection helpers.
pub mod measurement_ops;
/// Observables and expectation values.
pub mod observables;

pub use gates::Gate;
pub use observables::Observable;

use gates::{apply_gate, check_wires};
use measurement_ops::{measure_probs, measure_state, prob_magnitude};

/// Make a vector of complex numbers whose reals are given by `data`
pub fn from_reals<P: Precision>(data: &[P]) -> Vec<Complex<P>> {
    data.iter().map(|x| Complex::new(*x, P::zero())).collect()
}

/// The amplitudes of `n` qubits.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalState<P: Precision> {
    n: usize,
    state: Vec<Complex<P>>,
}

impl<P: Precision> LocalState<P> {
    /// The all zeros state `|0...0>`.
    pub fn new(n: usize) -> Self {
        Self::from_index(n, 0)
    }

    /// The computational basis state `|index>`, indexed big-endian.
    pub fn from_index(n: usize, index: usize) -> Self {
        let mut state = vec![Complex::zero(); 1 << n];
        state[index % (1 << n)] = Complex::one();
        Self { n, state }
    }

    /// Make a state from a fully defined, big-endian vector of amplitudes.
    pub fn from_amplitudes(n: usize, state: Vec<Complex<P>>) -> BackendResult<Self> {
        if state.len() != 1 << n {
            let message = format!(
                "Provided state is not the correct size, expected {:?} but found {:?}",
                1usize << n,
                state.len()
            );
            return Err(BackendError::new(message));
        }
        Ok(Self { n, state })
    }

    /// Number of qubits.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Return a reference to the amplitudes.
    pub fn amplitudes(&self) -> &[Complex<P>] {
        &self.state
    }

    /// Total squared magnitude, one for a normalized state.
    pub fn magnitude(&self) -> P {
        prob_magnitude(&self.state)
    }

    fn with_gate(&self, gate: &Gate<P>) -> BackendResult<Self> {
        let mut output = vec![Complex::zero(); self.state.len()];
        apply_gate(self.n, gate, &self.state, &mut output)?;
        Ok(Self {
            n: self.n,
            state: output,
        })
    }
}

/// Evolves `LocalState`s. Stateless, so one backend serves every branch.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalBackend<P: Precision> {
    precision: PhantomData<P>,
}

impl<P: Precision> LocalBackend<P> {
    /// Make a new backend.
    pub fn new() -> Self {
        Self {
            precision: PhantomData,
        }
    }
}

impl<P: Precision> StateBackend<P> for LocalBackend<P> {
    type State = LocalState<P>;
    type Operation = Gate<P>;
    type Observable = Observable<P>;

    fn apply(&self, state: &LocalState<P>, op: &Gate<P>) -> BackendResult<LocalState<P>> {
        state.with_gate(op)
    }

    fn measurement_probabilities(&self, state: &LocalState<P>, wire: usize) -> BackendResult<Vec<P>> {
        check_wires(state.n, &[wire])?;
        Ok(measure_probs(state.n, &[wire], &state.state))
    }

    fn project(
        &self,
        state: &LocalState<P>,
        wire: usize,
        outcome: Outcome,
        probability: P,
    ) -> BackendResult<LocalState<P>> {
        check_wires(state.n, &[wire])?;
        if outcome > 1 {
            let message = format!("outcome {} is not a single wire outcome", outcome);
            return Err(BackendError::new(message));
        }
        if !(probability > P::zero()) {
            let message = format!(
                "cannot renormalize outcome {} of wire {} with probability {}",
                outcome, wire, probability
            );
            return Err(BackendError::new(message));
        }
        let mut output = vec![Complex::zero(); state.state.len()];
        measure_state(
            state.n,
            &[wire],
            (outcome, probability),
            &state.state,
            &mut output,
        );
        Ok(LocalState {
            n: state.n,
            state: output,
        })
    }

    fn reset(&self, state: &LocalState<P>, wire: usize, outcome: Outcome) -> BackendResult<LocalState<P>> {
        match outcome {
            0 => Ok(state.clone()),
            1 => state.with_gate(&Gate::x(wire)),
            _ => {
                let message = format!("outcome {} is not a single wire outcome", outcome);
                Err(BackendError::new(message))
            }
        }
    }

    fn probabilities(&self, state: &LocalState<P>, wires: &[usize]) -> BackendResult<Vec<P>> {
        check_wires(state.n, wires)?;
        Ok(measure_probs(state.n, wires, &state.state))
    }

    fn expectation(&self, state: &LocalState<P>, observable: &Observable<P>) -> BackendResult<P> {
        observables::expectation(state.n, observable, &state.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_is_pure() {
        let backend = LocalBackend::<f64>::new();
        let state = LocalState::new(1);
        let flipped = backend.apply(&state, &Gate::x(0)).unwrap();
        assert_eq!(state, LocalState::new(1));
        assert_eq!(flipped, LocalState::from_index(1, 1));
    }

    #[test]
    fn project_renormalizes() {
        let backend = LocalBackend::<f64>::new();
        let state = backend.apply(&LocalState::new(2), &Gate::h(0)).unwrap();
        let probs = backend.measurement_probabilities(&state, 0).unwrap();
        assert!((probs[0] - 0.5).abs() < 1e-12);
        let projected = backend.project(&state, 0, 1, probs[1]).unwrap();
        assert!((projected.magnitude() - 1.0).abs() < 1e-12);
        assert!((projected.amplitudes()[0b10].re - 1.0).abs() < 1e-12);
    }

    #[test]
    fn project_zero_probability_fails() {
        let backend = LocalBackend::<f64>::new();
        let state = LocalState::new(1);
        assert!(backend.project(&state, 0, 1, 0.0).is_err());
    }

    #[test]
    fn reset_returns_wire_to_zero() {
        let backend = LocalBackend::<f64>::new();
        let state = LocalState::from_index(2, 0b11);
        let reset = backend.reset(&state, 1, 1).unwrap();
        assert_eq!(reset, LocalState::from_index(2, 0b10));
    }

    #[test]
    fn wrong_size_amplitudes() {
        assert!(LocalState::from_amplitudes(2, from_reals(&[1.0, 0.0])).is_err());
    }
}
