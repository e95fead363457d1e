#![forbid(unsafe_code)]
#![deny(
    unreachable_pub,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces,
    missing_docs
)]

//! Simulation of quantum circuits containing mid-circuit measurements.
//!
//! A measurement in the middle of a circuit splits execution into branches, one per outcome,
//! and later gates may depend on which outcome was seen. The `TraversalEngine` explores those
//! branches with an explicit work list rather than recursion, so arbitrarily deep circuits run
//! in constant call depth. It runs in one of two modes:
//! - **Analytic**: every branch above a tolerance is followed and weighted by its probability,
//!   giving exact expectation values and distributions.
//! - **Sampled**: each shot follows one randomly drawn outcome per measurement, reproducibly
//!   from a seed.
//!
//! States are evolved by a `StateBackend`. `LocalBackend` is a dense state-vector backend, but
//! the engine never looks inside a state.
//!
//! # Example (teleportation)
//! ```
//! use qbranch::prelude::*;
//! use std::num::NonZeroUsize;
//!
//! # fn main() -> TraversalResult<()> {
//! let mut b = CircuitBuilder::<Gate<f64>, Observable<f64>>::new();
//! // Prepare wire 0 as Ry(theta)|0>, then teleport it to wire 2.
//! b.apply(Gate::ry(0, 1.2));
//! b.apply(Gate::h(1)).apply(Gate::cnot(1, 2));
//! b.apply(Gate::cnot(0, 1)).apply(Gate::h(0));
//! let m0 = b.measure(0);
//! let m1 = b.measure(1);
//! b.apply_if(Condition::is_one(m1), Gate::x(2));
//! b.apply_if(Condition::is_one(m0), Gate::z(2));
//! let z = b.expectation(Observable::z(2));
//! let circuit = b.build()?;
//!
//! let engine: TraversalEngine<LocalBackend<f64>, f64> =
//!     TraversalEngine::new(LocalBackend::new(), EngineConfig::default());
//! let cancel = CancellationToken::new();
//! let initial = LocalState::new(3);
//!
//! // Exact: four branches, each ending with wire 2 in Ry(theta)|0>.
//! let exact = engine.run_analytic(&circuit, &initial, &cancel)?;
//! assert_eq!(exact.branch_count(), 4);
//! let z_exact: f64 = exact.expectation(z).unwrap();
//! assert!((z_exact - 1.2f64.cos()).abs() < 1e-10);
//!
//! // Sampled: one path per shot, reproducible from the seed.
//! let shots = NonZeroUsize::new(50).unwrap();
//! let sampled = engine.run_sampled(&circuit, &initial, shots, 42, &cancel)?;
//! assert_eq!(sampled.successful_shots(), 50);
//! # Ok(())
//! # }
//! ```

pub use num_complex::Complex;
pub use rand;

/// Combining terminal frames into statistics.
pub mod aggregate;
/// The contract with state-evolution backends.
pub mod backend;
/// Circuits, steps and terminal requests.
pub mod circuit;
/// Engine configuration and execution modes.
pub mod config;
/// Error types.
pub mod errors;
/// Units of pending work.
pub mod frame;
mod rayon_helper;
/// A dense state-vector backend.
pub mod state_vector;
/// The branch traversal engine.
pub mod traversal;
/// Common types.
pub mod types;
/// Bit manipulation and sampling helpers.
pub mod utils;

/// Commonly used types.
pub mod prelude {
    pub use crate::aggregate::{
        AggregateResult, AnalyticResult, AnalyticValue, OutcomeAggregator, SampleValue,
        SampledResult, ShotRecord,
    };
    pub use crate::backend::StateBackend;
    pub use crate::circuit::{
        Circuit, CircuitBuilder, Condition, MeasurementRequest, MidMeasurement, Step,
    };
    pub use crate::config::{EngineConfig, ExecutionMode};
    pub use crate::errors::{BackendError, BackendResult, TraversalError, TraversalResult};
    pub use crate::frame::BranchFrame;
    pub use crate::state_vector::{Gate, LocalBackend, LocalState, Observable};
    pub use crate::traversal::{CancellationToken, Terminals, TraversalEngine};
    pub use crate::types::{MeasurementId, Outcome, OutcomeRecord, Precision};
}
