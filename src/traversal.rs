//! The iterative branch traversal.
//!
//! A circuit with mid-circuit measurements is naturally evaluated recursively, one call per
//! remaining step and outcome. Here that recursion is replaced by an explicit work list of
//! `BranchFrame`s, so call depth stays constant however deep the circuit.

use crate::aggregate::{AggregateResult, AnalyticResult, OutcomeAggregator, SampledResult, ShotRecord};
use crate::backend::StateBackend;
use crate::circuit::{Circuit, MidMeasurement, Step};
use crate::config::{EngineConfig, ExecutionMode};
use crate::errors::{TraversalError, TraversalResult};
use crate::frame::BranchFrame;
use crate::rayon_helper::*;
use crate::types::{from_f64, Outcome, Precision};
use crate::utils::sample_index;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use smallvec::SmallVec;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info_span, trace, warn};

/// A circuit of operations and observables understood by backend `B`.
pub type BackendCircuit<B, P> =
    Circuit<<B as StateBackend<P>>::Operation, <B as StateBackend<P>>::Observable>;

/// Cooperative cancellation shared between a caller and running traversals. Checked between
/// work list pops.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token which has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that every traversal holding this token stops.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// True once `cancel` has been called on any clone of this token.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// The terminal frames of a traversal, along with the weight which did not reach the end.
#[derive(Clone, Debug)]
pub struct Terminals<S, P> {
    frames: Vec<BranchFrame<S, P>>,
    postselected_weight: P,
    pruned_weight: P,
}

impl<S, P: Precision> Terminals<S, P> {
    fn new() -> Self {
        Self {
            frames: vec![],
            postselected_weight: P::zero(),
            pruned_weight: P::zero(),
        }
    }

    /// Frames in the order they finished. Outcome `0` branches finish before outcome `1`.
    pub fn frames(&self) -> &[BranchFrame<S, P>] {
        &self.frames
    }

    /// Number of terminal frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True if no frame reached the end.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Sum of terminal weights.
    pub fn surviving_weight(&self) -> P {
        self.frames.iter().map(BranchFrame::weight).sum()
    }

    /// Weight removed by postselection.
    pub fn postselected_weight(&self) -> P {
        self.postselected_weight
    }

    /// Weight of outcomes at or below the tolerance.
    pub fn pruned_weight(&self) -> P {
        self.pruned_weight
    }

    /// Consume, returning the frames.
    pub fn into_frames(self) -> Vec<BranchFrame<S, P>> {
        self.frames
    }

    pub(crate) fn into_parts(self) -> (Vec<BranchFrame<S, P>>, P, P) {
        (self.frames, self.postselected_weight, self.pruned_weight)
    }
}

/// How a measurement step expands a frame.
enum Branching<'r> {
    /// Every outcome above tolerance.
    All,
    /// One outcome drawn from the shot's source.
    One(&'r mut StdRng),
}

/// Drives circuits through a `StateBackend`, in analytic or sampled mode.
///
/// ```
/// use qbranch::prelude::*;
///
/// let mut b = CircuitBuilder::<Gate<f64>, Observable<f64>>::new();
/// b.apply(Gate::h(0));
/// let m = b.measure(0);
/// b.apply_if(Condition::is_one(m), Gate::x(1));
/// let z = b.expectation(Observable::z(1));
/// let circuit = b.build().unwrap();
///
/// let engine = TraversalEngine::<_, f64>::new(LocalBackend::new(), EngineConfig::default());
/// let result = engine
///     .run_analytic(&circuit, &LocalState::new(2), &CancellationToken::new())
///     .unwrap();
/// assert_eq!(result.branch_count(), 2);
/// assert!(result.expectation(z).unwrap().abs() < 1e-10);
/// ```
#[derive(Clone, Debug)]
pub struct TraversalEngine<B, P> {
    backend: B,
    config: EngineConfig,
    precision: PhantomData<P>,
}

impl<P: Precision, B: StateBackend<P>> TraversalEngine<B, P> {
    /// Make an engine. `config` is fixed for the engine's lifetime.
    pub fn new(backend: B, config: EngineConfig) -> Self {
        Self {
            backend,
            config,
            precision: PhantomData,
        }
    }

    /// The backend evolving states.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The policy this engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `circuit` from `initial` in the given mode.
    pub fn run(
        &self,
        circuit: &BackendCircuit<B, P>,
        initial: &B::State,
        mode: ExecutionMode,
        cancel: &CancellationToken,
    ) -> TraversalResult<AggregateResult<P>> {
        match mode {
            ExecutionMode::Analytic => self
                .run_analytic(circuit, initial, cancel)
                .map(AggregateResult::Analytic),
            ExecutionMode::Sampled { shots, seed } => self
                .run_sampled(circuit, initial, shots, seed, cancel)
                .map(AggregateResult::Sampled),
        }
    }

    /// Explore every branch above tolerance and return the exact, postselection-conditioned
    /// statistics.
    pub fn run_analytic(
        &self,
        circuit: &BackendCircuit<B, P>,
        initial: &B::State,
        cancel: &CancellationToken,
    ) -> TraversalResult<AnalyticResult<P>> {
        let span = info_span!("analytic", steps = circuit.len());
        let _enter = span.enter();
        let terminals = self.traverse(circuit, initial, cancel)?;
        debug!(
            branches = terminals.len(),
            postselected = %terminals.postselected_weight(),
            pruned = %terminals.pruned_weight(),
            "traversal complete"
        );
        if cancel.is_cancelled() {
            return Err(TraversalError::Cancelled);
        }
        OutcomeAggregator::new(&self.backend, circuit).analytic(terminals)
    }

    /// All terminal frames of an analytic traversal, before aggregation.
    pub fn traverse(
        &self,
        circuit: &BackendCircuit<B, P>,
        initial: &B::State,
        cancel: &CancellationToken,
    ) -> TraversalResult<Terminals<B::State, P>> {
        let root = BranchFrame::root(initial.clone());
        self.walk(circuit, root, &mut Branching::All, cancel)
    }

    /// Run `shots` independent shots. Each shot draws its own seed from a source seeded by
    /// `seed`, in shot order, so the result does not depend on how shots are scheduled.
    pub fn run_sampled(
        &self,
        circuit: &BackendCircuit<B, P>,
        initial: &B::State,
        shots: NonZeroUsize,
        seed: u64,
        cancel: &CancellationToken,
    ) -> TraversalResult<SampledResult<P>> {
        let span = info_span!("sampled", steps = circuit.len(), shots = shots.get(), seed);
        let _enter = span.enter();
        let mut master = StdRng::seed_from_u64(seed);
        let seeds: Vec<u64> = (0..shots.get()).map(|_| master.next_u64()).collect();
        let records = into_iter!(seeds)
            .map(|shot_seed| self.run_shot(circuit, initial, shot_seed, cancel))
            .collect::<TraversalResult<Vec<_>>>()?;
        let result = SampledResult::new(records);
        debug!(
            completed = result.successful_shots(),
            exhausted = result.exhausted_shots(),
            "sampling complete"
        );
        Ok(result)
    }

    /// One shot, restarted from the root whenever postselection rejects the drawn path.
    fn run_shot(
        &self,
        circuit: &BackendCircuit<B, P>,
        initial: &B::State,
        seed: u64,
        cancel: &CancellationToken,
    ) -> TraversalResult<ShotRecord<P>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let aggregator = OutcomeAggregator::new(&self.backend, circuit);
        let allowed = self.config.max_postselection_retries.saturating_add(1);
        for attempt in 1..=allowed {
            let walked = {
                let mut branching = Branching::One(&mut rng);
                let root = BranchFrame::root(initial.clone());
                self.walk(circuit, root, &mut branching, cancel)
            };
            let record = match walked.map(Terminals::into_frames) {
                Ok(mut frames) => match frames.pop() {
                    Some(frame) => aggregator.sample(frame, attempt, &mut rng),
                    None => {
                        debug!(attempt, "postselection rejected shot, restarting");
                        continue;
                    }
                },
                Err(err) => Err(err),
            };
            return match record {
                Err(TraversalError::NumericalDegeneracy { step, message })
                    if self.config.isolate_shot_failures =>
                {
                    warn!(step, %message, "isolating degenerate shot");
                    Ok(ShotRecord::Degenerate { step, message })
                }
                record => record,
            };
        }
        warn!(attempts = allowed, "shot exhausted postselection retries");
        Ok(ShotRecord::PostselectionExhausted { attempts: allowed })
    }

    /// Pop frames until the work list is empty, evaluating exactly one step per pop.
    fn walk(
        &self,
        circuit: &BackendCircuit<B, P>,
        root: BranchFrame<B::State, P>,
        branching: &mut Branching<'_>,
        cancel: &CancellationToken,
    ) -> TraversalResult<Terminals<B::State, P>> {
        let steps = circuit.steps();
        let mut terminals = Terminals::new();
        let mut work = vec![root];
        while let Some(frame) = work.pop() {
            if cancel.is_cancelled() {
                debug!(pending = work.len() + 1, "traversal cancelled");
                return Err(TraversalError::Cancelled);
            }
            let position = frame.position();
            let step = match steps.get(position) {
                Some(step) => step,
                None => {
                    trace!(outcomes = frame.outcomes().len(), "terminal frame");
                    terminals.frames.push(frame);
                    continue;
                }
            };
            trace!(position, "step");
            match step {
                Step::Operation(op) => {
                    let state = self.apply(position, frame.state(), op)?;
                    work.push(frame.advance(state));
                }
                Step::Conditioned { condition, op } => match condition.holds(frame.outcomes()) {
                    Some(true) => {
                        let state = self.apply(position, frame.state(), op)?;
                        work.push(frame.advance(state));
                    }
                    Some(false) => work.push(frame.skip()),
                    None => {
                        let message = format!(
                            "condition reads unrecorded outcomes {:?}",
                            condition.measurements
                        );
                        return Err(TraversalError::degenerate(position, message));
                    }
                },
                Step::Measure(m) => {
                    let probs = self.outcome_probabilities(position, frame.state(), m.wire)?;
                    match branching {
                        Branching::All => {
                            self.branch_all(position, m, frame, &probs, &mut terminals, &mut work)?
                        }
                        Branching::One(rng) => self.branch_one(
                            position,
                            m,
                            frame,
                            &probs,
                            rng,
                            &mut terminals,
                            &mut work,
                        )?,
                    }
                }
            }
        }
        Ok(terminals)
    }

    /// Push one child per outcome above tolerance, outcome `0` on top.
    fn branch_all(
        &self,
        position: usize,
        m: &MidMeasurement,
        frame: BranchFrame<B::State, P>,
        probs: &[P],
        terminals: &mut Terminals<B::State, P>,
        work: &mut Vec<BranchFrame<B::State, P>>,
    ) -> TraversalResult<()> {
        let tolerance = self.tolerance();
        let mut children: SmallVec<[BranchFrame<B::State, P>; 2]> = SmallVec::new();
        for (outcome, p) in probs.iter().copied().enumerate() {
            let weight = frame.weight() * p;
            if rejected(m, outcome) {
                terminals.postselected_weight += weight;
            } else if p <= tolerance {
                terminals.pruned_weight += weight;
            } else {
                children.push(self.branch(position, m, &frame, outcome, p, p)?);
            }
        }
        debug!(
            position,
            measurement = %m.id,
            wire = m.wire,
            children = children.len(),
            "branching"
        );
        work.extend(children.into_iter().rev());
        Ok(())
    }

    /// Push the single child of a drawn outcome, or drop the frame if postselection rejects it.
    #[allow(clippy::too_many_arguments)]
    fn branch_one(
        &self,
        position: usize,
        m: &MidMeasurement,
        frame: BranchFrame<B::State, P>,
        probs: &[P],
        rng: &mut StdRng,
        terminals: &mut Terminals<B::State, P>,
        work: &mut Vec<BranchFrame<B::State, P>>,
    ) -> TraversalResult<()> {
        let outcome = sample_index(probs, self.tolerance(), rng).ok_or_else(|| {
            TraversalError::degenerate(position, "no outcome is above the tolerance")
        })?;
        if rejected(m, outcome) {
            trace!(position, measurement = %m.id, outcome, "postselection rejected outcome");
            terminals.postselected_weight += frame.weight();
            return Ok(());
        }
        work.push(self.branch(position, m, &frame, outcome, probs[outcome], P::one())?);
        Ok(())
    }

    /// Project a copy of `frame` onto `outcome`, reset if asked, and scale its weight.
    fn branch(
        &self,
        position: usize,
        m: &MidMeasurement,
        frame: &BranchFrame<B::State, P>,
        outcome: Outcome,
        probability: P,
        scale: P,
    ) -> TraversalResult<BranchFrame<B::State, P>> {
        if !(probability > self.tolerance() && probability > P::zero()) {
            let message = format!(
                "projection onto outcome {} with probability {}",
                outcome, probability
            );
            return Err(TraversalError::degenerate(position, message));
        }
        let state = self
            .backend
            .project(frame.state(), m.wire, outcome, probability)
            .map_err(|e| TraversalError::backend(position, e))?;
        let state = if m.reset {
            self.backend
                .reset(&state, m.wire, outcome)
                .map_err(|e| TraversalError::backend(position, e))?
        } else {
            state
        };
        Ok(frame.child(state, (m.id, outcome), scale))
    }

    fn apply(
        &self,
        position: usize,
        state: &B::State,
        op: &B::Operation,
    ) -> TraversalResult<B::State> {
        self.backend
            .apply(state, op)
            .map_err(|e| TraversalError::backend(position, e))
    }

    /// Outcome probabilities, checked to be a distribution.
    fn outcome_probabilities(
        &self,
        position: usize,
        state: &B::State,
        wire: usize,
    ) -> TraversalResult<Vec<P>> {
        let probs = self
            .backend
            .measurement_probabilities(state, wire)
            .map_err(|e| TraversalError::backend(position, e))?;
        let sum_tolerance: P = from_f64(self.config.sum_tolerance);
        if let Some(p) = probs.iter().find(|p| !p.is_finite() || **p < -sum_tolerance) {
            let message = format!("outcome probability {} on wire {}", p, wire);
            return Err(TraversalError::degenerate(position, message));
        }
        let total: P = probs.iter().copied().sum();
        if !((total - P::one()).abs() <= sum_tolerance) {
            let message = format!("outcome probabilities on wire {} sum to {}", wire, total);
            return Err(TraversalError::degenerate(position, message));
        }
        Ok(probs)
    }

    /// The pruning tolerance, clamped at zero so outcomes of probability zero are always pruned.
    fn tolerance(&self) -> P {
        from_f64(self.config.tolerance.max(0.0))
    }
}

fn rejected(m: &MidMeasurement, outcome: Outcome) -> bool {
    m.postselect.map_or(false, |keep| keep != outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitBuilder;
    use crate::state_vector::{Gate, LocalBackend, LocalState, Observable};

    fn engine() -> TraversalEngine<LocalBackend<f64>, f64> {
        TraversalEngine::new(LocalBackend::new(), EngineConfig::default())
    }

    #[test]
    fn operations_only_give_one_frame() {
        let mut b: CircuitBuilder<Gate<f64>, Observable<f64>> = CircuitBuilder::new();
        b.apply(Gate::h(0)).apply(Gate::cnot(0, 1));
        let circuit = b.build().unwrap();
        let terminals = engine()
            .traverse(&circuit, &LocalState::new(2), &CancellationToken::new())
            .unwrap();
        assert_eq!(terminals.len(), 1);
        assert_eq!(terminals.frames()[0].weight(), 1.0);
        assert_eq!(terminals.frames()[0].position(), 2);
    }

    #[test]
    fn outcome_zero_finishes_first() {
        let mut b: CircuitBuilder<Gate<f64>, Observable<f64>> = CircuitBuilder::new();
        b.apply(Gate::h(0)).apply(Gate::h(1));
        let m0 = b.measure(0);
        let m1 = b.measure(1);
        let circuit = b.build().unwrap();
        let terminals = engine()
            .traverse(&circuit, &LocalState::new(2), &CancellationToken::new())
            .unwrap();
        let order: Vec<Vec<_>> = terminals
            .frames()
            .iter()
            .map(|f| f.outcomes().to_vec())
            .collect();
        assert_eq!(
            order,
            vec![
                vec![(m0, 0), (m1, 0)],
                vec![(m0, 0), (m1, 1)],
                vec![(m0, 1), (m1, 0)],
                vec![(m0, 1), (m1, 1)],
            ]
        );
        for frame in terminals.frames() {
            assert!((frame.weight() - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn deterministic_outcome_is_pruned() {
        let mut b: CircuitBuilder<Gate<f64>, Observable<f64>> = CircuitBuilder::new();
        b.apply(Gate::x(0));
        b.measure(0);
        let circuit = b.build().unwrap();
        let terminals = engine()
            .traverse(&circuit, &LocalState::new(1), &CancellationToken::new())
            .unwrap();
        assert_eq!(terminals.len(), 1);
        assert_eq!(terminals.pruned_weight(), 0.0);
        assert_eq!(terminals.postselected_weight(), 0.0);
    }

    #[test]
    fn postselection_mass_is_tracked() {
        let mut b: CircuitBuilder<Gate<f64>, Observable<f64>> = CircuitBuilder::new();
        b.apply(Gate::ry(0, std::f64::consts::FRAC_PI_3));
        b.postselect(0, 1);
        let circuit = b.build().unwrap();
        let terminals = engine()
            .traverse(&circuit, &LocalState::new(1), &CancellationToken::new())
            .unwrap();
        assert_eq!(terminals.len(), 1);
        // sin^2(pi/6) = 1/4
        assert!((terminals.surviving_weight() - 0.25).abs() < 1e-12);
        assert!((terminals.postselected_weight() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn cancelled_token_stops_walk() {
        let mut b: CircuitBuilder<Gate<f64>, Observable<f64>> = CircuitBuilder::new();
        b.apply(Gate::h(0));
        let circuit = b.build().unwrap();
        let cancel = CancellationToken::new();
        let observer = cancel.clone();
        cancel.cancel();
        assert!(observer.is_cancelled());
        let err = engine()
            .traverse(&circuit, &LocalState::new(1), &observer)
            .unwrap_err();
        assert_eq!(err, TraversalError::Cancelled);
    }

    #[test]
    fn negative_tolerance_still_prunes_impossible_outcomes() {
        let mut b: CircuitBuilder<Gate<f64>, Observable<f64>> = CircuitBuilder::new();
        b.apply(Gate::x(0));
        let m = b.measure(0);
        let z = b.expectation(Observable::z(0));
        let circuit = b.build().unwrap();
        let engine: TraversalEngine<LocalBackend<f64>, f64> = TraversalEngine::new(
            LocalBackend::new(),
            EngineConfig::default().with_tolerance(-1.0),
        );
        let cancel = CancellationToken::new();
        let initial = LocalState::new(1);

        let result = engine.run_analytic(&circuit, &initial, &cancel).unwrap();
        assert_eq!(result.branch_count(), 1);
        assert_eq!(result.pruned_weight(), 0.0);
        assert_eq!(result.outcome_weights().get(&vec![(m, 1)]), Some(&1.0));
        assert!((result.expectation(z).unwrap() + 1.0).abs() < 1e-12);

        let shots = NonZeroUsize::new(20).unwrap();
        let sampled = engine
            .run_sampled(&circuit, &initial, shots, 9, &cancel)
            .unwrap();
        assert!(sampled
            .shots()
            .iter()
            .all(|s| s.outcomes() == Some(&[(m, 1)][..])));
    }

    #[test]
    fn pruning_everything_is_degenerate() {
        let mut b: CircuitBuilder<Gate<f64>, Observable<f64>> = CircuitBuilder::new();
        b.apply(Gate::h(0));
        b.measure(0);
        b.expectation(Observable::z(0));
        let circuit = b.build().unwrap();
        let engine: TraversalEngine<LocalBackend<f64>, f64> = TraversalEngine::new(
            LocalBackend::new(),
            EngineConfig::default().with_tolerance(0.5),
        );
        let err = engine
            .run_analytic(&circuit, &LocalState::new(1), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(
            err,
            TraversalError::NumericalDegeneracy { step: 2, .. }
        ));
    }

    #[test]
    fn zero_retries_means_one_attempt() {
        let mut b: CircuitBuilder<Gate<f64>, Observable<f64>> = CircuitBuilder::new();
        b.postselect(0, 1);
        b.mid_circuit(vec![crate::types::MeasurementId(0)]);
        let circuit = b.build().unwrap();
        let engine: TraversalEngine<LocalBackend<f64>, f64> = TraversalEngine::new(
            LocalBackend::new(),
            EngineConfig::default().with_max_postselection_retries(0),
        );
        let shots = NonZeroUsize::new(3).unwrap();
        let result = engine
            .run_sampled(&circuit, &LocalState::new(1), shots, 5, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.exhausted_shots(), 3);
        assert!(result
            .shots()
            .iter()
            .all(|s| *s == ShotRecord::PostselectionExhausted { attempts: 1 }));
    }
}
