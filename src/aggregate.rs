//! Combines terminal frames into the statistics requested by a circuit.

use crate::backend::StateBackend;
use crate::circuit::{Circuit, MeasurementRequest};
use crate::errors::{TraversalError, TraversalResult};
use crate::frame::BranchFrame;
use crate::traversal::Terminals;
use crate::types::{MeasurementId, OutcomeRecord, Precision};
use crate::utils::{outcome_space, pack_outcomes, sample_index};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::marker::PhantomData;

/// An exact terminal statistic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AnalyticValue<P> {
    /// Expectation value of an observable.
    Expectation(P),
    /// Distribution over packed bits, for either final wires or mid-circuit outcomes.
    Probabilities(Vec<P>),
}

/// Exact statistics of an analytic traversal, conditioned on postselection.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalyticResult<P> {
    values: Vec<AnalyticValue<P>>,
    outcome_weights: BTreeMap<Vec<OutcomeRecord>, P>,
    surviving_weight: P,
    postselected_weight: P,
    pruned_weight: P,
    branch_count: usize,
}

impl<P: Precision> AnalyticResult<P> {
    /// One value per request, in request order.
    pub fn values(&self) -> &[AnalyticValue<P>] {
        &self.values
    }

    /// The value of request `i` if it is an expectation.
    pub fn expectation(&self, i: usize) -> Option<P> {
        match self.values.get(i) {
            Some(AnalyticValue::Expectation(e)) => Some(*e),
            _ => None,
        }
    }

    /// The value of request `i` if it is a distribution.
    pub fn probabilities(&self, i: usize) -> Option<&[P]> {
        match self.values.get(i) {
            Some(AnalyticValue::Probabilities(p)) => Some(p),
            _ => None,
        }
    }

    /// Cumulative weight of each distinct sequence of mid-circuit outcomes.
    pub fn outcome_weights(&self) -> &BTreeMap<Vec<OutcomeRecord>, P> {
        &self.outcome_weights
    }

    /// Total weight of the terminal frames.
    pub fn surviving_weight(&self) -> P {
        self.surviving_weight
    }

    /// Weight discarded because it contradicted a postselection.
    pub fn postselected_weight(&self) -> P {
        self.postselected_weight
    }

    /// Weight of outcomes dropped for falling at or below the tolerance.
    pub fn pruned_weight(&self) -> P {
        self.pruned_weight
    }

    /// Surviving plus discarded weight, one up to rounding.
    pub fn total_weight(&self) -> P {
        self.surviving_weight + self.postselected_weight + self.pruned_weight
    }

    /// Number of terminal frames.
    pub fn branch_count(&self) -> usize {
        self.branch_count
    }
}

/// A single value recorded for one shot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum SampleValue<P> {
    /// Exact expectation on the final state of the shot.
    Expectation(P),
    /// Packed bits drawn from the final state, or packed mid-circuit outcomes.
    Bits(usize),
}

impl<P: Precision> SampleValue<P> {
    /// The bits, if this is a bits sample.
    pub fn bits(&self) -> Option<usize> {
        match self {
            SampleValue::Bits(b) => Some(*b),
            SampleValue::Expectation(_) => None,
        }
    }

    /// The expectation, if this is an expectation sample.
    pub fn expectation(&self) -> Option<P> {
        match self {
            SampleValue::Expectation(e) => Some(*e),
            SampleValue::Bits(_) => None,
        }
    }
}

/// What one shot produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ShotRecord<P> {
    /// The shot reached the end of the circuit.
    Sample {
        /// Mid-circuit outcomes drawn along the way.
        outcomes: Vec<OutcomeRecord>,
        /// One value per request.
        values: Vec<SampleValue<P>>,
        /// Attempts needed to satisfy postselection, at least one.
        attempts: usize,
    },
    /// Every attempt was rejected by postselection.
    PostselectionExhausted {
        /// Attempts made.
        attempts: usize,
    },
    /// The shot hit a numerical degeneracy and was isolated from the rest of the run.
    Degenerate {
        /// Step at which it occurred.
        step: usize,
        /// What was inconsistent.
        message: String,
    },
}

impl<P: Precision> ShotRecord<P> {
    /// The recorded values of a completed shot.
    pub fn values(&self) -> Option<&[SampleValue<P>]> {
        match self {
            ShotRecord::Sample { values, .. } => Some(values),
            _ => None,
        }
    }

    /// The mid-circuit outcomes of a completed shot.
    pub fn outcomes(&self) -> Option<&[OutcomeRecord]> {
        match self {
            ShotRecord::Sample { outcomes, .. } => Some(outcomes),
            _ => None,
        }
    }

    /// True if the shot reached the end of the circuit.
    pub fn is_sample(&self) -> bool {
        matches!(self, ShotRecord::Sample { .. })
    }
}

/// The ordered shots of a sampled run, one per requested shot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampledResult<P> {
    shots: Vec<ShotRecord<P>>,
}

impl<P: Precision> SampledResult<P> {
    pub(crate) fn new(shots: Vec<ShotRecord<P>>) -> Self {
        Self { shots }
    }

    /// Every shot in shot order, failed ones included.
    pub fn shots(&self) -> &[ShotRecord<P>] {
        &self.shots
    }

    /// Number of shots.
    pub fn len(&self) -> usize {
        self.shots.len()
    }

    /// True if no shots were taken.
    pub fn is_empty(&self) -> bool {
        self.shots.is_empty()
    }

    fn completed(&self) -> impl Iterator<Item = &[SampleValue<P>]> {
        self.shots.iter().filter_map(ShotRecord::values)
    }

    /// How often each bits value of request `i` was seen among completed shots.
    pub fn counts(&self, i: usize) -> BTreeMap<usize, usize> {
        let mut counts = BTreeMap::new();
        self.completed()
            .filter_map(|values| values.get(i).and_then(SampleValue::bits))
            .for_each(|bits| *counts.entry(bits).or_insert(0) += 1);
        counts
    }

    /// Frequencies of the bits values `0..len` of request `i` among completed shots. `None` if
    /// no shot completed.
    pub fn empirical_distribution(&self, i: usize, len: usize) -> Option<Vec<P>> {
        let completed = self.successful_shots();
        if completed == 0 {
            return None;
        }
        let total = P::from(completed)?;
        let mut dist = vec![P::zero(); len];
        for (bits, count) in self.counts(i) {
            if let (Some(entry), Some(count)) = (dist.get_mut(bits), P::from(count)) {
                *entry = count / total;
            }
        }
        Some(dist)
    }

    /// Mean of the expectation values of request `i` over completed shots.
    pub fn mean_expectation(&self, i: usize) -> Option<P> {
        let (sum, count) = self
            .completed()
            .filter_map(|values| values.get(i).and_then(SampleValue::expectation))
            .fold((P::zero(), 0usize), |(sum, count), e| (sum + e, count + 1));
        if count == 0 {
            None
        } else {
            P::from(count).map(|count| sum / count)
        }
    }

    /// Number of shots which reached the end of the circuit.
    pub fn successful_shots(&self) -> usize {
        self.shots.iter().filter(|s| s.is_sample()).count()
    }

    /// Number of shots flagged as having exhausted their postselection retries.
    pub fn exhausted_shots(&self) -> usize {
        self.shots
            .iter()
            .filter(|s| matches!(s, ShotRecord::PostselectionExhausted { .. }))
            .count()
    }

    /// Number of shots isolated after a numerical degeneracy.
    pub fn degenerate_shots(&self) -> usize {
        self.shots
            .iter()
            .filter(|s| matches!(s, ShotRecord::Degenerate { .. }))
            .count()
    }
}

/// The result of a run in either mode.
#[derive(Clone, Debug, PartialEq)]
pub enum AggregateResult<P> {
    /// Exact statistics.
    Analytic(AnalyticResult<P>),
    /// Per-shot records.
    Sampled(SampledResult<P>),
}

impl<P> AggregateResult<P> {
    /// The analytic result, if the run was analytic.
    pub fn as_analytic(&self) -> Option<&AnalyticResult<P>> {
        match self {
            AggregateResult::Analytic(r) => Some(r),
            AggregateResult::Sampled(_) => None,
        }
    }

    /// The sampled result, if the run was sampled.
    pub fn as_sampled(&self) -> Option<&SampledResult<P>> {
        match self {
            AggregateResult::Sampled(r) => Some(r),
            AggregateResult::Analytic(_) => None,
        }
    }
}

/// Evaluates a circuit's terminal requests against terminal frames.
#[derive(Debug)]
pub struct OutcomeAggregator<'a, B: StateBackend<P>, P: Precision> {
    backend: &'a B,
    requests: &'a [MeasurementRequest<B::Observable>],
    step: usize,
    precision: PhantomData<P>,
}

impl<'a, B: StateBackend<P>, P: Precision> OutcomeAggregator<'a, B, P> {
    /// Make an aggregator for the requests of `circuit`.
    pub fn new(backend: &'a B, circuit: &'a Circuit<B::Operation, B::Observable>) -> Self {
        Self {
            backend,
            requests: circuit.requests(),
            step: circuit.len(),
            precision: PhantomData,
        }
    }

    /// Weight each terminal frame's values by its probability and sum, then divide by the
    /// surviving mass so the statistics are conditioned on postselection.
    pub fn analytic(
        &self,
        terminals: Terminals<B::State, P>,
    ) -> TraversalResult<AnalyticResult<P>> {
        let surviving_weight = terminals.surviving_weight();
        if terminals.is_empty() || !(surviving_weight > P::zero()) {
            if terminals.postselected_weight() > P::zero() {
                return Err(TraversalError::EmptyPostselection);
            }
            return Err(TraversalError::degenerate(
                self.step,
                "every outcome was pruned at or below the tolerance",
            ));
        }
        let branch_count = terminals.len();
        let (frames, postselected_weight, pruned_weight) = terminals.into_parts();

        // Final distributions are sized by the backend's answer for the first frame.
        let mut sums: Vec<Vec<P>> = self
            .requests
            .iter()
            .map(|request| match request {
                MeasurementRequest::Expectation(_) => Ok(vec![P::zero()]),
                MeasurementRequest::Probabilities(_) => Ok(vec![]),
                MeasurementRequest::MidCircuit(ids) => outcome_space(ids.len())
                    .map(|len| vec![P::zero(); len])
                    .ok_or_else(|| {
                        let message = format!("too many measurements requested: {:?}", ids);
                        TraversalError::InvalidCircuit(message)
                    }),
            })
            .collect::<TraversalResult<_>>()?;
        let mut outcome_weights = BTreeMap::new();

        for frame in frames {
            let weight = frame.weight();
            for (request, sum) in self.requests.iter().zip(sums.iter_mut()) {
                self.accumulate(request, &frame, weight, sum)?;
            }
            *outcome_weights
                .entry(frame.outcomes().to_vec())
                .or_insert_with(P::zero) += weight;
        }

        let values = self
            .requests
            .iter()
            .zip(sums)
            .map(|(request, mut sum)| {
                sum.iter_mut().for_each(|s| *s /= surviving_weight);
                match request {
                    MeasurementRequest::Expectation(_) => {
                        AnalyticValue::Expectation(sum.first().copied().unwrap_or_else(P::zero))
                    }
                    _ => AnalyticValue::Probabilities(sum),
                }
            })
            .collect();

        Ok(AnalyticResult {
            values,
            outcome_weights,
            surviving_weight,
            postselected_weight,
            pruned_weight,
            branch_count,
        })
    }

    fn accumulate(
        &self,
        request: &MeasurementRequest<B::Observable>,
        frame: &BranchFrame<B::State, P>,
        weight: P,
        sum: &mut Vec<P>,
    ) -> TraversalResult<()> {
        match request {
            MeasurementRequest::Expectation(observable) => {
                let e = self
                    .backend
                    .expectation(frame.state(), observable)
                    .map_err(|e| TraversalError::backend(self.step, e))?;
                sum[0] += weight * e;
            }
            MeasurementRequest::Probabilities(wires) => {
                let probs = self.final_probabilities(frame, wires)?;
                if sum.is_empty() {
                    sum.resize(probs.len(), P::zero());
                }
                sum.iter_mut()
                    .zip(probs)
                    .for_each(|(s, p)| *s += weight * p);
            }
            MeasurementRequest::MidCircuit(ids) => {
                let packed = self.packed(frame, ids)?;
                if let Some(entry) = sum.get_mut(packed) {
                    *entry += weight;
                }
            }
        }
        Ok(())
    }

    /// Record one shot from its terminal frame. Each distribution request draws from `rng`.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        frame: BranchFrame<B::State, P>,
        attempts: usize,
        rng: &mut R,
    ) -> TraversalResult<ShotRecord<P>> {
        let values = self
            .requests
            .iter()
            .map(|request| match request {
                MeasurementRequest::Expectation(observable) => self
                    .backend
                    .expectation(frame.state(), observable)
                    .map(SampleValue::Expectation)
                    .map_err(|e| TraversalError::backend(self.step, e)),
                MeasurementRequest::Probabilities(wires) => {
                    let probs = self.final_probabilities(&frame, wires)?;
                    sample_index(&probs, P::zero(), rng)
                        .map(SampleValue::Bits)
                        .ok_or_else(|| {
                            TraversalError::degenerate(self.step, "final distribution is empty")
                        })
                }
                MeasurementRequest::MidCircuit(ids) => {
                    self.packed(&frame, ids).map(SampleValue::Bits)
                }
            })
            .collect::<TraversalResult<Vec<_>>>()?;
        let (outcomes, _, _) = frame.into_parts();
        Ok(ShotRecord::Sample {
            outcomes: outcomes.into_vec(),
            values,
            attempts,
        })
    }

    fn final_probabilities(
        &self,
        frame: &BranchFrame<B::State, P>,
        wires: &[usize],
    ) -> TraversalResult<Vec<P>> {
        let probs = self
            .backend
            .probabilities(frame.state(), wires)
            .map_err(|e| TraversalError::backend(self.step, e))?;
        if outcome_space(wires.len()) != Some(probs.len()) {
            let message = format!(
                "backend returned {} probabilities for {} wires",
                probs.len(),
                wires.len()
            );
            return Err(TraversalError::degenerate(self.step, message));
        }
        Ok(probs)
    }

    fn packed(
        &self,
        frame: &BranchFrame<B::State, P>,
        ids: &[MeasurementId],
    ) -> TraversalResult<usize> {
        pack_outcomes(ids, frame.outcomes()).ok_or_else(|| {
            let message = format!("outcomes of {:?} were not recorded on this branch", ids);
            TraversalError::degenerate(self.step, message)
        })
    }
}
