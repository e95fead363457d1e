use crate::errors::{TraversalError, TraversalResult};
use crate::types::{MeasurementId, Outcome, OutcomeRecord};
use crate::utils::{outcome_space, pack_outcomes};
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

/// A mid-circuit measurement marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MidMeasurement {
    /// Identifier used by conditions and requests to refer to this measurement.
    pub id: MeasurementId,
    /// Wire being measured.
    pub wire: usize,
    /// If set, only branches with this outcome survive.
    pub postselect: Option<Outcome>,
    /// Return the wire to `|0>` after it has been measured.
    pub reset: bool,
}

/// Holds when the packed outcomes of `measurements` equal `value`. Bit `i` of the packed value
/// is the outcome of `measurements[i]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Condition {
    /// Measurements read by this condition.
    pub measurements: Vec<MeasurementId>,
    /// Value which the packed outcomes must match.
    pub value: usize,
}

impl Condition {
    /// Condition on a single measurement having observed `1`.
    pub fn is_one(m: MeasurementId) -> Self {
        Self {
            measurements: vec![m],
            value: 1,
        }
    }

    /// Condition on a single measurement having observed `0`.
    pub fn is_zero(m: MeasurementId) -> Self {
        Self {
            measurements: vec![m],
            value: 0,
        }
    }

    /// Evaluate against recorded outcomes, `None` if any measurement has not been recorded.
    pub fn holds(&self, outcomes: &[OutcomeRecord]) -> Option<bool> {
        pack_outcomes(&self.measurements, outcomes).map(|packed| packed == self.value)
    }
}

/// One step of a circuit. Dispatched once per step by the traversal.
#[derive(Clone, Debug, PartialEq)]
pub enum Step<Op> {
    /// A deterministic gate or channel.
    Operation(Op),
    /// A mid-circuit measurement which splits the branch.
    Measure(MidMeasurement),
    /// An operation applied only on branches where `condition` holds.
    Conditioned {
        /// Classical condition over earlier measurements.
        condition: Condition,
        /// Operation to apply.
        op: Op,
    },
}

/// A statistic requested at the end of the circuit.
#[derive(Clone, Debug, PartialEq)]
pub enum MeasurementRequest<Obs> {
    /// Expectation value of an observable on the final state.
    Expectation(Obs),
    /// Distribution over the computational basis of `wires`, bit `i` is `wires[i]`.
    Probabilities(Vec<usize>),
    /// Distribution over packed mid-circuit outcomes, bit `i` is `ids[i]`.
    MidCircuit(Vec<MeasurementId>),
}

/// An immutable, validated sequence of steps and terminal requests.
#[derive(Clone, Debug, PartialEq)]
pub struct Circuit<Op, Obs> {
    steps: Vec<Step<Op>>,
    requests: Vec<MeasurementRequest<Obs>>,
    measurement_count: usize,
}

impl<Op, Obs> Circuit<Op, Obs> {
    /// Validate and build a circuit. Measurement ids must be unique, postselected outcomes must
    /// be `0` or `1`, and every condition or request may only reference measurements which occur
    /// earlier in the circuit. Distribution requests must list distinct wires or measurements,
    /// few enough that their packed values fit in a `usize`.
    pub fn new(
        steps: Vec<Step<Op>>,
        requests: Vec<MeasurementRequest<Obs>>,
    ) -> TraversalResult<Self> {
        let mut seen = HashSet::new();
        for (index, step) in steps.iter().enumerate() {
            match step {
                Step::Operation(_) => {}
                Step::Measure(m) => {
                    if !seen.insert(m.id) {
                        let message = format!("measurement {} appears twice (step {})", m.id, index);
                        return Err(TraversalError::InvalidCircuit(message));
                    }
                    if let Some(outcome) = m.postselect.filter(|outcome| *outcome > 1) {
                        let message = format!(
                            "measurement {} postselects outcome {} (step {})",
                            m.id, outcome, index
                        );
                        return Err(TraversalError::InvalidCircuit(message));
                    }
                }
                Step::Conditioned { condition, .. } => {
                    check_known(&seen, &condition.measurements, index)?;
                    if condition.measurements.is_empty() {
                        let message = format!("condition at step {} reads no measurements", index);
                        return Err(TraversalError::InvalidCircuit(message));
                    }
                }
            }
        }
        for request in &requests {
            match request {
                MeasurementRequest::Expectation(_) => {}
                MeasurementRequest::Probabilities(wires) => {
                    if wires.is_empty() {
                        return Err(TraversalError::InvalidCircuit(
                            "probabilities requested over no wires".to_string(),
                        ));
                    }
                    check_distinct(wires, "wire")?;
                    check_width(wires.len())?;
                }
                MeasurementRequest::MidCircuit(ids) => {
                    if ids.is_empty() {
                        return Err(TraversalError::InvalidCircuit(
                            "mid-circuit statistics requested over no measurements".to_string(),
                        ));
                    }
                    check_known(&seen, ids, steps.len())?;
                    // Distinct and known, so never more than the measurement count.
                    check_distinct(ids, "measurement")?;
                    check_width(ids.len())?;
                }
            }
        }
        Ok(Self {
            steps,
            requests,
            measurement_count: seen.len(),
        })
    }

    /// The ordered steps.
    pub fn steps(&self) -> &[Step<Op>] {
        &self.steps
    }

    /// The terminal requests.
    pub fn requests(&self) -> &[MeasurementRequest<Obs>] {
        &self.requests
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True if there are no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of mid-circuit measurement markers.
    pub fn measurement_count(&self) -> usize {
        self.measurement_count
    }
}

fn check_known(
    seen: &HashSet<MeasurementId>,
    ids: &[MeasurementId],
    index: usize,
) -> TraversalResult<()> {
    match ids.iter().find(|id| !seen.contains(id)) {
        Some(id) => {
            let message = format!(
                "measurement {} is referenced at step {} before it is measured",
                id, index
            );
            Err(TraversalError::InvalidCircuit(message))
        }
        None => Ok(()),
    }
}

fn check_distinct<T: Eq + Hash + fmt::Display>(items: &[T], kind: &str) -> TraversalResult<()> {
    let mut listed = HashSet::new();
    match items.iter().find(|item| !listed.insert(*item)) {
        Some(item) => {
            let message = format!("{} {} requested twice", kind, item);
            Err(TraversalError::InvalidCircuit(message))
        }
        None => Ok(()),
    }
}

fn check_width(len: usize) -> TraversalResult<()> {
    match outcome_space(len) {
        Some(_) => Ok(()),
        None => {
            let message = format!("distribution over {} bits does not fit in a usize", len);
            Err(TraversalError::InvalidCircuit(message))
        }
    }
}

impl<Op: fmt::Debug, Obs: fmt::Debug> fmt::Display for Circuit<Op, Obs> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, step) in self.steps.iter().enumerate() {
            match step {
                Step::Operation(op) => writeln!(f, "{:>4}: {:?}", index, op)?,
                Step::Measure(m) => {
                    write!(f, "{:>4}: measure wire {} -> {}", index, m.wire, m.id)?;
                    if let Some(p) = m.postselect {
                        write!(f, " (postselect {})", p)?;
                    }
                    if m.reset {
                        write!(f, " (reset)")?;
                    }
                    writeln!(f)?;
                }
                Step::Conditioned { condition, op } => writeln!(
                    f,
                    "{:>4}: if {:?} == {:#b}: {:?}",
                    index, condition.measurements, condition.value, op
                )?,
            }
        }
        for request in &self.requests {
            writeln!(f, "   => {:?}", request)?;
        }
        Ok(())
    }
}

/// Incrementally builds a `Circuit`, handing out measurement ids as markers are added.
///
/// ```
/// use qbranch::circuit::{CircuitBuilder, Condition};
/// use qbranch::state_vector::{Gate, Observable};
///
/// let mut b = CircuitBuilder::<Gate<f64>, Observable<f64>>::new();
/// b.apply(Gate::h(0));
/// let m = b.measure(0);
/// b.apply_if(Condition::is_one(m), Gate::x(1));
/// b.expectation(Observable::z(1));
/// let circuit = b.build().unwrap();
/// assert_eq!(circuit.len(), 3);
/// ```
#[derive(Debug)]
pub struct CircuitBuilder<Op, Obs> {
    steps: Vec<Step<Op>>,
    requests: Vec<MeasurementRequest<Obs>>,
    next_id: usize,
}

impl<Op, Obs> Default for CircuitBuilder<Op, Obs> {
    fn default() -> Self {
        Self {
            steps: vec![],
            requests: vec![],
            next_id: 0,
        }
    }
}

impl<Op, Obs> CircuitBuilder<Op, Obs> {
    /// Make an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a deterministic operation.
    pub fn apply(&mut self, op: Op) -> &mut Self {
        self.steps.push(Step::Operation(op));
        self
    }

    /// Append an operation applied only where `condition` holds.
    pub fn apply_if(&mut self, condition: Condition, op: Op) -> &mut Self {
        self.steps.push(Step::Conditioned { condition, op });
        self
    }

    /// Measure `wire` mid-circuit.
    pub fn measure(&mut self, wire: usize) -> MeasurementId {
        self.measure_with(wire, None, false)
    }

    /// Measure `wire` and keep only branches which observe `outcome`.
    pub fn postselect(&mut self, wire: usize, outcome: Outcome) -> MeasurementId {
        self.measure_with(wire, Some(outcome), false)
    }

    /// Measure `wire` then reset it to `|0>`.
    pub fn measure_and_reset(&mut self, wire: usize) -> MeasurementId {
        self.measure_with(wire, None, true)
    }

    /// Measure `wire` with full control over postselection and reset.
    pub fn measure_with(
        &mut self,
        wire: usize,
        postselect: Option<Outcome>,
        reset: bool,
    ) -> MeasurementId {
        let id = MeasurementId(self.next_id);
        self.next_id += 1;
        self.steps.push(Step::Measure(MidMeasurement {
            id,
            wire,
            postselect,
            reset,
        }));
        id
    }

    /// Request a terminal statistic, returns its index into the results.
    pub fn request(&mut self, request: MeasurementRequest<Obs>) -> usize {
        self.requests.push(request);
        self.requests.len() - 1
    }

    /// Request the expectation value of `observable`.
    pub fn expectation(&mut self, observable: Obs) -> usize {
        self.request(MeasurementRequest::Expectation(observable))
    }

    /// Request the final distribution over `wires`.
    pub fn probabilities(&mut self, wires: Vec<usize>) -> usize {
        self.request(MeasurementRequest::Probabilities(wires))
    }

    /// Request the distribution of mid-circuit outcomes.
    pub fn mid_circuit(&mut self, ids: Vec<MeasurementId>) -> usize {
        self.request(MeasurementRequest::MidCircuit(ids))
    }

    /// Validate and build the circuit.
    pub fn build(self) -> TraversalResult<Circuit<Op, Obs>> {
        Circuit::new(self.steps, self.requests)
    }
}
