use crate::types::{OutcomeRecord, Precision};
use smallvec::SmallVec;

/// Outcome records kept inline for the common case of a handful of mid-circuit measurements.
pub type Outcomes = SmallVec<[OutcomeRecord; 8]>;

/// A unit of pending work: a position in the circuit, an exclusively owned state, the outcomes
/// observed so far and the probability of having reached this point.
///
/// Frames never share a state. Branching asks the backend for a fresh projected state per child,
/// so siblings may be evolved independently, on separate workers if desired.
#[derive(Clone, Debug)]
pub struct BranchFrame<S, P> {
    position: usize,
    state: S,
    outcomes: Outcomes,
    weight: P,
}

impl<S, P: Precision> BranchFrame<S, P> {
    /// The root frame: position zero, no outcomes, full weight.
    pub fn root(state: S) -> Self {
        Self {
            position: 0,
            state,
            outcomes: SmallVec::new(),
            weight: P::one(),
        }
    }

    /// Index of the next step to evaluate.
    pub fn position(&self) -> usize {
        self.position
    }

    /// The state snapshot owned by this frame.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Mid-circuit outcomes in the order they were observed.
    pub fn outcomes(&self) -> &[OutcomeRecord] {
        &self.outcomes
    }

    /// Cumulative probability of this branch. Always one in sampled mode.
    pub fn weight(&self) -> P {
        self.weight
    }

    /// True once every one of `steps` steps has been evaluated.
    pub fn is_terminal(&self, steps: usize) -> bool {
        self.position >= steps
    }

    /// Consume the frame, keeping its state.
    pub fn into_state(self) -> S {
        self.state
    }

    /// Consume the frame, returning its outcomes, state and weight.
    pub fn into_parts(self) -> (Outcomes, S, P) {
        (self.outcomes, self.state, self.weight)
    }

    /// Move to the next step with a new state.
    pub(crate) fn advance(self, state: S) -> Self {
        Self {
            position: self.position + 1,
            state,
            ..self
        }
    }

    /// Move to the next step without touching the state.
    pub(crate) fn skip(mut self) -> Self {
        self.position += 1;
        self
    }

    /// A child past the current measurement step, holding `state` and scaled by `probability`.
    pub(crate) fn child(&self, state: S, record: OutcomeRecord, probability: P) -> Self {
        let mut outcomes = self.outcomes.clone();
        outcomes.push(record);
        Self {
            position: self.position + 1,
            state,
            outcomes,
            weight: self.weight * probability,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MeasurementId;

    #[test]
    fn root_has_full_weight() {
        let frame = BranchFrame::<_, f64>::root("psi");
        assert_eq!(frame.position(), 0);
        assert_eq!(frame.weight(), 1.0);
        assert!(frame.outcomes().is_empty());
        assert!(frame.is_terminal(0));
        assert!(!frame.is_terminal(1));
    }

    #[test]
    fn children_do_not_alias_parent() {
        let parent = BranchFrame::<_, f64>::root(vec![1, 2]).skip();
        let a = parent.child(vec![3], (MeasurementId(0), 0), 0.25);
        let b = parent.child(vec![4], (MeasurementId(0), 1), 0.75);
        assert!(parent.outcomes().is_empty());
        assert_eq!(a.outcomes(), &[(MeasurementId(0), 0)]);
        assert_eq!(b.outcomes(), &[(MeasurementId(0), 1)]);
        assert_eq!((a.position(), b.position()), (2, 2));
        assert_eq!(a.weight() + b.weight(), 1.0);
        assert_eq!(parent.state(), &vec![1, 2]);
    }

    #[test]
    fn advance_replaces_state() {
        let frame = BranchFrame::<_, f32>::root(0u8).advance(7);
        assert_eq!(frame.position(), 1);
        assert_eq!(frame.into_state(), 7);
    }
}
