use num_traits::{Float, NumAssign};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::iter::{Product, Sum};

/// The float precision of branch weights and backend probabilities.
pub trait Precision:
    Default + NumAssign + Float + Sum + Send + Sync + Display + Product + Debug
{
}

impl Precision for f64 {}

impl Precision for f32 {}

/// Convert a constant into the working precision.
pub(crate) fn from_f64<P: Precision>(x: f64) -> P {
    P::from(x).unwrap_or_else(P::nan)
}

/// Identifies a mid-circuit measurement marker within a circuit.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeasurementId(pub usize);

impl Display for MeasurementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// The observed value of a measurement, `0` or `1` for a single wire.
pub type Outcome = usize;

/// A recorded mid-circuit outcome.
pub type OutcomeRecord = (MeasurementId, Outcome);
