use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// Immutable policy for a `TraversalEngine`. Set once at construction, never changed during a
/// traversal.
///
/// ```
/// use qbranch::config::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_tolerance(1e-12)
///     .with_max_postselection_retries(10);
/// assert_eq!(config.max_postselection_retries, 10);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Outcomes with probability at or below this are pruned before projection. Negative values
    /// act as zero.
    pub tolerance: f64,
    /// Largest allowed deviation of an outcome distribution's total from one.
    pub sum_tolerance: f64,
    /// Number of restarts a sampled shot may make to satisfy postselection.
    pub max_postselection_retries: usize,
    /// Record a degenerate sampled shot instead of aborting the whole run.
    pub isolate_shot_failures: bool,
}

impl EngineConfig {
    /// Default pruning tolerance.
    pub const DEFAULT_TOLERANCE: f64 = 1e-10;
    /// Default normalization tolerance.
    pub const DEFAULT_SUM_TOLERANCE: f64 = 1e-8;
    /// Default postselection retry bound.
    pub const DEFAULT_MAX_POSTSELECTION_RETRIES: usize = 100;

    /// Set the pruning tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the normalization tolerance.
    pub fn with_sum_tolerance(mut self, sum_tolerance: f64) -> Self {
        self.sum_tolerance = sum_tolerance;
        self
    }

    /// Set the postselection retry bound.
    pub fn with_max_postselection_retries(mut self, retries: usize) -> Self {
        self.max_postselection_retries = retries;
        self
    }

    /// Set whether degenerate sampled shots are isolated.
    pub fn with_isolated_shot_failures(mut self, isolate: bool) -> Self {
        self.isolate_shot_failures = isolate;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tolerance: Self::DEFAULT_TOLERANCE,
            sum_tolerance: Self::DEFAULT_SUM_TOLERANCE,
            max_postselection_retries: Self::DEFAULT_MAX_POSTSELECTION_RETRIES,
            isolate_shot_failures: false,
        }
    }
}

/// How branches are explored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Every branch above tolerance, weighted by its probability.
    Analytic,
    /// One randomly drawn path per shot.
    Sampled {
        /// Number of shots.
        shots: NonZeroUsize,
        /// Seed for the pseudo-random source.
        seed: u64,
    },
}

impl ExecutionMode {
    /// Make a sampled mode, `None` if `shots` is zero.
    pub fn sampled(shots: usize, seed: u64) -> Option<Self> {
        NonZeroUsize::new(shots).map(|shots| Self::Sampled { shots, seed })
    }
}
