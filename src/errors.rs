use thiserror::Error;

/// An error reported by a `StateBackend` while applying an operation, computing probabilities,
/// or projecting a state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    /// Construct a new error.
    pub fn new<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: msg.into(),
        }
    }

    /// The message describing the failure.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A result which may contain a backend error.
pub type BackendResult<T> = Result<T, BackendError>;

/// Conditions which abort a traversal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraversalError {
    /// The backend failed on the given step. Never retried.
    #[error("backend failed at step {step}: {source}")]
    Backend {
        /// Index of the circuit step being evaluated, or the step count for terminal requests.
        step: usize,
        /// Underlying failure.
        #[source]
        source: BackendError,
    },

    /// Probabilities did not sum to one, or a projection was requested for a pruned outcome.
    #[error("numerical degeneracy at step {step}: {message}")]
    NumericalDegeneracy {
        /// Index of the circuit step being evaluated.
        step: usize,
        /// What was inconsistent.
        message: String,
    },

    /// The traversal observed a cancellation request.
    #[error("traversal cancelled")]
    Cancelled,

    /// Every branch was removed by postselection so no conditional statistic exists.
    #[error("postselection discarded every branch")]
    EmptyPostselection,

    /// The circuit or mode descriptor is malformed.
    #[error("invalid circuit: {0}")]
    InvalidCircuit(String),
}

impl TraversalError {
    pub(crate) fn backend(step: usize, source: BackendError) -> Self {
        Self::Backend { step, source }
    }

    pub(crate) fn degenerate<S: Into<String>>(step: usize, message: S) -> Self {
        Self::NumericalDegeneracy {
            step,
            message: message.into(),
        }
    }
}

/// A result which may contain a traversal error.
pub type TraversalResult<T> = Result<T, TraversalError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn backend_error_is_the_source() {
        let err = TraversalError::backend(3, BackendError::new("bad matrix"));
        assert_eq!(err.to_string(), "backend failed at step 3: bad matrix");
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("bad matrix"));
    }

    #[test]
    fn cancelled_is_distinct() {
        assert_ne!(TraversalError::Cancelled, TraversalError::EmptyPostselection);
    }
}
