//! Error types for the legged-nlp library
//!
//! Precondition errors (factory misuse, unknown names, malformed weights)
//! are reported at the offending call. Domain errors from splines and
//! dynamic models propagate unmodified. `DimensionMismatch` is only
//! reachable through internal bugs and exists so tests can catch them.

use legged_splines::SplineError;
use thiserror::Error;

/// Main result type used throughout the legged-nlp library
pub type NlpResult<T> = Result<T, NlpError>;

/// Main error type for the legged-nlp library
#[derive(Debug, Clone, Error)]
pub enum NlpError {
    /// A factory `get_*` call happened before `init`
    #[error("Cost/constraint factory used before init")]
    NotInitialized,

    /// `init` was called twice on the same factory
    #[error("Cost/constraint factory already initialized")]
    AlreadyInitialized,

    #[error("Unknown constraint name: {0}")]
    UnknownConstraintName(String),

    #[error("Unknown cost name: {0}")]
    UnknownCostName(String),

    /// Cost weights must be finite and non-negative
    #[error("Invalid cost weight {0}: must be finite and non-negative")]
    InvalidWeight(f64),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown variable set: {0}")]
    UnknownVariableSet(String),

    #[error("Duplicate variable set: {0}")]
    DuplicateVariableSet(String),

    /// Block shape disagreed with the declared layout
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        expected: usize,
        actual: usize,
        context: String,
    },

    #[error("Spline error: {0}")]
    Spline(#[from] SplineError),

    /// The dynamic model could not be evaluated at the given state
    #[error("Dynamic model error: {0}")]
    Model(String),

    /// General computation errors
    #[error("Computation error: {0}")]
    Computation(String),

    /// Thread synchronization errors
    #[error("Thread synchronization error: {0}")]
    ThreadError(String),

    /// IO related errors (parameter files, snapshots)
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for NlpError {
    fn from(err: std::io::Error) -> Self {
        NlpError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for NlpError {
    fn from(err: serde_json::Error) -> Self {
        NlpError::InvalidInput(format!("Failed to parse JSON: {err}"))
    }
}
